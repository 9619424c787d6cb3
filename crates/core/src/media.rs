//! Media category checks for user-selected artifacts.
//!
//! Validation is done on the declared MIME type only; payload bytes are
//! never sniffed.

use std::path::Path;

use crate::error::TaskError;

// ---------------------------------------------------------------------------
// MIME prefixes
// ---------------------------------------------------------------------------

/// Prefix shared by every image MIME type.
pub const MIME_PREFIX_IMAGE: &str = "image/";
/// Prefix shared by every video MIME type.
pub const MIME_PREFIX_VIDEO: &str = "video/";

/// Fallback when a file extension is not recognised.
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Known file extensions and the MIME type declared for them.
const EXTENSION_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
    ("avi", "video/x-msvideo"),
];

/// The kind of artifact a surface accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaCategory {
    Image,
    Video,
}

impl MediaCategory {
    pub fn mime_prefix(self) -> &'static str {
        match self {
            Self::Image => MIME_PREFIX_IMAGE,
            Self::Video => MIME_PREFIX_VIDEO,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// Whether `declared` (e.g. `"video/mp4; codecs=avc1"`) belongs to this
    /// category. Case-insensitive; MIME parameters are ignored.
    pub fn matches(self, declared: &str) -> bool {
        let essence = declared.split(';').next().unwrap_or_default().trim();
        let prefix = self.mime_prefix();
        essence.len() > prefix.len()
            && essence
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    }
}

impl std::fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a declared MIME type against the category a surface expects.
pub fn validate_declared_type(declared: &str, expected: MediaCategory) -> Result<(), TaskError> {
    if expected.matches(declared) {
        Ok(())
    } else {
        Err(TaskError::InvalidType {
            declared: declared.to_string(),
            expected,
        })
    }
}

/// Guess the declared MIME type of a file from its extension.
///
/// Returns [`MIME_OCTET_STREAM`] for unknown or missing extensions, which
/// then fails validation for either category.
pub fn declared_type_for_path(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return MIME_OCTET_STREAM;
    };
    EXTENSION_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| *mime)
        .unwrap_or(MIME_OCTET_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn image_types_match_image_category() {
        for mime in ["image/jpeg", "image/png", "IMAGE/WEBP", " image/gif "] {
            assert!(MediaCategory::Image.matches(mime), "{mime}");
        }
    }

    #[test]
    fn video_type_with_parameters_matches() {
        assert!(MediaCategory::Video.matches("video/mp4; codecs=\"avc1.42E01E\""));
    }

    #[test]
    fn unsupported_types_are_rejected() {
        for mime in [
            "",
            "image/",
            "text/plain",
            "application/octet-stream",
            "video/mp4",
            "imagex/png",
        ] {
            assert_matches!(
                validate_declared_type(mime, MediaCategory::Image),
                Err(TaskError::InvalidType { expected: MediaCategory::Image, .. }),
                "{mime}"
            );
        }
    }

    #[test]
    fn image_rejected_for_video_surface() {
        let err = validate_declared_type("image/jpeg", MediaCategory::Video).unwrap_err();
        assert_eq!(err.reason(), "invalid type");
    }

    #[test]
    fn extension_lookup() {
        assert_eq!(declared_type_for_path(Path::new("face.JPG")), "image/jpeg");
        assert_eq!(declared_type_for_path(Path::new("/tmp/clip.mov")), "video/quicktime");
        assert_eq!(declared_type_for_path(Path::new("notes.txt")), MIME_OCTET_STREAM);
        assert_eq!(declared_type_for_path(Path::new("Makefile")), MIME_OCTET_STREAM);
    }
}
