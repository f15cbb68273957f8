// src/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// File Size Helper
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileSize(pub u64);

impl FileSize {
    pub const fn bytes(size: u64) -> Self {
        Self(size)
    }

    /// Saturates at `u64::MAX` bytes.
    pub const fn megabytes(size: u64) -> Self {
        Self(size.saturating_mul(1024 * 1024))
    }

    /// `None` when the byte count does not fit in a `u64`.
    pub const fn try_megabytes(size: u64) -> Option<Self> {
        match size.checked_mul(1024 * 1024) {
            Some(bytes) => Some(Self(bytes)),
            None => None,
        }
    }

    pub fn as_bytes(&self) -> u64 {
        self.0
    }

    pub fn human_readable(&self) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = self.0 as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.1} {}", size, UNITS[unit_idx])
    }
}

impl fmt::Display for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.human_readable())
    }
}

impl From<u64> for FileSize {
    fn from(size: u64) -> Self {
        Self(size)
    }
}

// ============================================================================
// MIME Type Helper
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MimeType(String);

impl MimeType {
    pub fn new(mime: impl Into<String>) -> Self {
        Self(mime.into())
    }

    /// Declared type when present and specific, otherwise a guess from the
    /// file name.
    pub fn resolve(declared: Option<&str>, file_name: &str) -> Self {
        match declared
            .map(str::trim)
            .filter(|m| !m.is_empty() && !m.eq_ignore_ascii_case("application/octet-stream"))
        {
            Some(mime) => Self::new(mime.to_ascii_lowercase()),
            None => Self::new(
                mime_guess::from_path(file_name)
                    .first_or_octet_stream()
                    .to_string(),
            ),
        }
    }

    pub fn is_image(&self) -> bool {
        self.0.starts_with("image/")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MimeType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_size() {
        let size = FileSize::megabytes(5);
        assert_eq!(size.as_bytes(), 5 * 1024 * 1024);
        assert_eq!(size.human_readable(), "5.0 MB");
        assert_eq!(FileSize::bytes(512).to_string(), "512.0 B");
    }

    #[test]
    fn test_file_size_overflow() {
        assert_eq!(FileSize::try_megabytes(2), Some(FileSize::bytes(2 * 1024 * 1024)));
        assert_eq!(FileSize::try_megabytes(u64::MAX), None);
        assert_eq!(FileSize::megabytes(u64::MAX), FileSize::bytes(u64::MAX));
    }

    #[test]
    fn test_mime_type() {
        let mime = MimeType::new("image/jpeg");
        assert!(mime.is_image());
        assert!(!MimeType::from("text/plain").is_image());
    }

    #[test]
    fn test_mime_resolution() {
        assert_eq!(MimeType::resolve(Some("IMAGE/PNG"), "x.bin").as_str(), "image/png");
        assert_eq!(MimeType::resolve(None, "cat.png").as_str(), "image/png");
        assert_eq!(MimeType::resolve(Some(""), "notes.txt").as_str(), "text/plain");
        assert!(!MimeType::resolve(None, "blob").is_image());
        assert!(MimeType::resolve(Some("application/octet-stream"), "scan.jpg").is_image());
    }
}
