//! Fetch key types used to coalesce equivalent tile requests.
//!
//! Two requests are merged into one transport operation only when their keys
//! compare equal. The key therefore carries the resolved URL plus any option
//! that affects the response bytes (currently the image format).

use std::fmt;

/// Image format requested from the tile provider.
///
/// The format is part of the fetch key because providers may return different
/// payloads for the same URL depending on content negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileFormat {
    /// JPEG imagery (default for satellite tiles).
    Jpeg,
    /// PNG imagery (lossless, used for overlays).
    Png,
    /// WebP imagery.
    Webp,
}

impl TileFormat {
    /// Returns the file extension for this format, without a leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpg",
            TileFormat::Png => "png",
            TileFormat::Webp => "webp",
        }
    }

    /// Returns the MIME type sent in the `Accept` header.
    pub fn mime(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "image/jpeg",
            TileFormat::Png => "image/png",
            TileFormat::Webp => "image/webp",
        }
    }
}

impl Default for TileFormat {
    fn default() -> Self {
        TileFormat::Jpeg
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Identifier used to coalesce equivalent fetch requests.
///
/// Equal keys denote equivalent requests and share one in-flight download;
/// unequal keys are never coalesced.
///
/// # Example
///
/// ```
/// use tilefetch::{FetchKey, TileFormat};
///
/// let key = FetchKey::new("https://tiles.example.com/18/100/200", TileFormat::Jpeg);
/// assert_eq!(key.url(), "https://tiles.example.com/18/100/200");
/// assert_eq!(key.format(), TileFormat::Jpeg);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    /// Fully resolved request URL.
    url: String,
    /// Response-affecting format option.
    format: TileFormat,
}

impl FetchKey {
    /// Create a new fetch key.
    pub fn new(url: impl Into<String>, format: TileFormat) -> Self {
        Self {
            url: url.into(),
            format,
        }
    }

    /// Get the resolved request URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the requested image format.
    pub fn format(&self) -> TileFormat {
        self.format
    }
}

impl fmt::Display for FetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new() {
        let key = FetchKey::new("https://example.com/tile", TileFormat::Png);
        assert_eq!(key.url(), "https://example.com/tile");
        assert_eq!(key.format(), TileFormat::Png);
    }

    #[test]
    fn test_equality() {
        let a = FetchKey::new("https://example.com/tile", TileFormat::Jpeg);
        let b = FetchKey::new("https://example.com/tile", TileFormat::Jpeg);
        let c = FetchKey::new("https://example.com/other", TileFormat::Jpeg);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_format_affects_equality() {
        let jpeg = FetchKey::new("https://example.com/tile", TileFormat::Jpeg);
        let png = FetchKey::new("https://example.com/tile", TileFormat::Png);
        assert_ne!(jpeg, png);
    }

    #[test]
    fn test_hash() {
        let mut set = HashSet::new();
        set.insert(FetchKey::new("https://example.com/a", TileFormat::Jpeg));
        set.insert(FetchKey::new("https://example.com/a", TileFormat::Jpeg));
        set.insert(FetchKey::new("https://example.com/a", TileFormat::Png));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display() {
        let key = FetchKey::new("https://example.com/tile", TileFormat::Webp);
        assert_eq!(format!("{}", key), "https://example.com/tile (webp)");
    }

    #[test]
    fn test_format_extension_and_mime() {
        assert_eq!(TileFormat::Jpeg.extension(), "jpg");
        assert_eq!(TileFormat::Jpeg.mime(), "image/jpeg");
        assert_eq!(TileFormat::Png.extension(), "png");
        assert_eq!(TileFormat::Webp.mime(), "image/webp");
    }

    #[test]
    fn test_format_default() {
        assert_eq!(TileFormat::default(), TileFormat::Jpeg);
    }
}
