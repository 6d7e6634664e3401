// Core types for chonker-harvest
use serde::{Deserialize, Serialize};

/// One positioned run of characters on a page.
///
/// Coordinates are page space with the origin at the top-left corner, so
/// ascending `y` is top-to-bottom reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub x: f64,
    pub y: f64,
    pub content: String,
}

impl TextFragment {
    pub fn new(x: f64, y: f64, content: impl Into<String>) -> Self {
        Self {
            x,
            y,
            content: content.into(),
        }
    }
}

/// Annotation rectangle in the same top-down page space as fragments.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// A link whose target is known but whose textual anchor is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkAnnotation {
    pub uri: String,
    /// 1-based page number
    pub page: u32,
    pub rect: Option<LinkRect>,
}

/// Everything the geometry parse learned about one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    /// 1-based page number
    pub page: u32,
    pub fragments: Vec<TextFragment>,
    pub links: Vec<LinkAnnotation>,
}

impl PageLayout {
    pub fn new(page: u32) -> Self {
        Self {
            page,
            ..Default::default()
        }
    }
}

/// A hyperlink located in the final transcript.
///
/// `offset` is a UTF-8 byte offset into the transcript and always falls on a
/// char boundary. `page` is `None` for links found only by scanning text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hyperlink {
    pub url: String,
    pub page: Option<u32>,
    pub offset: usize,
    pub anchor_text: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
        }
    }
}

/// A byte range of the raw document believed to hold one complete image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub start: usize,
    pub end: usize,
    pub format: ImageFormat,
    pub size: usize,
}

impl ImageCandidate {
    pub fn new(start: usize, end: usize, format: ImageFormat) -> Self {
        Self {
            start,
            end,
            format,
            size: end - start,
        }
    }

    pub fn overlaps(&self, other: &ImageCandidate) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    /// Found by walking the document's image objects or data URIs
    Structured,
    /// Carved out of the raw bytes by signature
    ByteScan,
}

/// An image recovered from the document, ready for the caller to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedImage {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub size: usize,
    pub origin: ImageOrigin,
    pub filename: String,
}

impl ExtractedImage {
    pub fn new(bytes: Vec<u8>, format: ImageFormat, origin: ImageOrigin, index: usize) -> Self {
        let size = bytes.len();
        Self {
            filename: format!("image_{:02}.{}", index + 1, format.extension()),
            bytes,
            format,
            size,
            origin,
        }
    }
}

/// Which text strategy produced the returned transcript.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSource {
    Direct,
    Structured,
    Ocr,
    #[default]
    None,
}

/// The pipeline's sole output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text: String,
    pub hyperlinks: Vec<Hyperlink>,
    pub images: Vec<ExtractedImage>,
    pub source: TextSource,
}

impl ExtractionResult {
    /// The largest recovered image, e.g. a profile photo.
    pub fn best_image(&self) -> Option<&ExtractedImage> {
        self.images.iter().max_by_key(|img| img.size)
    }
}

// Error types
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// One strategy could not produce output; the next one is tried.
    #[error("parse failure in {stage}: {reason}")]
    ParseFailure { stage: &'static str, reason: String },

    /// An optional tool is missing; the strategy that needs it is skipped.
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// Nothing valid was found in the bytes.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// The input cannot be processed at all.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl HarvestError {
    pub fn parse(stage: &'static str, reason: impl ToString) -> Self {
        HarvestError::ParseFailure {
            stage,
            reason: reason.to_string(),
        }
    }

    /// Everything except `Fatal` and bad configuration is handled inside the pipeline.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, HarvestError::Fatal(_) | HarvestError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_overlap() {
        let a = ImageCandidate::new(0, 100, ImageFormat::Jpeg);
        let b = ImageCandidate::new(99, 200, ImageFormat::Png);
        let c = ImageCandidate::new(100, 200, ImageFormat::Png);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert_eq!(b.size, 101);
    }

    #[test]
    fn test_error_taxonomy() {
        assert!(HarvestError::parse("direct", "empty").is_recoverable());
        assert!(HarvestError::UnsupportedEnvironment("pdftoppm".into()).is_recoverable());
        assert!(HarvestError::MalformedDocument("no images".into()).is_recoverable());
        assert!(!HarvestError::Fatal("empty buffer".into()).is_recoverable());
    }

    #[test]
    fn test_image_filename() {
        let img = ExtractedImage::new(vec![0; 10], ImageFormat::Webp, ImageOrigin::ByteScan, 0);
        assert_eq!(img.filename, "image_01.webp");
        assert_eq!(img.size, 10);
    }

    #[test]
    fn test_best_image_is_largest() {
        let result = ExtractionResult {
            images: vec![
                ExtractedImage::new(vec![0; 10], ImageFormat::Png, ImageOrigin::ByteScan, 0),
                ExtractedImage::new(vec![0; 30], ImageFormat::Jpeg, ImageOrigin::ByteScan, 1),
            ],
            ..Default::default()
        };
        assert_eq!(result.best_image().map(|i| i.size), Some(30));
        assert!(ExtractionResult::default().best_image().is_none());
    }
}
