// chonker-harvest: text, hyperlinks and images out of arbitrary PDFs
pub mod config;
pub mod content_extractor;
pub mod pdf_extraction;
pub mod system_pdf_renderer;
pub mod types;

pub use config::PipelineConfig;
pub use pdf_extraction::{ExtractionConductor, RecognitionEngine};
pub use system_pdf_renderer::{PageRasterizer, SystemPdfRenderer};
pub use types::{
    ExtractedImage, ExtractionResult, HarvestError, Hyperlink, ImageFormat, ImageOrigin, Result,
    TextSource,
};
