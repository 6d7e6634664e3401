// PDF extraction module
pub mod conductor;
pub mod extraction_router;
pub mod hyperlinks;
pub mod image_carver;
pub mod layout;
pub mod lopdf_helper;
pub mod normalize;
pub mod ocr_engine;

pub use conductor::ExtractionConductor;
pub use extraction_router::{ExtractionMethod, ExtractionRouter, StrategyOutcome};
pub use layout::reconstruct;
pub use normalize::normalize;
pub use ocr_engine::{RecognitionEngine, TesseractEngine, TextRecognizer};
