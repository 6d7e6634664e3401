// Text acquisition chain
//
// Direct stream text, then layout reconstruction, then OCR. Each rung
// reports a StrategyOutcome; the first Accepted transcript wins, otherwise the
// longest partial seen is kept.
use log::{debug, info, warn};
use lopdf::Document;
use std::sync::Arc;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::pdf_extraction::layout::reconstruct;
use crate::pdf_extraction::ocr_engine::RecognitionEngine;
use crate::types::{HarvestError, PageLayout, Result, TextSource};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExtractionMethod {
    Direct,
    Structured,
    Ocr,
}

impl ExtractionMethod {
    pub const LADDER: [ExtractionMethod; 3] = [
        ExtractionMethod::Direct,
        ExtractionMethod::Structured,
        ExtractionMethod::Ocr,
    ];

    pub fn source(&self) -> TextSource {
        match self {
            ExtractionMethod::Direct => TextSource::Direct,
            ExtractionMethod::Structured => TextSource::Structured,
            ExtractionMethod::Ocr => TextSource::Ocr,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExtractionMethod::Direct => "direct",
            ExtractionMethod::Structured => "structured",
            ExtractionMethod::Ocr => "ocr",
        }
    }
}

/// What one rung of the ladder produced.
#[derive(Debug)]
pub enum StrategyOutcome {
    /// Cleared the quality bar; stop here.
    Accepted(String),
    /// Fell short or failed. Carries the short transcript if there was one.
    TryNext(Option<String>),
    /// Stop the ladder and surface the error.
    Fatal(HarvestError),
}

impl StrategyOutcome {
    /// Grade a transcript against the quality bar.
    pub fn grade(text: String, quality_bar: usize) -> Self {
        let length = text.trim().chars().count();
        if length >= quality_bar {
            StrategyOutcome::Accepted(text)
        } else if length == 0 {
            StrategyOutcome::TryNext(None)
        } else {
            StrategyOutcome::TryNext(Some(text))
        }
    }

    /// Recoverable failures fall through; anything else ends the ladder.
    pub fn from_error(method: ExtractionMethod, error: HarvestError) -> Self {
        if error.is_recoverable() {
            warn!("{} extraction failed: {}", method.name(), error);
            StrategyOutcome::TryNext(None)
        } else {
            StrategyOutcome::Fatal(error)
        }
    }
}

/// Everything the ladder reads from. Built once per request by the conductor.
#[derive(Clone)]
pub struct ParsedInput {
    pub bytes: Arc<Vec<u8>>,
    /// `None` when lopdf could not load the bytes.
    pub document: Option<Arc<Document>>,
    /// Page geometry, shared with hyperlink correlation.
    pub pages: Arc<Vec<PageLayout>>,
}

/// The transcript the ladder settled on and where it came from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AcquiredText {
    pub text: String,
    pub source: TextSource,
}

pub struct ExtractionRouter {
    config: Arc<PipelineConfig>,
    ocr: Option<RecognitionEngine>,
}

impl ExtractionRouter {
    pub fn new(config: Arc<PipelineConfig>, ocr: Option<RecognitionEngine>) -> Self {
        Self { config, ocr }
    }

    /// Walk the ladder. Only a non-recoverable error escapes.
    pub async fn acquire(&self, input: &ParsedInput) -> Result<AcquiredText> {
        let mut best: Option<AcquiredText> = None;

        for method in ExtractionMethod::LADDER {
            let started = Instant::now();
            let outcome = self.run_strategy(method, input).await;
            debug!("{} strategy finished in {:?}", method.name(), started.elapsed());

            match outcome {
                StrategyOutcome::Accepted(text) => {
                    info!("transcript accepted from {} strategy ({} chars)", method.name(), text.len());
                    return Ok(AcquiredText {
                        text,
                        source: method.source(),
                    });
                }
                StrategyOutcome::TryNext(partial) => {
                    if let Some(text) = partial {
                        let longer = best
                            .as_ref()
                            .map_or(true, |b| text.trim().chars().count() > b.text.trim().chars().count());
                        if longer {
                            best = Some(AcquiredText {
                                text,
                                source: method.source(),
                            });
                        }
                    }
                }
                StrategyOutcome::Fatal(error) => return Err(error),
            }
        }

        let fallback = best.unwrap_or_default();
        info!(
            "no strategy cleared the quality bar; keeping {} chars from {:?}",
            fallback.text.len(),
            fallback.source
        );
        Ok(fallback)
    }

    pub async fn run_strategy(&self, method: ExtractionMethod, input: &ParsedInput) -> StrategyOutcome {
        match method {
            ExtractionMethod::Direct => self.direct(input).await,
            ExtractionMethod::Structured => self.structured(input),
            ExtractionMethod::Ocr => self.recognize(input).await,
        }
    }

    /// Stream-order text from lopdf, no positional reconstruction.
    async fn direct(&self, input: &ParsedInput) -> StrategyOutcome {
        let Some(document) = input.document.clone() else {
            return StrategyOutcome::TryNext(None);
        };
        let job = tokio::task::spawn_blocking(move || {
            let pages: Vec<u32> = document.get_pages().keys().copied().collect();
            document.extract_text(&pages)
        });

        let extracted = match tokio::time::timeout(self.config.parse_timeout(), job).await {
            Ok(Ok(Ok(text))) => Ok(text),
            Ok(Ok(Err(e))) => Err(HarvestError::parse("direct", e)),
            Ok(Err(join_err)) => Err(HarvestError::parse("direct", join_err)),
            Err(_) => Err(HarvestError::parse("direct", "timed out")),
        };
        match extracted {
            Ok(text) => StrategyOutcome::grade(text, self.config.quality_bar),
            Err(e) => StrategyOutcome::from_error(ExtractionMethod::Direct, e),
        }
    }

    /// Layout reconstruction over the shared page geometry.
    fn structured(&self, input: &ParsedInput) -> StrategyOutcome {
        if input.pages.is_empty() {
            return StrategyOutcome::TryNext(None);
        }
        let text = reconstruct(&input.pages, self.config.line_tolerance);
        StrategyOutcome::grade(text, self.config.quality_bar)
    }

    async fn recognize(&self, input: &ParsedInput) -> StrategyOutcome {
        if !self.config.ocr_enabled {
            debug!("ocr disabled by configuration");
            return StrategyOutcome::TryNext(None);
        }
        let Some(engine) = &self.ocr else {
            return StrategyOutcome::from_error(
                ExtractionMethod::Ocr,
                HarvestError::UnsupportedEnvironment("no recognition engine configured".into()),
            );
        };
        match engine.recognize_document(Arc::clone(&input.bytes)).await {
            Ok(text) => StrategyOutcome::grade(text, self.config.quality_bar),
            Err(e) => StrategyOutcome::from_error(ExtractionMethod::Ocr, e),
        }
    }
}
