// Conductor pattern - one geometry parse feeds text, links and images
//
// The page-geometry parse runs once. The text ladder, annotation correlation
// and image carving then run side by side; hyperlinks are finished against
// the normalized transcript once the ladder settles.
use log::{debug, info, warn};
use lopdf::Document;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::content_extractor::parse_document;
use crate::pdf_extraction::extraction_router::{ExtractionRouter, ParsedInput};
use crate::pdf_extraction::hyperlinks::{correlate_annotations, layout_len, merge, rebase, scan_text};
use crate::pdf_extraction::image_carver::carve;
use crate::pdf_extraction::lopdf_helper::load_pdf;
use crate::pdf_extraction::normalize::normalize;
use crate::pdf_extraction::ocr_engine::RecognitionEngine;
use crate::types::{ExtractedImage, ExtractionResult, HarvestError, Hyperlink, PageLayout, Result};

/// Runs the whole pipeline for one document at a time.
///
/// Holds only read-only state, so one conductor can serve concurrent requests.
pub struct ExtractionConductor {
    config: Arc<PipelineConfig>,
    router: ExtractionRouter,
}

impl ExtractionConductor {
    pub fn new(config: PipelineConfig, ocr: Option<RecognitionEngine>) -> Self {
        let config = Arc::new(config);
        let router = ExtractionRouter::new(Arc::clone(&config), ocr);
        Self { config, router }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn extract_file(&self, path: &Path) -> Result<ExtractionResult> {
        let bytes = tokio::fs::read(path).await?;
        self.extract(bytes).await
    }

    /// Extract transcript, hyperlinks and images from raw PDF bytes.
    ///
    /// Only an empty buffer is an error. Every other failure degrades to
    /// empty fields in an otherwise complete result.
    pub async fn extract(&self, bytes: Vec<u8>) -> Result<ExtractionResult> {
        if bytes.is_empty() {
            return Err(HarvestError::Fatal("empty input buffer".into()));
        }
        let started = Instant::now();
        let bytes = Arc::new(bytes);
        let input = self.parse(Arc::clone(&bytes)).await;

        let (acquired, annotations, images) = tokio::join!(
            self.router.acquire(&input),
            self.annotation_links(&input),
            self.images(&input),
        );
        let acquired = acquired?;

        let text = normalize(&acquired.text);
        let hyperlinks = match annotations {
            Some((links, structured_len)) => merge(
                rebase(links, structured_len, &text),
                scan_text(&text),
                self.config.dedup_window,
            ),
            None => Vec::new(),
        };

        info!(
            "extracted {} chars, {} link(s), {} image(s) in {:?}",
            text.len(),
            hyperlinks.len(),
            images.len(),
            started.elapsed()
        );
        Ok(ExtractionResult {
            text,
            hyperlinks,
            images,
            source: acquired.source,
        })
    }

    /// Load the document and parse page geometry, time-boxed.
    async fn parse(&self, bytes: Arc<Vec<u8>>) -> ParsedInput {
        let source = Arc::clone(&bytes);
        let job = tokio::task::spawn_blocking(move || -> Result<(Document, Vec<PageLayout>)> {
            let document = load_pdf(&source)?;
            let pages = parse_document(&document);
            Ok((document, pages))
        });

        let parsed = match tokio::time::timeout(self.config.parse_timeout(), job).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(HarvestError::parse("geometry", join_err)),
            Err(_) => Err(HarvestError::parse("geometry", "timed out")),
        };

        match parsed {
            Ok((document, pages)) => {
                debug!("parsed {} page(s)", pages.len());
                ParsedInput {
                    bytes,
                    document: Some(Arc::new(document)),
                    pages: Arc::new(pages),
                }
            }
            Err(e) => {
                warn!("document parse failed, continuing without geometry: {}", e);
                ParsedInput {
                    bytes,
                    document: None,
                    pages: Arc::new(Vec::new()),
                }
            }
        }
    }

    /// Annotation links against the structured transcript, plus its length
    /// for rebasing. `None` when hyperlinks are switched off.
    async fn annotation_links(&self, input: &ParsedInput) -> Option<(Vec<Hyperlink>, usize)> {
        if !self.config.hyperlinks {
            return None;
        }
        let pages = Arc::clone(&input.pages);
        let tolerance = self.config.line_tolerance;
        let job = tokio::task::spawn_blocking(move || {
            (correlate_annotations(&pages, tolerance), layout_len(&pages, tolerance))
        });
        match job.await {
            Ok(found) => Some(found),
            Err(e) => {
                warn!("hyperlink correlation failed: {}", e);
                Some((Vec::new(), 0))
            }
        }
    }

    async fn images(&self, input: &ParsedInput) -> Vec<ExtractedImage> {
        let bytes = Arc::clone(&input.bytes);
        let document = input.document.clone();
        let config = Arc::clone(&self.config);
        let job = tokio::task::spawn_blocking(move || carve(document.as_deref(), &bytes, &config));
        job.await.unwrap_or_else(|e| {
            warn!("image carving failed: {}", e);
            Vec::new()
        })
    }
}
