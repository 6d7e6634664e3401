// OCR engine: tesseract recognizer plus the shared recognition handle
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::config::PipelineConfig;
use crate::pdf_extraction::layout::PAGE_SEPARATOR;
use crate::system_pdf_renderer::{PageRasterizer, SystemPdfRenderer};
use crate::types::{HarvestError, Result};

/// Reads the text off one raster image.
pub trait TextRecognizer: Send + Sync {
    fn is_available(&self) -> bool;

    fn recognize(&self, image: &Path, language: &str) -> Result<String>;
}

pub struct TesseractEngine {
    binary: String,
    available: bool,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        let binary = binary.into();
        let available = Command::new(&binary)
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false);
        if !available {
            warn!("{} not found; optical recognition disabled", binary);
        }
        Self { binary, available }
    }
}

impl TextRecognizer for TesseractEngine {
    fn is_available(&self) -> bool {
        self.available
    }

    fn recognize(&self, image: &Path, language: &str) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarvestError::parse("ocr", stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Process-wide recognition handle.
///
/// Built once at startup and shared by every request. Cloning is cheap; all
/// clones share one semaphore, so at most `ocr_workers` documents are being
/// recognized at any moment. After [`RecognitionEngine::shutdown`] every call
/// fails with `UnsupportedEnvironment`.
#[derive(Clone)]
pub struct RecognitionEngine {
    rasterizer: Arc<dyn PageRasterizer>,
    recognizer: Arc<dyn TextRecognizer>,
    permits: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    language: String,
    temp_root: PathBuf,
    timeout: Duration,
}

impl RecognitionEngine {
    pub fn new(
        config: &PipelineConfig,
        rasterizer: Arc<dyn PageRasterizer>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        Self {
            rasterizer,
            recognizer,
            permits: Arc::new(Semaphore::new(config.ocr_workers.max(1))),
            closed: Arc::new(AtomicBool::new(false)),
            language: config.ocr_language.clone(),
            temp_root: config.temp_root(),
            timeout: config.ocr_timeout(),
        }
    }

    /// pdftoppm + tesseract, as named in the config.
    pub fn system(config: &PipelineConfig) -> Self {
        Self::new(
            config,
            Arc::new(SystemPdfRenderer::from_config(config)),
            Arc::new(TesseractEngine::new(config.tesseract_bin.clone())),
        )
    }

    pub fn is_available(&self) -> bool {
        !self.is_shut_down() && self.rasterizer.is_available() && self.recognizer.is_available()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.permits.close();
            info!("recognition engine shut down");
        }
    }

    /// Rasterize and recognize every page, one page at a time.
    ///
    /// Page images live in a scratch directory under the configured temp root
    /// that is removed when recognition finishes, fails, or panics.
    pub async fn recognize_document(&self, pdf: Arc<Vec<u8>>) -> Result<String> {
        if self.is_shut_down() {
            return Err(HarvestError::UnsupportedEnvironment(
                "recognition engine has been shut down".into(),
            ));
        }
        if !self.is_available() {
            return Err(HarvestError::UnsupportedEnvironment(
                "rasterizer or recognizer missing".into(),
            ));
        }

        let permit = self.permits.clone().acquire_owned().await.map_err(|_| {
            HarvestError::UnsupportedEnvironment("recognition engine has been shut down".into())
        })?;

        let rasterizer = Arc::clone(&self.rasterizer);
        let recognizer = Arc::clone(&self.recognizer);
        let language = self.language.clone();
        let temp_root = self.temp_root.clone();

        let job = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            recognize_pages(rasterizer.as_ref(), recognizer.as_ref(), &pdf, &language, &temp_root)
        });

        match tokio::time::timeout(self.timeout, job).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(HarvestError::parse("ocr", join_err)),
            Err(_) => Err(HarvestError::parse(
                "ocr",
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }
}

fn recognize_pages(
    rasterizer: &dyn PageRasterizer,
    recognizer: &dyn TextRecognizer,
    pdf: &[u8],
    language: &str,
    temp_root: &Path,
) -> Result<String> {
    let started = Instant::now();
    fs::create_dir_all(temp_root)?;
    let scratch = tempfile::Builder::new()
        .prefix("chonker-ocr-")
        .tempdir_in(temp_root)?;

    let input = scratch.path().join("input.pdf");
    fs::write(&input, pdf)?;
    let pages = rasterizer.rasterize(&input, scratch.path())?;

    let mut texts = Vec::with_capacity(pages.len());
    for (index, page) in pages.iter().enumerate() {
        let text = recognizer.recognize(page, language)?;
        debug!("page {} recognized {} chars", index + 1, text.len());
        texts.push(text.trim_end().to_string());
    }
    debug!("recognized {} page(s) in {:?}", pages.len(), started.elapsed());
    Ok(texts.join(PAGE_SEPARATOR))
}


#[cfg(test)]
mod tests {
    use super::fakes::{FakeRasterizer, FakeRecognizer};
    use super::*;
    use tempfile::TempDir;

    fn engine(
        temp: &TempDir,
        rasterizer: Arc<FakeRasterizer>,
        recognizer: FakeRecognizer,
        timeout_ms: u64,
    ) -> RecognitionEngine {
        let mut config = PipelineConfig::default();
        config.temp_root = Some(temp.path().to_path_buf());
        config.ocr_timeout_ms = timeout_ms;
        RecognitionEngine::new(&config, rasterizer, Arc::new(recognizer))
    }

    #[tokio::test]
    async fn test_pages_recognized_in_order_and_scratch_removed() {
        let temp = TempDir::new().unwrap();
        let rasterizer = Arc::new(FakeRasterizer::new(3));
        let engine = engine(&temp, Arc::clone(&rasterizer), FakeRecognizer::new("scan"), 5_000);

        let text = engine
            .recognize_document(Arc::new(b"%PDF-1.5".to_vec()))
            .await
            .unwrap();
        assert_eq!(text, "scan page-1\n\nscan page-2\n\nscan page-3");

        let dirs = rasterizer.seen_dirs.lock().unwrap().clone();
        assert_eq!(dirs.len(), 1);
        assert!(dirs[0].starts_with(temp.path()));
        assert!(!dirs[0].exists());
    }

    #[tokio::test]
    async fn test_scratch_removed_on_failure() {
        let temp = TempDir::new().unwrap();
        let rasterizer = Arc::new(FakeRasterizer::new(2));
        let mut recognizer = FakeRecognizer::new("x");
        recognizer.fail = true;
        let engine = engine(&temp, Arc::clone(&rasterizer), recognizer, 5_000);

        let err = engine
            .recognize_document(Arc::new(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::ParseFailure { stage: "ocr", .. }));
        let dirs = rasterizer.seen_dirs.lock().unwrap().clone();
        assert!(!dirs[0].exists());
    }

    #[tokio::test]
    async fn test_timeout_is_parse_failure() {
        let temp = TempDir::new().unwrap();
        let mut recognizer = FakeRecognizer::new("slow");
        recognizer.delay = Duration::from_millis(300);
        let engine = engine(&temp, Arc::new(FakeRasterizer::new(1)), recognizer, 20);

        let err = engine
            .recognize_document(Arc::new(Vec::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    fn bounded_engine(temp: &TempDir, workers: usize, recognizer: FakeRecognizer) -> RecognitionEngine {
        let mut config = PipelineConfig::default();
        config.temp_root = Some(temp.path().to_path_buf());
        config.ocr_timeout_ms = 10_000;
        config.ocr_workers = workers;
        RecognitionEngine::new(&config, Arc::new(FakeRasterizer::new(1)), Arc::new(recognizer))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_worker_serializes_requests() {
        let temp = TempDir::new().unwrap();
        let mut recognizer = FakeRecognizer::new("busy");
        recognizer.delay = Duration::from_millis(50);
        let peak = Arc::clone(&recognizer.peak);
        let engine = bounded_engine(&temp, 1, recognizer);

        let pdf = Arc::new(b"%PDF-1.5".to_vec());
        let (a, b, c, d) = tokio::join!(
            engine.recognize_document(Arc::clone(&pdf)),
            engine.recognize_document(Arc::clone(&pdf)),
            engine.recognize_document(Arc::clone(&pdf)),
            engine.recognize_document(Arc::clone(&pdf)),
        );
        for text in [a, b, c, d] {
            assert_eq!(text.unwrap(), "busy page-1");
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clones_share_the_worker_limit() {
        let temp = TempDir::new().unwrap();
        let mut recognizer = FakeRecognizer::new("busy");
        recognizer.delay = Duration::from_millis(50);
        let peak = Arc::clone(&recognizer.peak);
        let engine = bounded_engine(&temp, 2, recognizer);

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.recognize_document(Arc::new(Vec::new())).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak concurrency {}", peak);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_work() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp, Arc::new(FakeRasterizer::new(1)), FakeRecognizer::new("x"), 5_000);
        let clone = engine.clone();
        assert!(clone.is_available());

        engine.shutdown();
        assert!(clone.is_shut_down());
        assert!(!clone.is_available());
        let err = clone
            .recognize_document(Arc::new(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::UnsupportedEnvironment(_)));
    }

    #[tokio::test]
    async fn test_unavailable_rasterizer() {
        let temp = TempDir::new().unwrap();
        let mut rasterizer = FakeRasterizer::new(1);
        rasterizer.available = false;
        let engine = engine(&temp, Arc::new(rasterizer), FakeRecognizer::new("x"), 5_000);
        assert!(!engine.is_available());
        assert!(matches!(
            engine.recognize_document(Arc::new(Vec::new())).await,
            Err(HarvestError::UnsupportedEnvironment(_))
        ));
    }

    #[test]
    fn test_missing_tesseract() {
        assert!(!TesseractEngine::new("no-such-tesseract-binary").is_available());
    }
}
