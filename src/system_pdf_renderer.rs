// System PDF rasterizer using pdftoppm
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::PipelineConfig;
use crate::types::{HarvestError, Result};

/// Turns every page of a PDF on disk into one raster image file.
pub trait PageRasterizer: Send + Sync {
    fn is_available(&self) -> bool;

    /// Render all pages of `pdf` into `out_dir`. Paths come back in page order.
    fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>>;
}

pub struct SystemPdfRenderer {
    binary: String,
    dpi: u32,
    available: bool,
}

impl SystemPdfRenderer {
    pub fn new(binary: impl Into<String>, dpi: u32) -> Self {
        let binary = binary.into();
        // pdftoppm -v prints its version and exits; a spawn failure means it is not installed
        let available = Command::new(&binary).arg("-v").output().is_ok();
        if !available {
            warn!("{} not found; page rasterization disabled", binary);
        }
        Self {
            binary,
            dpi,
            available,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.pdftoppm_bin.clone(), config.raster_dpi)
    }
}

/// pdftoppm names pages `<prefix>-<n>.png`, zero-padded by page count.
fn page_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let (prefix, number) = stem.rsplit_once('-')?;
    if prefix != "page" {
        return None;
    }
    number.parse().ok()
}

pub(crate) fn collect_pages(out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pages: Vec<(u32, PathBuf)> = fs::read_dir(out_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map_or(false, |ext| ext == "png"))
        .filter_map(|path| page_number(&path).map(|n| (n, path)))
        .collect();
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}

impl PageRasterizer for SystemPdfRenderer {
    fn is_available(&self) -> bool {
        self.available
    }

    fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
        if !self.available {
            return Err(HarvestError::UnsupportedEnvironment(format!(
                "{} is not installed",
                self.binary
            )));
        }
        let output_prefix = out_dir.join("page");
        debug!("rasterizing {:?} at {} dpi", pdf, self.dpi);

        let output = Command::new(&self.binary)
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(pdf)
            .arg(&output_prefix)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarvestError::parse("rasterize", stderr.trim()));
        }

        let pages = collect_pages(out_dir)?;
        if pages.is_empty() {
            return Err(HarvestError::parse("rasterize", "no pages rendered"));
        }
        debug!("rendered {} page image(s)", pages.len());
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pages_sorted_numerically() {
        let dir = TempDir::new().unwrap();
        for name in ["page-10.png", "page-02.png", "page-1.png", "other.png", "page-3.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let names: Vec<String> = collect_pages(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["page-1.png", "page-02.png", "page-10.png"]);
    }

    #[test]
    fn test_missing_binary_is_unsupported() {
        let renderer = SystemPdfRenderer::new("definitely-not-a-real-pdftoppm", 150);
        assert!(!renderer.is_available());
        let dir = TempDir::new().unwrap();
        let err = renderer
            .rasterize(&dir.path().join("in.pdf"), dir.path())
            .unwrap_err();
        assert!(matches!(err, HarvestError::UnsupportedEnvironment(_)));
    }
}
