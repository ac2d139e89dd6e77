// OCR seam: tesseract for images, pdftoppm to rasterize scanned PDFs

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

use crate::config::OcrSettings;

pub trait OcrEngine: Send + Sync {
    /// Recognize text in one image.
    fn ocr_image(&self, image: &Path, language: &str) -> Result<String>;

    /// Render every page of `pdf` into `out_dir`, returning images in page order.
    fn rasterize_pdf(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Shells out to the `tesseract` and `pdftoppm` binaries.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    tesseract_path: PathBuf,
    pdftoppm_path: PathBuf,
    dpi: u32,
}

impl TesseractCli {
    pub fn from_settings(settings: &OcrSettings) -> Self {
        Self {
            tesseract_path: settings.tesseract_path.clone(),
            pdftoppm_path: settings.pdftoppm_path.clone(),
            dpi: settings.dpi,
        }
    }
}

impl OcrEngine for TesseractCli {
    fn ocr_image(&self, image: &Path, language: &str) -> Result<String> {
        let output = Command::new(&self.tesseract_path)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .output()
            .with_context(|| format!("Failed to run {}", self.tesseract_path.display()))?;

        if !output.status.success() {
            bail!(
                "tesseract failed on {}: {}",
                image.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn rasterize_pdf(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let output = Command::new(&self.pdftoppm_path)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(pdf)
            .arg(out_dir.join("page"))
            .output()
            .with_context(|| format!("Failed to run {}", self.pdftoppm_path.display()))?;

        if !output.status.success() {
            bail!(
                "pdftoppm failed on {}: {}",
                pdf.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        // pdftoppm zero-pads page numbers, so name order is page order.
        let mut pages: Vec<PathBuf> = fs::read_dir(out_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map(|ext| ext == "png").unwrap_or(false))
            .collect();
        pages.sort();
        tracing::info!(pdf = %pdf.display(), pages = pages.len(), "Converted PDF to images");
        Ok(pages)
    }
}
