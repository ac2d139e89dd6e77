// PDF extraction: text layer first, OCR over rasterized pages as fallback

use std::fs;
use std::panic;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::extraction::ocr::OcrEngine;

pub struct PdfExtractor;

impl PdfExtractor {
    /// Text layer of each page, in page order. pdf-extract parses the whole
    /// document up front, so a structural error fails every page at once.
    pub fn text_layer_pages(pdf_path: impl AsRef<Path>) -> Result<Vec<String>> {
        let pdf_path = pdf_path.as_ref();
        let bytes = fs::read(pdf_path)
            .with_context(|| format!("Failed to read PDF file: {}", pdf_path.display()))?;

        // pdf-extract panics on some malformed files.
        let pages = panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(&bytes))
            .map_err(|_| anyhow!("PDF parser panicked on {}", pdf_path.display()))?
            .map_err(|e| anyhow!("Failed to extract text from PDF {}: {}", pdf_path.display(), e))?;

        for (index, page) in pages.iter().enumerate() {
            tracing::debug!(page = index + 1, chars = page.len(), "Extracted PDF page text");
        }
        Ok(pages)
    }

    /// OCR every page whose text layer is blank. Pages with text keep it.
    /// A page that fails OCR is logged and skipped.
    pub fn ocr_missing_pages(
        pdf_path: impl AsRef<Path>,
        layer: &[String],
        ocr: &dyn OcrEngine,
        language: &str,
    ) -> Result<String> {
        let pdf_path = pdf_path.as_ref();
        let scratch = tempfile::tempdir()?;
        let images = ocr.rasterize_pdf(pdf_path, scratch.path())?;

        let mut text = String::new();
        for index in 0..images.len().max(layer.len()) {
            let existing = layer.get(index).map(|page| page.trim()).unwrap_or_default();
            if !existing.is_empty() {
                text.push_str(existing);
                text.push('\n');
                continue;
            }
            let Some(image) = images.get(index) else {
                continue;
            };

            tracing::info!(page = index + 1, "Processing page with OCR");
            match ocr.ocr_image(image, language) {
                Ok(page_text) if !page_text.trim().is_empty() => {
                    text.push_str(page_text.trim());
                    text.push('\n');
                }
                Ok(_) => tracing::warn!(page = index + 1, "No text extracted from page"),
                Err(e) => tracing::error!(page = index + 1, error = %e, "Error during OCR on page"),
            }
        }
        Ok(text)
    }
}

/// Non-blank pages joined by newlines.
pub fn join_pages(pages: &[String]) -> String {
    let mut text = String::new();
    for page in pages.iter().map(|page| page.trim()).filter(|page| !page.is_empty()) {
        text.push_str(page);
        text.push('\n');
    }
    text
}
