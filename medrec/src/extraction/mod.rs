// Text Extraction Module
//
// Turns one input file into plain text, dispatching on the lower-cased file
// extension. Extraction never fails the run: unreadable or unsupported files
// come back as empty text with an `ExtractionStatus` explaining why.
//
// Main components:
// - extractors: one unit struct per document format
// - ocr: the OcrEngine seam and its tesseract/pdftoppm implementation

pub mod extractors;
pub mod ocr;

pub use extractors::{DocxExtractor, PdfExtractor, TxtExtractor, XlsxExtractor};
pub use ocr::{OcrEngine, TesseractCli};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use extractors::pdf::join_pages;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    #[default]
    Extracted,
    /// The format is supported but yielded no text.
    Empty,
    /// A PDF with neither a text layer nor OCR-able pages.
    NoTextLayer,
    Unsupported,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub status: ExtractionStatus,
}

impl Extraction {
    pub fn extracted(text: String) -> Self {
        Self {
            text,
            status: ExtractionStatus::Extracted,
        }
    }

    pub fn without_text(status: ExtractionStatus) -> Self {
        Self {
            text: String::new(),
            status,
        }
    }

    fn from_text(text: String) -> Self {
        if text.trim().is_empty() {
            Self::without_text(ExtractionStatus::Empty)
        } else {
            Self::extracted(text)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Txt,
    Pdf,
    Image,
    Docx,
    Xlsx,
    Unsupported,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "txt" => DocumentFormat::Txt,
            "pdf" => DocumentFormat::Pdf,
            "png" | "jpg" | "jpeg" | "tiff" | "tif" => DocumentFormat::Image,
            "docx" => DocumentFormat::Docx,
            "xlsx" => DocumentFormat::Xlsx,
            _ => DocumentFormat::Unsupported,
        }
    }
}

/// Format-polymorphic extractor with a pluggable OCR engine.
pub struct TextExtractor {
    ocr: Box<dyn OcrEngine>,
    ocr_language: String,
}

impl TextExtractor {
    pub fn from_config(config: &Config) -> Self {
        Self::with_engine(
            Box::new(TesseractCli::from_settings(&config.ocr)),
            config.ocr_language.clone(),
        )
    }

    pub fn with_engine(ocr: Box<dyn OcrEngine>, ocr_language: impl Into<String>) -> Self {
        Self {
            ocr,
            ocr_language: ocr_language.into(),
        }
    }

    pub fn extract(&self, path: &Path) -> Extraction {
        let format = DocumentFormat::from_path(path);
        tracing::info!(file = %path.display(), ?format, "Extracting text");

        let result = match format {
            DocumentFormat::Txt => TxtExtractor::extract(path),
            DocumentFormat::Docx => DocxExtractor::extract(path),
            DocumentFormat::Xlsx => XlsxExtractor::extract(path),
            DocumentFormat::Image => self.ocr.ocr_image(path, &self.ocr_language),
            DocumentFormat::Pdf => return self.extract_pdf(path),
            DocumentFormat::Unsupported => {
                tracing::warn!(file = %path.display(), "Unsupported file type");
                return Extraction::without_text(ExtractionStatus::Unsupported);
            }
        };

        match result {
            Ok(text) => {
                let extraction = Extraction::from_text(text);
                if extraction.is_empty() {
                    tracing::warn!(file = %path.display(), "No text extracted");
                }
                extraction
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Text extraction failed");
                Extraction::without_text(ExtractionStatus::Failed)
            }
        }
    }

    fn extract_pdf(&self, path: &Path) -> Extraction {
        let layer = match PdfExtractor::text_layer_pages(path) {
            Ok(pages) => pages,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "PDF text layer extraction failed, attempting OCR");
                Vec::new()
            }
        };
        let layer_text = join_pages(&layer);
        let blank_pages = layer.iter().filter(|page| page.trim().is_empty()).count();

        if !layer_text.trim().is_empty() && blank_pages == 0 {
            return Extraction::extracted(layer_text);
        }
        if layer_text.trim().is_empty() {
            tracing::info!(file = %path.display(), "No text layer in PDF, attempting OCR");
        } else {
            tracing::info!(file = %path.display(), blank_pages, "Some PDF pages have no text layer, attempting OCR on them");
        }

        match PdfExtractor::ocr_missing_pages(path, &layer, self.ocr.as_ref(), &self.ocr_language) {
            Ok(text) if !text.trim().is_empty() => Extraction::extracted(text),
            Ok(_) => {
                tracing::warn!(file = %path.display(), "No text could be extracted from the PDF using either method");
                Extraction::without_text(ExtractionStatus::NoTextLayer)
            }
            Err(e) if !layer_text.trim().is_empty() => {
                tracing::warn!(file = %path.display(), error = %e, "OCR processing failed, keeping the text layer");
                Extraction::extracted(layer_text)
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "OCR processing failed");
                Extraction::without_text(ExtractionStatus::NoTextLayer)
            }
        }
    }
}
