// DOCX extractor
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

use super::xml_unescape;

static PARAGRAPH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<w:p[ >].*?</w:p>").unwrap());
static TEXT_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<w:t(?:\s[^>]*)?>([^<]*)</w:t>").unwrap());

pub struct DocxExtractor;

impl DocxExtractor {
    /// Extract text from a DOCX file, one paragraph per line.
    ///
    /// DOCX files are ZIP archives containing XML files.
    /// The main content is in word/document.xml
    pub fn extract(docx_path: impl AsRef<Path>) -> Result<String> {
        let docx_path = docx_path.as_ref();

        let file = File::open(docx_path)
            .with_context(|| format!("Failed to open DOCX file: {}", docx_path.display()))?;

        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("Failed to read DOCX as ZIP: {}", docx_path.display()))?;

        let mut document_xml = archive
            .by_name("word/document.xml")
            .map_err(|_| anyhow::anyhow!("Invalid DOCX file: word/document.xml not found"))?;
        let mut xml_content = String::new();
        document_xml.read_to_string(&mut xml_content)?;

        Ok(Self::extract_text_from_xml(&xml_content))
    }

    /// Concatenate the `<w:t>` runs of each `<w:p>` paragraph.
    fn extract_text_from_xml(xml: &str) -> String {
        PARAGRAPH
            .find_iter(xml)
            .map(|paragraph| {
                TEXT_RUN
                    .captures_iter(paragraph.as_str())
                    .map(|caps| xml_unescape(&caps[1]))
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
