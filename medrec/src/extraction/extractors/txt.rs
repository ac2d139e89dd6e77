// Plain text extractor
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub struct TxtExtractor;

impl TxtExtractor {
    /// Read a text file, replacing invalid UTF-8 rather than failing.
    pub fn extract(txt_path: impl AsRef<Path>) -> Result<String> {
        let txt_path = txt_path.as_ref();
        let bytes = fs::read(txt_path)
            .with_context(|| format!("Failed to read text file: {}", txt_path.display()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
