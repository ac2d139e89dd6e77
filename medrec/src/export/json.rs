// Records JSON export

use std::path::PathBuf;

use anyhow::Result;
use serde_json::Value;

use super::ExportSink;
use crate::record::FileRecord;
use crate::utils::save_json;

pub struct JsonSink {
    path: PathBuf,
}

impl JsonSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ExportSink for JsonSink {
    fn name(&self) -> &'static str {
        "json"
    }

    fn write(&self, records: &[FileRecord], _overall_summary: Option<&Value>) -> Result<()> {
        save_json(&records, &self.path, true)
    }
}
