// Export sinks: CSV table, records JSON and a one-page HTML viewer

pub mod csv;
pub mod html;
pub mod json;

pub use self::csv::{read_csv_records, CsvSink};
pub use html::HtmlSink;
pub use json::JsonSink;

use anyhow::Result;
use serde_json::Value;

use crate::config::Config;
use crate::pipeline::RunOutcome;
use crate::record::FileRecord;

/// Destination for the final record collection of a run.
pub trait ExportSink {
    fn name(&self) -> &'static str;

    fn write(&self, records: &[FileRecord], overall_summary: Option<&Value>) -> Result<()>;
}

/// The sinks every run writes to, in order.
pub fn default_sinks(config: &Config) -> Vec<Box<dyn ExportSink>> {
    vec![
        Box::new(CsvSink::new(config.csv_file())),
        Box::new(JsonSink::new(config.records_json_file())),
        Box::new(HtmlSink::new(config.output_html_path())),
    ]
}

/// Write `outcome` to every sink, stopping at the first failure.
pub fn write_all(sinks: &[Box<dyn ExportSink>], outcome: &RunOutcome) -> Result<()> {
    for sink in sinks {
        sink.write(&outcome.records, outcome.overall_summary.as_ref())?;
        tracing::info!(sink = sink.name(), records = outcome.records.len(), "Exported records");
    }
    Ok(())
}
