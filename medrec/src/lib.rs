// medrec: incremental ingestion of scanned medical records

// Fatal-to-run error type. Per-item and per-page failures never surface here;
// they are logged and replaced by defaults inside the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Filename template error: {0}")]
    Template(#[from] naming::TemplateError),
    #[error("OpenAI API key is not set (use OPENAI_API_KEY or `openai_api_key` in the config)")]
    MissingApiKey,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub mod analysis;
pub mod checksum;
pub mod config;
pub mod dates;
pub mod export;
pub mod extraction;
pub mod logging;
pub mod naming;
pub mod pipeline;
pub mod record;
pub mod utils;

pub use config::Config;
pub use pipeline::{RecordPipeline, RunOutcome};
pub use record::FileRecord;
