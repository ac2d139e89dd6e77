// Structured analysis of record text by an external language model

pub mod client;
pub mod response;

pub use client::{AnalysisRequest, AnalysisService, Answers, OpenAiClient};
pub use response::{Medication, Patient, Provider, RecordAnalysis, TestResult};

/// Question asked once per record.
pub const ANALYSIS_QUESTION: &str = "Analyze this medical record and provide structured information including a summary of the visit/examination.";

/// Question asked once per run over the condensed history.
pub const SUMMARY_QUESTION: &str =
    "Generate a comprehensive medical history summary based on all visits and records.";
