// Record data model shared by the pipeline and the export sinks

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::analysis::RecordAnalysis;
use crate::dates::DateResolver;
use crate::extraction::{Extraction, ExtractionStatus};

/// Timestamp layout used for `last_processed` and the checksum store.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Visit type of the synthetic record that carries the overall summary.
pub const OVERALL_SUMMARY_VISIT_TYPE: &str = "Overall Summary";

/// One input document plus everything derived from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub source_path: PathBuf,
    pub original_filename: String,
    pub checksum: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub extraction_status: ExtractionStatus,

    /// Date found in the text by the regex resolver, or the AI date when the
    /// text had none. Always `YYYY-MM-DD` when set.
    pub treatment_date: Option<String>,
    pub ai_treatment_date: Option<String>,

    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub visit_type: String,
    #[serde(default)]
    pub provider_name: String,
    #[serde(default)]
    pub provider_facility: String,
    #[serde(default)]
    pub primary_condition: String,
    #[serde(default)]
    pub diagnoses: Vec<String>,
    #[serde(default)]
    pub treatments: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub test_results: Vec<String>,

    #[serde(default)]
    pub patient_first_name: String,
    #[serde(default)]
    pub patient_middle_name: String,
    #[serde(default)]
    pub patient_last_name: String,

    pub last_processed: String,
    pub new_filename: Option<String>,
    pub output_path: Option<PathBuf>,
}

impl FileRecord {
    /// Create a record for a freshly extracted file.
    pub fn new(
        source_path: &Path,
        checksum: String,
        extraction: Extraction,
        processed_at: NaiveDateTime,
    ) -> Self {
        let original_filename = source_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            source_path: source_path.to_path_buf(),
            original_filename,
            checksum,
            text: extraction.text,
            extraction_status: extraction.status,
            last_processed: processed_at.format(TIMESTAMP_FORMAT).to_string(),
            ..Default::default()
        }
    }

    /// Synthetic record pointing at the overall summary artifact.
    pub fn overall_summary(summary_path: &Path, today: &str) -> Self {
        let file_name = summary_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            source_path: summary_path.to_path_buf(),
            original_filename: file_name.clone(),
            treatment_date: Some(today.to_string()),
            visit_type: OVERALL_SUMMARY_VISIT_TYPE.to_string(),
            provider_name: "Medical Records System".to_string(),
            primary_condition: "Patient Summary Report".to_string(),
            summary: "Automatically generated summary of all medical records".to_string(),
            new_filename: Some(file_name),
            output_path: Some(summary_path.to_path_buf()),
            ..Default::default()
        }
    }

    pub fn is_overall_summary(&self) -> bool {
        self.visit_type == OVERALL_SUMMARY_VISIT_TYPE
    }

    /// Extension of the original file including the leading dot, or "".
    pub fn extension(&self) -> String {
        Path::new(&self.original_filename)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default()
    }

    /// Merge a structured analysis into the record.
    ///
    /// The regex date wins; the AI date only fills `treatment_date` when the
    /// text yielded nothing and the answer reads as a date. The raw answer is
    /// kept in `ai_treatment_date` either way.
    pub fn apply_analysis(&mut self, analysis: &RecordAnalysis, dates: &DateResolver) {
        self.copy_analysis_fields(analysis);

        let ai_date = analysis.treatment_date.trim();
        self.ai_treatment_date = (!ai_date.is_empty()).then(|| ai_date.to_string());
        if self.treatment_date.is_some() || ai_date.is_empty() {
            return;
        }
        match dates.normalize(ai_date) {
            Some(date) => {
                tracing::info!(file = %self.original_filename, %date, "Using AI-extracted date");
                self.treatment_date = Some(date.format("%Y-%m-%d").to_string());
            }
            None => {
                tracing::warn!(file = %self.original_filename, date = ai_date, "AI date is not a recognizable date, ignoring");
            }
        }
    }

    /// Drop every AI-derived field back to its default.
    pub fn reset_analysis(&mut self) {
        self.copy_analysis_fields(&RecordAnalysis::default());
        self.ai_treatment_date = None;
    }

    fn copy_analysis_fields(&mut self, analysis: &RecordAnalysis) {
        self.summary = analysis.summary.clone();
        self.visit_type = analysis.visit_type.clone();
        self.provider_name = analysis.provider.name.clone();
        self.provider_facility = analysis.provider.facility.clone();
        self.primary_condition = analysis.primary_condition.clone();
        self.diagnoses = analysis.diagnoses.clone();
        self.treatments = analysis.treatments.clone();
        self.medications = analysis.medication_lines();
        self.test_results = analysis.test_result_lines();
        self.patient_first_name = analysis.patient.first_name.clone();
        self.patient_middle_name = analysis.patient.middle_name.clone();
        self.patient_last_name = analysis.patient.last_name.clone();
    }
}
