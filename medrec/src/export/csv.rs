// CSV export, also read back to carry previous records into incremental runs

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ExportSink;
use crate::extraction::ExtractionStatus;
use crate::record::FileRecord;
use crate::utils::ensure_dir_exists;

const LIST_SEPARATOR: &str = "; ";

/// Flat CSV representation of a `FileRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CsvRow {
    original_filename: String,
    new_filename: String,
    treatment_date: String,
    ai_treatment_date: String,
    visit_type: String,
    provider_name: String,
    provider_facility: String,
    primary_condition: String,
    summary: String,
    diagnoses: String,
    treatments: String,
    medications: String,
    test_results: String,
    patient_first_name: String,
    patient_middle_name: String,
    patient_last_name: String,
    checksum: String,
    extraction_status: ExtractionStatus,
    last_processed: String,
    source_path: String,
    output_path: String,
    text: String,
}

impl From<&FileRecord> for CsvRow {
    fn from(record: &FileRecord) -> Self {
        Self {
            original_filename: record.original_filename.clone(),
            new_filename: record.new_filename.clone().unwrap_or_default(),
            treatment_date: record.treatment_date.clone().unwrap_or_default(),
            ai_treatment_date: record.ai_treatment_date.clone().unwrap_or_default(),
            visit_type: record.visit_type.clone(),
            provider_name: record.provider_name.clone(),
            provider_facility: record.provider_facility.clone(),
            primary_condition: record.primary_condition.clone(),
            summary: record.summary.clone(),
            diagnoses: record.diagnoses.join(LIST_SEPARATOR),
            treatments: record.treatments.join(LIST_SEPARATOR),
            medications: record.medications.join(LIST_SEPARATOR),
            test_results: record.test_results.join(LIST_SEPARATOR),
            patient_first_name: record.patient_first_name.clone(),
            patient_middle_name: record.patient_middle_name.clone(),
            patient_last_name: record.patient_last_name.clone(),
            checksum: record.checksum.clone(),
            extraction_status: record.extraction_status,
            last_processed: record.last_processed.clone(),
            source_path: record.source_path.to_string_lossy().to_string(),
            output_path: record
                .output_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            text: record.text.clone(),
        }
    }
}

impl CsvRow {
    fn into_record(self) -> FileRecord {
        FileRecord {
            source_path: PathBuf::from(self.source_path),
            original_filename: self.original_filename,
            checksum: self.checksum,
            text: self.text,
            extraction_status: self.extraction_status,
            treatment_date: non_empty(self.treatment_date),
            ai_treatment_date: non_empty(self.ai_treatment_date),
            summary: self.summary,
            visit_type: self.visit_type,
            provider_name: self.provider_name,
            provider_facility: self.provider_facility,
            primary_condition: self.primary_condition,
            diagnoses: split_list(&self.diagnoses),
            treatments: split_list(&self.treatments),
            medications: split_list(&self.medications),
            test_results: split_list(&self.test_results),
            patient_first_name: self.patient_first_name,
            patient_middle_name: self.patient_middle_name,
            patient_last_name: self.patient_last_name,
            last_processed: self.last_processed,
            new_filename: non_empty(self.new_filename),
            output_path: non_empty(self.output_path).map(PathBuf::from),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ExportSink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn write(&self, records: &[FileRecord], _overall_summary: Option<&Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir_exists(parent)?;
        }
        let mut writer = ::csv::Writer::from_path(&self.path)
            .with_context(|| format!("Failed to create CSV file: {}", self.path.display()))?;
        for record in records {
            writer.serialize(CsvRow::from(record))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Records from a previous run's CSV export. Rows that fail to parse are skipped.
pub fn read_csv_records(path: impl AsRef<Path>) -> Result<Vec<FileRecord>> {
    let path = path.as_ref();
    let mut reader = ::csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    let mut records = Vec::new();
    for (index, row) in reader.deserialize::<CsvRow>().enumerate() {
        match row {
            Ok(row) => records.push(row.into_record()),
            Err(e) => tracing::warn!(row = index + 1, error = %e, "Skipping unreadable CSV row"),
        }
    }
    Ok(records)
}
