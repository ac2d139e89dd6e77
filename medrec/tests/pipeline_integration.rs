// Integration tests for the record pipeline, driven by a scripted analyzer
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use tempfile::TempDir;

use medrec::analysis::{AnalysisRequest, AnalysisService, Answers, ANALYSIS_QUESTION, SUMMARY_QUESTION};
use medrec::checksum::ChecksumStore;
use medrec::export::{default_sinks, read_csv_records, write_all};
use medrec::extraction::{ExtractionStatus, OcrEngine, TextExtractor};
use medrec::pipeline::clean_output;
use medrec::{Config, RecordPipeline, RunOutcome};

const LAB_TEXT: &str = "Lab result dated 07/12/2022, Dr. Smith, Cardiology";

const LAB_ANSWER: &str = r#"{
    "summary": "Routine lipid panel",
    "visit_type": "Lab Test",
    "provider": {"name": "Dr. John Smith", "facility": "Cardiology Dept"},
    "primary_condition": "Hyperlipidemia",
    "diagnoses": ["Hyperlipidemia"],
    "medications": [{"name": "Atorvastatin", "dosage": "20 mg"}],
    "test_results": {"name": "LDL", "value": "160 mg/dL", "interpretation": "High"},
    "treatment_date": "2022-12-08"
}"#;

/// Answers per-record questions with one canned answer and counts calls.
struct ScriptedAnalyzer {
    record_answer: String,
    summary_answer: String,
    /// Deleted on every call, to make the later copy fail.
    remove_on_ask: Option<PathBuf>,
    calls: RefCell<Vec<(Option<String>, Option<PathBuf>)>>,
}

impl ScriptedAnalyzer {
    fn new(record_answer: &str) -> Self {
        Self {
            record_answer: record_answer.to_string(),
            summary_answer: r#"{"patient": {"description": "Adult patient"}, "medical_history": "Stable"}"#
                .to_string(),
            remove_on_ask: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl AnalysisService for ScriptedAnalyzer {
    fn ask(&self, request: &AnalysisRequest<'_>) -> Result<Answers> {
        self.calls.borrow_mut().push((
            request.text.map(str::to_string),
            request.attachment.map(Path::to_path_buf),
        ));
        if let Some(path) = &self.remove_on_ask {
            let _ = fs::remove_file(path);
        }

        let mut answers = Answers::new();
        for question in request.questions {
            let answer = if question == ANALYSIS_QUESTION {
                self.record_answer.clone()
            } else if question == SUMMARY_QUESTION {
                self.summary_answer.clone()
            } else {
                bail!("unexpected question: {}", question);
            };
            answers.insert(question.clone(), answer);
        }
        Ok(answers)
    }
}

/// OCR is never available in these tests.
struct NoOcr;

impl OcrEngine for NoOcr {
    fn ocr_image(&self, _image: &Path, _language: &str) -> Result<String> {
        bail!("OCR disabled")
    }

    fn rasterize_pdf(&self, _pdf: &Path, _out_dir: &Path) -> Result<Vec<PathBuf>> {
        bail!("OCR disabled")
    }
}

struct Workspace {
    _temp_dir: TempDir,
    scans: PathBuf,
    config: Config,
}

impl Workspace {
    fn new(extra_toml: &str) -> Self {
        Self::with_skip(true, extra_toml)
    }

    fn with_skip(skip_processed_files: bool, extra_toml: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let scans = temp_dir.path().join("scans");
        let output = temp_dir.path().join("output");
        fs::create_dir_all(&scans).unwrap();

        let toml_str = format!(
            "scans_location = '{}'\noutput_location = '{}'\nskip_processed_files = {}\n{}",
            scans.display(),
            output.display(),
            skip_processed_files,
            extra_toml
        );
        let config = Config::from_toml_str(&toml_str).unwrap();

        Self {
            _temp_dir: temp_dir,
            scans,
            config,
        }
    }

    fn run(&self, analyzer: &ScriptedAnalyzer, now: NaiveDateTime) -> RunOutcome {
        let extractor = TextExtractor::with_engine(Box::new(NoOcr), "eng");
        let outcome = RecordPipeline::new(&self.config, extractor, analyzer)
            .run_at(now)
            .unwrap();
        write_all(&default_sinks(&self.config), &outcome).unwrap();
        outcome
    }

    fn record_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.config.records_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}

fn first_run_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

#[test]
fn test_text_record_end_to_end() {
    let workspace = Workspace::new("");
    fs::write(workspace.scans.join("lab.txt"), LAB_TEXT).unwrap();

    let analyzer = ScriptedAnalyzer::new(LAB_ANSWER);
    let outcome = workspace.run(&analyzer, first_run_time());

    assert_eq!(outcome.examined, 1);
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.records.len(), 1);

    let record = &outcome.records[0];
    // The regex date wins over the AI date.
    assert_eq!(record.treatment_date.as_deref(), Some("2022-12-07"));
    assert_eq!(record.ai_treatment_date.as_deref(), Some("2022-12-08"));
    assert_eq!(record.medications, vec!["Atorvastatin (20 mg)".to_string()]);
    assert_eq!(record.test_results, vec!["LDL: 160 mg/dL - High".to_string()]);
    assert_eq!(
        record.new_filename.as_deref(),
        Some("2022-12-07_lab_test_smith_001.txt")
    );

    assert_eq!(workspace.record_files(), vec!["2022-12-07_lab_test_smith_001.txt"]);
    let copied = fs::read_to_string(workspace.config.records_dir().join("2022-12-07_lab_test_smith_001.txt")).unwrap();
    assert_eq!(copied, LAB_TEXT);
    // Copied, not moved.
    assert!(workspace.scans.join("lab.txt").exists());

    let store = ChecksumStore::load(workspace.config.checksums_file());
    let entry = store.get(&record.checksum).unwrap();
    assert_eq!(entry.original_file, "lab.txt");
    assert_eq!(entry.processed_date.as_deref(), Some("2024-03-01 10:00:00"));
    assert_eq!(
        entry.processed_file.as_deref(),
        Some("2022-12-07_lab_test_smith_001.txt")
    );

    assert!(workspace.config.csv_file().exists());
    assert!(workspace.config.records_json_file().exists());
    assert!(workspace.config.output_html_path().exists());
}

#[test]
fn test_rerun_skips_fresh_checksums() {
    let workspace = Workspace::new("");
    fs::write(workspace.scans.join("lab.txt"), LAB_TEXT).unwrap();

    let first = ScriptedAnalyzer::new(LAB_ANSWER);
    workspace.run(&first, first_run_time());

    let second = ScriptedAnalyzer::new(LAB_ANSWER);
    let outcome = workspace.run(&second, first_run_time() + Duration::days(30));

    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.processed, 0);
    assert_eq!(second.call_count(), 0);
    assert_eq!(workspace.record_files().len(), 1);

    // The previous record is carried forward from the CSV export.
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(
        outcome.records[0].new_filename.as_deref(),
        Some("2022-12-07_lab_test_smith_001.txt")
    );
    assert_eq!(read_csv_records(workspace.config.csv_file()).unwrap().len(), 1);
}

#[test]
fn test_stale_checksum_is_reprocessed_in_place() {
    let workspace = Workspace::new("");
    fs::write(workspace.scans.join("lab.txt"), LAB_TEXT).unwrap();

    workspace.run(&ScriptedAnalyzer::new(LAB_ANSWER), first_run_time());

    let later = first_run_time() + Duration::days(180);
    let analyzer = ScriptedAnalyzer::new(LAB_ANSWER);
    let outcome = workspace.run(&analyzer, later);

    assert_eq!(outcome.processed, 1);
    assert_eq!(analyzer.call_count(), 1);
    // Same checksum: the old row is replaced, not duplicated.
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(
        workspace.record_files(),
        vec![
            "2022-12-07_lab_test_smith_001.txt",
            "2022-12-07_lab_test_smith_002.txt"
        ]
    );

    let store = ChecksumStore::load(workspace.config.checksums_file());
    assert_eq!(store.len(), 1);
}

#[test]
fn test_changed_bytes_become_a_new_record() {
    let workspace = Workspace::new("");
    let path = workspace.scans.join("lab.txt");
    fs::write(&path, LAB_TEXT).unwrap();
    workspace.run(&ScriptedAnalyzer::new(LAB_ANSWER), first_run_time());

    fs::write(&path, format!("{}\nAddendum: repeat in 3 months", LAB_TEXT)).unwrap();
    let outcome = workspace.run(
        &ScriptedAnalyzer::new(LAB_ANSWER),
        first_run_time() + Duration::days(1),
    );

    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.records.len(), 2);
    assert_ne!(outcome.records[0].checksum, outcome.records[1].checksum);
    assert_eq!(
        outcome.records[1].new_filename.as_deref(),
        Some("2022-12-07_lab_test_smith_002.txt")
    );
    assert_eq!(ChecksumStore::load(workspace.config.checksums_file()).len(), 2);
}

#[test]
fn test_malformed_answer_resets_ai_fields() {
    let workspace = Workspace::new("");
    fs::write(workspace.scans.join("lab.txt"), LAB_TEXT).unwrap();

    let analyzer = ScriptedAnalyzer::new("API request failed with status code 500: upstream error");
    let outcome = workspace.run(&analyzer, first_run_time());

    let record = &outcome.records[0];
    assert!(record.visit_type.is_empty());
    assert!(record.provider_name.is_empty());
    assert!(record.ai_treatment_date.is_none());
    assert_eq!(record.treatment_date.as_deref(), Some("2022-12-07"));
    assert_eq!(
        record.new_filename.as_deref(),
        Some("2022-12-07_unknown_unknown_001.txt")
    );
}

#[test]
fn test_undated_record_uses_ai_date_then_today() {
    let workspace = Workspace::new("");
    fs::write(workspace.scans.join("a_note.txt"), "Follow-up call, no date").unwrap();
    fs::write(workspace.scans.join("b_note.txt"), "Another undated note").unwrap();

    let analyzer = ScriptedAnalyzer::new(r#"{"visit_type": "Phone", "treatment_date": ""}"#);
    let outcome = workspace.run(&analyzer, first_run_time());

    assert_eq!(outcome.records.len(), 2);
    assert!(outcome.records.iter().all(|r| r.treatment_date.is_none()));
    assert_eq!(
        workspace.record_files(),
        vec![
            "2024-03-01_phone_unknown_001.txt",
            "2024-03-01_phone_unknown_002.txt"
        ]
    );
}

#[test]
fn test_ai_date_is_normalized_before_naming() {
    let workspace = Workspace::new("");
    fs::write(workspace.scans.join("note.txt"), "Follow-up call, no date").unwrap();

    let analyzer = ScriptedAnalyzer::new(r#"{"visit_type": "Phone", "treatment_date": "12/07/2022"}"#);
    let outcome = workspace.run(&analyzer, first_run_time());

    assert_eq!(outcome.failed, 0);
    let record = &outcome.records[0];
    assert_eq!(record.treatment_date.as_deref(), Some("2022-07-12"));
    assert_eq!(record.ai_treatment_date.as_deref(), Some("12/07/2022"));
    assert_eq!(workspace.record_files(), vec!["2022-07-12_phone_unknown_001.txt"]);
}

#[test]
fn test_unreadable_ai_date_falls_back_to_today() {
    let workspace = Workspace::new("");
    fs::write(workspace.scans.join("note.txt"), "Follow-up call, no date").unwrap();

    let analyzer = ScriptedAnalyzer::new(r#"{"visit_type": "Phone", "treatment_date": "early spring"}"#);
    let outcome = workspace.run(&analyzer, first_run_time());

    assert!(outcome.records[0].treatment_date.is_none());
    assert_eq!(workspace.record_files(), vec!["2024-03-01_phone_unknown_001.txt"]);
}

#[test]
fn test_failed_copy_is_processed_again_next_run() {
    let workspace = Workspace::new("");
    let path = workspace.scans.join("lab.txt");
    fs::write(&path, LAB_TEXT).unwrap();

    // The source vanishes between extraction and the copy.
    let mut analyzer = ScriptedAnalyzer::new(LAB_ANSWER);
    analyzer.remove_on_ask = Some(path.clone());
    let outcome = workspace.run(&analyzer, first_run_time());

    assert_eq!(outcome.failed, 1);
    assert!(outcome.records[0].new_filename.is_none());
    assert!(workspace.record_files().is_empty());
    assert!(ChecksumStore::load(workspace.config.checksums_file()).is_empty());

    fs::write(&path, LAB_TEXT).unwrap();
    let outcome = workspace.run(
        &ScriptedAnalyzer::new(LAB_ANSWER),
        first_run_time() + Duration::days(1),
    );

    assert_eq!(outcome.skipped, 0);
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(workspace.record_files(), vec!["2022-12-07_lab_test_smith_001.txt"]);
    let store = ChecksumStore::load(workspace.config.checksums_file());
    assert_eq!(
        store.get(&outcome.records[0].checksum).unwrap().processed_file.as_deref(),
        Some("2022-12-07_lab_test_smith_001.txt")
    );
}

#[test]
fn test_without_skipping_every_run_starts_fresh() {
    let workspace = Workspace::with_skip(false, "");
    fs::write(workspace.scans.join("lab.txt"), LAB_TEXT).unwrap();

    workspace.run(&ScriptedAnalyzer::new(LAB_ANSWER), first_run_time());

    // Well inside the review interval, yet processed again.
    let analyzer = ScriptedAnalyzer::new(LAB_ANSWER);
    let outcome = workspace.run(&analyzer, first_run_time() + Duration::days(1));

    assert_eq!(outcome.skipped, 0);
    assert_eq!(outcome.processed, 1);
    assert_eq!(analyzer.call_count(), 1);
    assert_eq!(
        workspace.record_files(),
        vec![
            "2022-12-07_lab_test_smith_001.txt",
            "2022-12-07_lab_test_smith_002.txt"
        ]
    );

    // Earlier rows are not carried forward.
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(
        outcome.records[0].new_filename.as_deref(),
        Some("2022-12-07_lab_test_smith_002.txt")
    );
    let rows = read_csv_records(workspace.config.csv_file()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].last_processed, "2024-03-02 10:00:00");
}

#[test]
fn test_empty_and_unsupported_files_are_dropped() {
    let workspace = Workspace::new("");
    fs::write(workspace.scans.join("blank.txt"), "   ").unwrap();
    fs::write(workspace.scans.join("legacy.xls"), b"\xD0\xCF\x11\xE0").unwrap();
    fs::write(workspace.scans.join(".hidden.txt"), LAB_TEXT).unwrap();

    let analyzer = ScriptedAnalyzer::new(LAB_ANSWER);
    let outcome = workspace.run(&analyzer, first_run_time());

    assert_eq!(outcome.examined, 2);
    assert_eq!(outcome.dropped, 2);
    assert!(outcome.records.is_empty());
    assert_eq!(analyzer.call_count(), 0);
    assert!(ChecksumStore::load(workspace.config.checksums_file()).is_empty());
}

#[test]
fn test_scanned_pdf_is_sent_as_attachment() {
    let workspace = Workspace::new("");
    let pdf = workspace.scans.join("scan.pdf");
    fs::write(&pdf, b"%PDF-1.4 not a real document").unwrap();

    let analyzer = ScriptedAnalyzer::new(
        r#"{"visit_type": "Radiology", "provider": {"name": "Dr. Verdi"}, "treatment_date": "2023-03-03"}"#,
    );
    let outcome = workspace.run(&analyzer, first_run_time());

    let record = &outcome.records[0];
    assert_eq!(record.extraction_status, ExtractionStatus::NoTextLayer);
    assert_eq!(record.treatment_date.as_deref(), Some("2023-03-03"));
    assert_eq!(
        record.new_filename.as_deref(),
        Some("2023-03-03_radiology_verdi_001.pdf")
    );

    let calls = analyzer.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.is_none());
    assert_eq!(calls[0].1.as_deref(), Some(pdf.as_path()));
}

#[test]
fn test_overall_summary_is_prepended() {
    let workspace = Workspace::new("\n[ai_overall_summary]\nmodel_name = \"gpt-4o-mini\"\n");
    fs::write(workspace.scans.join("lab.txt"), LAB_TEXT).unwrap();

    let analyzer = ScriptedAnalyzer::new(LAB_ANSWER);
    let outcome = workspace.run(&analyzer, first_run_time());

    assert_eq!(analyzer.call_count(), 2);
    assert_eq!(outcome.records.len(), 2);
    assert!(outcome.records[0].is_overall_summary());
    assert_eq!(outcome.records[0].treatment_date.as_deref(), Some("2024-03-01"));
    assert_eq!(
        outcome.overall_summary.as_ref().unwrap()["medical_history"],
        "Stable"
    );
    assert!(workspace.config.overall_summary_file().exists());

    // The summary history is built from the analyzed record.
    let calls = analyzer.calls.borrow();
    let history = calls[1].0.as_deref().unwrap();
    assert!(history.contains("Date: 2022-12-07"));
    assert!(history.contains("Medications: Atorvastatin (20 mg)"));

    // Summary rows are not reloaded as previous records.
    drop(calls);
    let rerun = workspace.run(
        &ScriptedAnalyzer::new(LAB_ANSWER),
        first_run_time() + Duration::days(1),
    );
    assert_eq!(rerun.records.len(), 2);
    assert_eq!(
        rerun.records.iter().filter(|r| r.is_overall_summary()).count(),
        1
    );
}

#[test]
fn test_failed_summary_stores_fallback() {
    let workspace = Workspace::new("\n[ai_overall_summary]\nmodel_name = \"gpt-4o-mini\"\n");
    fs::write(workspace.scans.join("lab.txt"), LAB_TEXT).unwrap();

    let mut analyzer = ScriptedAnalyzer::new(LAB_ANSWER);
    analyzer.summary_answer = "not json".to_string();
    let outcome = workspace.run(&analyzer, first_run_time());

    let summary = outcome.overall_summary.unwrap();
    assert_eq!(summary["medical_history"], "Error generating medical history summary");
}

#[test]
fn test_clean_output_removes_previous_run() {
    let workspace = Workspace::new("");
    fs::write(workspace.scans.join("lab.txt"), LAB_TEXT).unwrap();
    workspace.run(&ScriptedAnalyzer::new(LAB_ANSWER), first_run_time());

    clean_output(&workspace.config).unwrap();
    assert!(!workspace.config.records_dir().exists());
    assert!(!workspace.config.checksums_file().exists());
    assert!(!workspace.config.output_html_path().exists());

    // Without the store, the same file is processed again from sequence 001.
    let analyzer = ScriptedAnalyzer::new(LAB_ANSWER);
    let outcome = workspace.run(&analyzer, first_run_time() + Duration::days(1));
    assert_eq!(outcome.processed, 1);
    assert_eq!(workspace.record_files(), vec!["2022-12-07_lab_test_smith_001.txt"]);
}
