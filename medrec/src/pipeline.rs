// medrec/src/pipeline.rs
//!
//! Record Pipeline: one incremental ingestion run over the scans directory.
//!
//! Per file: discover, checksum, skip-or-extract, analyze, name, copy. Every
//! stage after discovery is sequential and in discovery order, so sequence
//! numbers and the checksum store evolve deterministically.
//!
//! Failures local to one file (unreadable file, malformed analysis answer,
//! failed copy) are logged and absorbed. Failures that would corrupt the
//! bookkeeping (checksum store write, unreadable output directory) abort the
//! run with an [`Error`].

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{Local, NaiveDateTime};
use serde_json::{json, Value};

use crate::analysis::{
    AnalysisRequest, AnalysisService, RecordAnalysis, ANALYSIS_QUESTION, SUMMARY_QUESTION,
};
use crate::checksum::{checksum_file, ChecksumStore, SkipDecision};
use crate::config::{Config, ModelSettings};
use crate::dates::{DateResolver, FIRST_DATE_CUTOFF_YEAR};
use crate::export::read_csv_records;
use crate::extraction::{DocumentFormat, ExtractionStatus, TextExtractor};
use crate::naming::FilenameResolver;
use crate::record::FileRecord;
use crate::utils::{discover_files, ensure_dir_exists, save_json};
use crate::Error;

/// Progress notifications for interactive front ends.
#[derive(Debug, Clone, Copy)]
pub enum PipelineEvent<'a> {
    FilesFound { count: usize },
    Skipping { file: &'a Path, days_since: i64 },
    Processing { file: &'a Path, decision: SkipDecision },
    Dropped { file: &'a Path, status: ExtractionStatus },
    Analyzing { file: &'a Path },
    Renamed { file: &'a Path, new_name: &'a str },
    CopyFailed { file: &'a Path },
    SummaryGenerated,
}

pub trait ProgressReporter {
    fn report(&self, event: PipelineEvent<'_>);
}

/// Reports nothing; the default for library callers and tests.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn report(&self, _event: PipelineEvent<'_>) {}
}

/// Result of one run.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Previous records (incremental runs) followed by this run's records,
    /// preceded by the overall-summary record when one was generated.
    pub records: Vec<FileRecord>,
    pub examined: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub failed: usize,
    pub processed: usize,
    pub overall_summary: Option<Value>,
}

pub struct RecordPipeline<'a> {
    config: &'a Config,
    extractor: TextExtractor,
    analyzer: &'a dyn AnalysisService,
    date_resolver: DateResolver,
    progress: Box<dyn ProgressReporter + 'a>,
}

impl<'a> RecordPipeline<'a> {
    pub fn new(config: &'a Config, extractor: TextExtractor, analyzer: &'a dyn AnalysisService) -> Self {
        Self {
            config,
            extractor,
            analyzer,
            date_resolver: DateResolver::first_date_after(FIRST_DATE_CUTOFF_YEAR),
            progress: Box::new(SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: impl ProgressReporter + 'a) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn with_date_resolver(mut self, date_resolver: DateResolver) -> Self {
        self.date_resolver = date_resolver;
        self
    }

    pub fn run(&self) -> Result<RunOutcome, Error> {
        self.run_at(Local::now().naive_local())
    }

    /// Run with an explicit clock; `now` stamps the checksum store and
    /// substitutes for missing treatment dates.
    pub fn run_at(&self, now: NaiveDateTime) -> Result<RunOutcome, Error> {
        let config = self.config;
        ensure_dir_exists(&config.scans_location)?;
        ensure_dir_exists(&config.output_location)?;
        ensure_dir_exists(config.records_dir())?;
        ensure_dir_exists(config.data_files_dir())?;

        let mut outcome = RunOutcome::default();
        let previous = self.load_previous_records();
        let mut store = ChecksumStore::load(config.checksums_file());

        let files = discover_files(&config.scans_location)?;
        tracing::info!(count = files.len(), "Found files to process");
        self.progress.report(PipelineEvent::FilesFound { count: files.len() });

        let mut new_records = Vec::new();
        for path in &files {
            outcome.examined += 1;
            if let Some(record) = self.ingest(path, now, &mut store, &mut outcome)? {
                new_records.push(record);
            }
        }

        for record in &mut new_records {
            self.progress.report(PipelineEvent::Analyzing { file: &record.source_path });
            self.analyze(record);
        }

        let today = now.format("%Y-%m-%d").to_string();
        let mut resolver = FilenameResolver::new(config.filename_template()?, config.records_dir());
        for record in &mut new_records {
            let name = resolver.resolve(record, &today)?;
            self.persist(record, &name, &mut store, &mut outcome)?;
        }
        outcome.processed = new_records.len();

        // A reprocessed checksum replaces its previous row.
        let fresh: HashSet<&str> = new_records.iter().map(|r| r.checksum.as_str()).collect();
        let mut records: Vec<FileRecord> = previous
            .into_iter()
            .filter(|r| !fresh.contains(r.checksum.as_str()))
            .collect();
        records.extend(new_records);

        if let Some(settings) = &config.ai_overall_summary {
            if !records.is_empty() {
                let summary = self.generate_overall_summary(&records, settings);
                let summary_path = config.overall_summary_file();
                save_json(&summary, &summary_path, true)?;
                records.insert(0, FileRecord::overall_summary(&summary_path, &today));
                outcome.overall_summary = Some(summary);
                self.progress.report(PipelineEvent::SummaryGenerated);
            }
        }

        outcome.records = records;
        tracing::info!(
            examined = outcome.examined,
            processed = outcome.processed,
            skipped = outcome.skipped,
            dropped = outcome.dropped,
            failed = outcome.failed,
            "Run complete"
        );
        Ok(outcome)
    }

    fn load_previous_records(&self) -> Vec<FileRecord> {
        let csv_path = self.config.csv_file();
        if !self.config.skip_processed_files || !csv_path.exists() {
            return Vec::new();
        }
        match read_csv_records(&csv_path) {
            Ok(records) => {
                let records: Vec<FileRecord> = records
                    .into_iter()
                    .filter(|r| !r.is_overall_summary())
                    .collect();
                tracing::info!(count = records.len(), "Loaded existing records");
                records
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not load existing records, starting fresh");
                Vec::new()
            }
        }
    }

    /// Checksum, skip check and extraction for one discovered file.
    fn ingest(
        &self,
        path: &Path,
        now: NaiveDateTime,
        store: &mut ChecksumStore,
        outcome: &mut RunOutcome,
    ) -> Result<Option<FileRecord>, Error> {
        let checksum = match checksum_file(path) {
            Ok(checksum) => checksum,
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "Failed to checksum file");
                outcome.failed += 1;
                return Ok(None);
            }
        };

        let decision = store.decide(&checksum, now, self.config.skip_process_review_interval);
        if self.config.skip_processed_files {
            if let SkipDecision::Skip { days_since } = decision {
                tracing::info!(file = %path.display(), days_since, "Skipping recently processed file");
                self.progress.report(PipelineEvent::Skipping { file: path, days_since });
                outcome.skipped += 1;
                return Ok(None);
            }
        }
        self.progress.report(PipelineEvent::Processing { file: path, decision });

        let extraction = self.extractor.extract(path);
        let keep_raw = extraction.status == ExtractionStatus::NoTextLayer
            && DocumentFormat::from_path(path) == DocumentFormat::Pdf;
        if extraction.is_empty() && !keep_raw {
            tracing::warn!(file = %path.display(), status = ?extraction.status, "No text extracted, dropping file");
            self.progress.report(PipelineEvent::Dropped { file: path, status: extraction.status });
            outcome.dropped += 1;
            return Ok(None);
        }

        let mut record = FileRecord::new(path, checksum, extraction, now);
        store.record_processed(&record.checksum, &record.original_filename, now);
        store.save()?;

        record.treatment_date = self.date_resolver.resolve(&record.text);
        Ok(Some(record))
    }

    /// Ask the analysis service about one record and merge the answer.
    fn analyze(&self, record: &mut FileRecord) {
        let questions = [ANALYSIS_QUESTION.to_string()];
        let settings = &self.config.ai_processing;
        let request = if record.extraction_status == ExtractionStatus::NoTextLayer {
            AnalysisRequest::for_file(&record.source_path, &questions, settings)
        } else {
            AnalysisRequest::for_text(&record.text, &questions, settings)
        };

        let answer = match self.analyzer.ask(&request) {
            Ok(mut answers) => answers.remove(ANALYSIS_QUESTION),
            Err(e) => {
                tracing::error!(file = %record.original_filename, error = %e, "Analysis request failed");
                None
            }
        };

        match answer.as_deref().map(RecordAnalysis::parse) {
            Some(Ok(analysis)) => {
                record.apply_analysis(&analysis, &self.date_resolver);
                tracing::debug!(file = %record.original_filename, "Structured data stored");
            }
            Some(Err(e)) => {
                tracing::error!(file = %record.original_filename, error = %e, "Failed to parse JSON response");
                record.reset_analysis();
            }
            None => {
                tracing::error!(file = %record.original_filename, "No analysis answer received");
                record.reset_analysis();
            }
        }
    }

    /// Copy the source into `records/` under its new name.
    fn persist(
        &self,
        record: &mut FileRecord,
        name: &str,
        store: &mut ChecksumStore,
        outcome: &mut RunOutcome,
    ) -> Result<(), Error> {
        let file_name = format!("{}{}", name, record.extension());
        let destination = self.config.records_dir().join(&file_name);

        match fs::copy(&record.source_path, &destination) {
            Ok(_) => {
                tracing::info!(
                    from = %record.source_path.display(),
                    to = %destination.display(),
                    "Copied record"
                );
                store.set_processed_file(&record.checksum, &file_name);
                store.save()?;
                self.progress.report(PipelineEvent::Renamed {
                    file: &record.source_path,
                    new_name: &file_name,
                });
                record.new_filename = Some(file_name);
                record.output_path = Some(destination);
            }
            Err(e) => {
                tracing::error!(file = %record.source_path.display(), error = %e, "Failed to copy record");
                // Without a copy the file must not count as processed.
                store.forget(&record.checksum);
                store.save()?;
                self.progress.report(PipelineEvent::CopyFailed { file: &record.source_path });
                outcome.failed += 1;
            }
        }
        Ok(())
    }

    fn generate_overall_summary(&self, records: &[FileRecord], settings: &ModelSettings) -> Value {
        tracing::info!("Generating overall medical history summary");
        let history = history_text(records);
        let questions = [SUMMARY_QUESTION.to_string()];
        let request = AnalysisRequest::for_text(&history, &questions, settings);

        let answer = match self.analyzer.ask(&request) {
            Ok(mut answers) => answers.remove(SUMMARY_QUESTION),
            Err(e) => {
                tracing::error!(error = %e, "Error generating overall summary");
                None
            }
        };

        match answer.map(|a| serde_json::from_str::<Value>(a.trim())) {
            Some(Ok(summary)) if summary.is_object() => {
                tracing::info!("Successfully generated overall medical history summary");
                summary
            }
            _ => {
                tracing::error!("Overall summary answer was not a JSON object");
                fallback_summary()
            }
        }
    }
}

fn fallback_summary() -> Value {
    json!({
        "patient": {"description": "Error generating patient description"},
        "medical_history": "Error generating medical history summary"
    })
}

/// Condense records, oldest first, into the text sent for the overall summary.
/// Undated records go last.
pub fn history_text(records: &[FileRecord]) -> String {
    let mut sorted: Vec<&FileRecord> = records.iter().filter(|r| !r.is_overall_summary()).collect();
    sorted.sort_by(|a, b| {
        (a.treatment_date.is_none(), &a.treatment_date).cmp(&(b.treatment_date.is_none(), &b.treatment_date))
    });

    sorted
        .iter()
        .map(|record| {
            format!(
                "Date: {}\nVisit Type: {}\nProvider: {}\nDiagnoses: {}\nTreatments: {}\nMedications: {}\nSummary: {}",
                record.treatment_date.as_deref().unwrap_or("Unknown Date"),
                or_unknown(&record.visit_type, "Unknown Visit Type"),
                or_unknown(&record.provider_name, "Unknown Provider"),
                record.diagnoses.join(", "),
                record.treatments.join(", "),
                record.medications.join(", "),
                record.summary,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn or_unknown<'s>(value: &'s str, fallback: &'s str) -> &'s str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

/// Remove generated output so the next run starts from scratch.
/// This also drops the checksum store.
pub fn clean_output(config: &Config) -> Result<(), Error> {
    for dir in [config.records_dir(), config.data_files_dir(), config.html_dir()] {
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
            tracing::info!(path = %dir.display(), "Removed directory");
        }
    }
    let html = config.output_html_path();
    if html.is_file() {
        fs::remove_file(&html)?;
        tracing::info!(path = %html.display(), "Removed file");
    }
    Ok(())
}
