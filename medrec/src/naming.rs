// Filename resolution: template rendering and per-date sequence numbers

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::record::FileRecord;

pub const DEFAULT_FILENAME_FORMAT: &str =
    "{treatment_date}_{visit_type}_{provider_name_last}_{seq:03d}";

const UNKNOWN: &str = "unknown";

static SEQUENCE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"_(\d{3})$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown placeholder `{{{0}}}`")]
    UnknownPlaceholder(String),
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),
    #[error("unmatched `}}` at byte {0}")]
    UnmatchedBrace(usize),
    #[error("invalid format spec `{spec}` for `{name}`")]
    BadFormatSpec { name: String, spec: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    TreatmentDate,
    VisitType,
    ProviderNameLast,
    Seq,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "treatment_date" => Some(Field::TreatmentDate),
            "visit_type" => Some(Field::VisitType),
            "provider_name_last" => Some(Field::ProviderNameLast),
            "seq" => Some(Field::Seq),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field {
        field: Field,
        width: usize,
        zero_pad: bool,
    },
}

/// A parsed `filename_format` such as `{treatment_date}_{visit_type}_{seq:03d}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    segments: Vec<Segment>,
}

/// Normalized values substituted into the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameParts {
    pub treatment_date: String,
    pub visit_type: String,
    pub provider_name_last: String,
    pub seq: u32,
}

impl FilenameTemplate {
    pub fn parse(format: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = format.char_indices().peekable();

        while let Some((pos, ch)) = chars.next() {
            match ch {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(TemplateError::UnmatchedBrace(pos)),
                '{' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        body.push(c);
                    }
                    if !closed {
                        return Err(TemplateError::Unterminated(pos));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Self::parse_placeholder(&body)?);
                }
                _ => literal.push(ch),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    fn parse_placeholder(body: &str) -> Result<Segment, TemplateError> {
        let (name, spec) = match body.split_once(':') {
            Some((name, spec)) => (name.trim(), Some(spec.trim())),
            None => (body.trim(), None),
        };

        let field = Field::from_name(name)
            .ok_or_else(|| TemplateError::UnknownPlaceholder(name.to_string()))?;

        let bad_spec = || TemplateError::BadFormatSpec {
            name: name.to_string(),
            spec: spec.unwrap_or_default().to_string(),
        };

        let (width, zero_pad) = match spec {
            None | Some("") => (0, false),
            Some(spec) => {
                // Integer specs (`d`, `3d`, `03d`) only make sense for the sequence.
                let digits = spec.strip_suffix('d').ok_or_else(bad_spec)?;
                if field != Field::Seq || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return Err(bad_spec());
                }
                let zero_pad = digits.starts_with('0');
                let width = if digits.is_empty() {
                    0
                } else {
                    digits.parse::<usize>().map_err(|_| bad_spec())?
                };
                (width, zero_pad)
            }
        };

        Ok(Segment::Field {
            field,
            width,
            zero_pad,
        })
    }

    pub fn render(&self, parts: &FilenameParts) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field {
                    field,
                    width,
                    zero_pad,
                } => {
                    let value = match field {
                        Field::TreatmentDate => parts.treatment_date.clone(),
                        Field::VisitType => parts.visit_type.clone(),
                        Field::ProviderNameLast => parts.provider_name_last.clone(),
                        Field::Seq if *zero_pad => format!("{:0width$}", parts.seq, width = *width),
                        Field::Seq => format!("{:>width$}", parts.seq, width = *width),
                    };
                    out.push_str(&value);
                }
            }
        }
        out
    }
}

impl FilenameParts {
    /// Normalize a record's metadata. `today` stands in for a missing date.
    pub fn from_record(record: &FileRecord, today: &str, seq: u32) -> Self {
        let treatment_date = record
            .treatment_date
            .as_deref()
            .map(str::trim)
            .filter(|date| !date.is_empty())
            .unwrap_or(today)
            .to_string();

        Self {
            treatment_date,
            visit_type: normalize_visit_type(&record.visit_type),
            provider_name_last: provider_last_name(&record.provider_name),
            seq,
        }
    }
}

/// Lowercase, spaces to underscores, "unknown" when empty.
pub fn normalize_visit_type(visit_type: &str) -> String {
    let visit_type = visit_type.trim();
    if visit_type.is_empty() {
        return UNKNOWN.to_string();
    }
    sanitize(&visit_type.to_lowercase().replace(' ', "_"))
}

/// Last whitespace-delimited token, lowercased, "unknown" when empty.
pub fn provider_last_name(provider_name: &str) -> String {
    provider_name
        .split_whitespace()
        .last()
        .map(|token| sanitize(&token.to_lowercase()))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

// Keep generated names inside the records directory.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '-',
            _ => c,
        })
        .collect()
}

/// Explicit per-date sequence counters.
///
/// A date's counter is seeded from the output directory the first time the
/// date is requested, so numbering continues across process restarts, and is
/// then advanced in memory on every assignment.
#[derive(Debug, Default)]
pub struct SequenceTable {
    last_assigned: HashMap<String, u32>,
}

impl SequenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next sequence number for `date`.
    pub fn next(&mut self, output_dir: &Path, date: &str) -> io::Result<u32> {
        let last = match self.last_assigned.get(date) {
            Some(last) => *last,
            None => highest_existing_sequence(output_dir, date)?,
        };
        let next = last + 1;
        self.last_assigned.insert(date.to_string(), next);
        tracing::debug!(date, seq = next, "Next sequence number");
        Ok(next)
    }
}

/// Highest `_NNN` suffix among files in `output_dir` named `<date>_*`, or 0.
pub fn highest_existing_sequence(output_dir: &Path, date: &str) -> io::Result<u32> {
    let entries = match fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let prefix = format!("{}_", date);
    let mut highest = 0;
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(&prefix) {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);
        if let Some(caps) = SEQUENCE_SUFFIX.captures(stem) {
            if let Ok(seq) = caps[1].parse::<u32>() {
                highest = highest.max(seq);
            }
        }
    }
    Ok(highest)
}

/// Computes collision-free output names for records, one at a time.
pub struct FilenameResolver {
    template: FilenameTemplate,
    output_dir: PathBuf,
    sequences: SequenceTable,
}

impl FilenameResolver {
    pub fn new(template: FilenameTemplate, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            template,
            output_dir: output_dir.into(),
            sequences: SequenceTable::new(),
        }
    }

    /// Filename without extension for `record`.
    pub fn resolve(&mut self, record: &FileRecord, today: &str) -> io::Result<String> {
        let mut parts = FilenameParts::from_record(record, today, 0);
        parts.seq = self.sequences.next(&self.output_dir, &parts.treatment_date)?;
        let name = self.template.render(&parts);
        tracing::info!(file = %record.original_filename, new_name = %name, "Created new filename");
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn parts(seq: u32) -> FilenameParts {
        FilenameParts {
            treatment_date: "2023-06-01".to_string(),
            visit_type: "lab_test".to_string(),
            provider_name_last: "smith".to_string(),
            seq,
        }
    }

    #[test]
    fn test_default_template_renders() {
        let template = FilenameTemplate::parse(DEFAULT_FILENAME_FORMAT).unwrap();
        assert_eq!(template.render(&parts(7)), "2023-06-01_lab_test_smith_007");
    }

    #[test]
    fn test_template_literal_braces_and_widths() {
        let template = FilenameTemplate::parse("{{x}}-{seq:4d}-{seq}").unwrap();
        assert_eq!(template.render(&parts(12)), "{x}-  12-12");
    }

    #[test]
    fn test_template_errors() {
        assert_eq!(
            FilenameTemplate::parse("{doctor}").unwrap_err(),
            TemplateError::UnknownPlaceholder("doctor".to_string())
        );
        assert!(matches!(
            FilenameTemplate::parse("{seq:03d"),
            Err(TemplateError::Unterminated(0))
        ));
        assert!(matches!(
            FilenameTemplate::parse("a}b"),
            Err(TemplateError::UnmatchedBrace(1))
        ));
        assert!(matches!(
            FilenameTemplate::parse("{visit_type:03d}"),
            Err(TemplateError::BadFormatSpec { .. })
        ));
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_visit_type("Lab Test"), "lab_test");
        assert_eq!(normalize_visit_type("  "), "unknown");
        assert_eq!(provider_last_name("Dr. John Smith"), "smith");
        assert_eq!(provider_last_name(""), "unknown");
    }

    #[test]
    fn test_sequence_starts_at_one_in_empty_dir() {
        let temp_dir = TempDir::new().unwrap();
        let mut table = SequenceTable::new();
        assert_eq!(table.next(temp_dir.path(), "2023-06-01").unwrap(), 1);
    }

    #[test]
    fn test_sequence_continues_after_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        File::create(temp_dir.path().join("2023-06-01_visit_smith_001.pdf")).unwrap();
        File::create(temp_dir.path().join("2023-06-02_visit_smith_005.pdf")).unwrap();

        let mut table = SequenceTable::new();
        assert_eq!(table.next(temp_dir.path(), "2023-06-01").unwrap(), 2);
        // In-memory advance, no new file on disk yet.
        assert_eq!(table.next(temp_dir.path(), "2023-06-01").unwrap(), 3);
        assert_eq!(table.next(temp_dir.path(), "2023-06-03").unwrap(), 1);
    }

    #[test]
    fn test_missing_output_dir_counts_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("records");
        assert_eq!(highest_existing_sequence(&missing, "2023-06-01").unwrap(), 0);
    }

    #[test]
    fn test_resolver_uses_today_when_undated() {
        let temp_dir = TempDir::new().unwrap();
        let template = FilenameTemplate::parse(DEFAULT_FILENAME_FORMAT).unwrap();
        let mut resolver = FilenameResolver::new(template, temp_dir.path());

        let record = FileRecord {
            visit_type: "Follow Up".to_string(),
            provider_name: "Dr. Rossi".to_string(),
            ..Default::default()
        };
        let name = resolver.resolve(&record, "2024-01-15").unwrap();
        assert_eq!(name, "2024-01-15_follow_up_rossi_001");
    }
}
