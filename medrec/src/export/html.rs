// Minimal HTML viewer: one table row per record plus the raw data as JSON

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;

use super::ExportSink;
use crate::record::FileRecord;
use crate::utils::ensure_dir_exists;

pub struct HtmlSink {
    path: PathBuf,
}

impl HtmlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn render(records: &[FileRecord], overall_summary: Option<&Value>) -> Result<String> {
        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str("<title>Medical Records</title>\n");
        html.push_str("<style>body{font-family:sans-serif;margin:2em}table{border-collapse:collapse;width:100%}th,td{border:1px solid #ccc;padding:4px 8px;text-align:left;vertical-align:top}th{background:#f0f0f0}</style>\n");
        html.push_str("</head>\n<body>\n<h1>Medical Records</h1>\n");

        if let Some(summary) = overall_summary {
            html.push_str("<h2>Overall Summary</h2>\n<pre>");
            html.push_str(&escape(&serde_json::to_string_pretty(summary)?));
            html.push_str("</pre>\n");
        }

        html.push_str("<table>\n<thead><tr><th>Date</th><th>Visit Type</th><th>Provider</th><th>Condition</th><th>Summary</th><th>Diagnoses</th><th>Medications</th><th>Test Results</th><th>File</th></tr></thead>\n<tbody>\n");
        for record in records {
            let file_cell = match &record.new_filename {
                Some(name) if !record.is_overall_summary() => format!(
                    "<a href=\"records/{}\">{}</a>",
                    escape(name),
                    escape(name)
                ),
                Some(name) => escape(name),
                None => escape(&record.original_filename),
            };
            writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(record.treatment_date.as_deref().unwrap_or("N/A")),
                escape(&record.visit_type),
                escape(&record.provider_name),
                escape(&record.primary_condition),
                escape(&record.summary),
                escape(&record.diagnoses.join(", ")),
                escape(&record.medications.join(", ")),
                escape(&record.test_results.join(", ")),
                file_cell,
            )?;
        }
        html.push_str("</tbody>\n</table>\n");

        let data = serde_json::to_string(records)?.replace("</", "<\\/");
        html.push_str("<script type=\"application/json\" id=\"records-data\">");
        html.push_str(&data);
        html.push_str("</script>\n</body>\n</html>\n");
        Ok(html)
    }
}

impl ExportSink for HtmlSink {
    fn name(&self) -> &'static str {
        "html"
    }

    fn write(&self, records: &[FileRecord], overall_summary: Option<&Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir_exists(parent)?;
        }
        let html = Self::render(records, overall_summary)?;
        fs::write(&self.path, html)
            .with_context(|| format!("Failed to write HTML file: {}", self.path.display()))
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_escape() {
        assert_eq!(escape("<b>\"A&B\"</b>"), "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;");
    }

    #[test]
    fn test_render_escapes_and_embeds_data() {
        let records = vec![FileRecord {
            original_filename: "x.txt".to_string(),
            summary: "</script><script>alert(1)</script>".to_string(),
            new_filename: Some("2023-01-01_visit_smith_001.txt".to_string()),
            ..Default::default()
        }];
        let summary = serde_json::json!({"medical_history": "Stable"});

        let html = HtmlSink::render(&records, Some(&summary)).unwrap();
        assert!(html.contains("&lt;/script&gt;"));
        assert!(html.contains("href=\"records/2023-01-01_visit_smith_001.txt\""));
        assert!(html.contains("Overall Summary"));
        assert_eq!(html.matches("</script>").count(), 1);
    }

    #[test]
    fn test_write_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("output.html");
        HtmlSink::new(&path).write(&[], None).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("<table>"));
    }
}
