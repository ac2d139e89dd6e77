// XLSX extractor: cells joined by a space, rows by a newline, sheet by sheet

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use zip::ZipArchive;

use super::xml_unescape;

static SHEET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^xl/worksheets/sheet(\d+)\.xml$").unwrap());
static SHARED_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<si>(.*?)</si>").unwrap());
static TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<t(?:\s[^>]*)?>([^<]*)</t>").unwrap());
static ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<row[^>]*>(.*?)</row>").unwrap());
static CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<c\b([^>]*?)(?:/>|>(.*?)</c>)").unwrap());
static VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<v>([^<]*)</v>").unwrap());
static CELL_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\bt="([^"]*)""#).unwrap());

pub struct XlsxExtractor;

impl XlsxExtractor {
    pub fn extract(xlsx_path: impl AsRef<Path>) -> Result<String> {
        let xlsx_path = xlsx_path.as_ref();

        let file = File::open(xlsx_path)
            .with_context(|| format!("Failed to open XLSX file: {}", xlsx_path.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("Failed to read XLSX as ZIP: {}", xlsx_path.display()))?;

        let shared = match read_entry(&mut archive, "xl/sharedStrings.xml") {
            Ok(xml) => Self::parse_shared_strings(&xml),
            Err(_) => Vec::new(),
        };

        let mut sheets: Vec<(u32, String)> = archive
            .file_names()
            .filter_map(|name| {
                let caps = SHEET_NAME.captures(name)?;
                Some((caps[1].parse().ok()?, name.to_string()))
            })
            .collect();
        sheets.sort();

        let mut text = String::new();
        for (_, name) in sheets {
            match read_entry(&mut archive, &name) {
                Ok(xml) => text.push_str(&Self::sheet_text(&xml, &shared)),
                Err(e) => tracing::warn!(sheet = %name, error = %e, "Skipping unreadable sheet"),
            }
        }
        Ok(text)
    }

    fn parse_shared_strings(xml: &str) -> Vec<String> {
        SHARED_ITEM
            .captures_iter(xml)
            .map(|item| {
                TEXT.captures_iter(&item[1])
                    .map(|caps| xml_unescape(&caps[1]))
                    .collect::<String>()
            })
            .collect()
    }

    fn sheet_text(xml: &str, shared: &[String]) -> String {
        let mut text = String::new();
        for row in ROW.captures_iter(xml) {
            let cells: Vec<String> = CELL
                .captures_iter(&row[1])
                .map(|cell| {
                    let attrs = &cell[1];
                    let body = cell.get(2).map(|m| m.as_str()).unwrap_or_default();
                    Self::cell_value(attrs, body, shared)
                })
                .collect();
            text.push_str(&cells.join(" "));
            text.push('\n');
        }
        text
    }

    fn cell_value(attrs: &str, body: &str, shared: &[String]) -> String {
        let cell_type = CELL_TYPE
            .captures(attrs)
            .map(|caps| caps[1].to_string())
            .unwrap_or_default();
        let raw = VALUE
            .captures(body)
            .map(|caps| caps[1].to_string())
            .unwrap_or_default();

        match cell_type.as_str() {
            "s" => raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|index| shared.get(index).cloned())
                .unwrap_or_default(),
            "inlineStr" => TEXT
                .captures_iter(body)
                .map(|caps| xml_unescape(&caps[1]))
                .collect(),
            _ => xml_unescape(&raw),
        }
    }
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("Missing archive entry: {}", name))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    const SHARED: &str = r#"<sst><si><t>Glucose</t></si><si><r><t>mg/</t></r><r><t>dL</t></r></si></sst>"#;

    fn sheet(rows: &str) -> String {
        format!("<worksheet><sheetData>{}</sheetData></worksheet>", rows)
    }

    #[test]
    fn test_sheet_text_resolves_shared_and_inline_strings() {
        let shared = XlsxExtractor::parse_shared_strings(SHARED);
        assert_eq!(shared, vec!["Glucose".to_string(), "mg/dL".to_string()]);

        let xml = sheet(
            r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1"><v>95</v></c><c r="C1" t="s"><v>1</v></c></row>
               <row r="2"><c r="A2" t="inlineStr"><is><t>Date</t></is></c><c r="B2"/><c r="C2" t="str"><v>07/12/2022</v></c></row>"#,
        );
        assert_eq!(
            XlsxExtractor::sheet_text(&xml, &shared),
            "Glucose 95 mg/dL\nDate  07/12/2022\n"
        );
    }

    #[test]
    fn test_extract_sheets_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("labs.xlsx");
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        for (name, body) in [
            ("xl/sharedStrings.xml", SHARED.to_string()),
            ("xl/worksheets/sheet10.xml", sheet(r#"<row><c><v>10</v></c></row>"#)),
            ("xl/worksheets/sheet2.xml", sheet(r#"<row><c><v>2</v></c></row>"#)),
            ("xl/worksheets/sheet1.xml", sheet(r#"<row><c t="s"><v>0</v></c></row>"#)),
        ] {
            writer.start_file(name, FileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();

        let text = XlsxExtractor::extract(&path).unwrap();
        assert_eq!(text, "Glucose\n2\n10\n");
    }

    #[test]
    fn test_not_a_zip_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fake.xlsx");
        std::fs::write(&path, "plain text").unwrap();
        assert!(XlsxExtractor::extract(&path).is_err());
    }
}
