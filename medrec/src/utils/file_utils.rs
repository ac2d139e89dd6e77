// File utilities shared by the pipeline and the export sinks

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Every regular file under `base_dir`, recursively, in a stable order.
///
/// Hidden files (leading `.`) are skipped; unreadable entries are logged and
/// ignored rather than aborting the walk.
pub fn discover_files(base_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let base_dir = base_dir.as_ref();
    if !base_dir.is_dir() {
        anyhow::bail!("Scans location is not a directory: {}", base_dir.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(base_dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Create directory if it doesn't exist
pub fn ensure_dir_exists(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(())
}

/// Save JSON to file
pub fn save_json<T: serde::Serialize>(
    data: &T,
    output_path: impl AsRef<Path>,
    pretty: bool,
) -> Result<()> {
    let output_path = output_path.as_ref();

    if let Some(parent) = output_path.parent() {
        ensure_dir_exists(parent)?;
    }

    let json = if pretty {
        serde_json::to_string_pretty(data)?
    } else {
        serde_json::to_string(data)?
    };

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON file: {}", output_path.display()))?;

    Ok(())
}

/// Load JSON from file
pub fn load_json<T: serde::de::DeserializeOwned>(input_path: impl AsRef<Path>) -> Result<T> {
    let input_path = input_path.as_ref();
    let content = fs::read_to_string(input_path)
        .with_context(|| format!("Failed to read JSON file: {}", input_path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse JSON file: {}", input_path.display()))
}
