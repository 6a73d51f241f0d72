//! File utility functions.

use crate::error::{LootError, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recursively find files with given extension in a directory.
///
/// Results are sorted so that split datasets load in a stable order.
pub fn find_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Err(LootError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Directory not found: {}", dir.display()),
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            if let Some(ext) = entry.path().extension() {
                if ext == extension {
                    files.push(entry.path().to_path_buf());
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Read file with UTF-8 encoding.
pub fn read_utf8_file(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

/// Read a JSON array file into a vector of records.
pub fn read_json_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = read_utf8_file(path)?;
    serde_json::from_str(&text).map_err(|e| {
        LootError::Parse(format!("Failed to parse {}: {}", path.display(), e))
    })
}
