//! JSON file I/O and the on-disk run layout.

pub mod inputs;
pub mod outputs;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use inputs::{InputLayout, RunInputs, Trigger};
pub use outputs::OutputLayout;

/// Reads a JSON document.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let reader = BufReader::new(file);

    let value: T = serde_json::from_reader(reader)
        .with_context(|| format!("Failed to deserialize: {}", path.display()))?;

    Ok(value)
}

/// Writes a value as pretty-printed JSON, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, value)
        .with_context(|| format!("Failed to serialize to: {}", path.display()))?;

    Ok(())
}

/// Turns an identifier into something usable as a single path component.
pub fn file_name_for(id: &str) -> String {
    let name: String = id
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    match name.as_str() {
        "" | "." | ".." => format!("_{name}"),
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_json() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("values.json");

        let mut original = BTreeMap::new();
        original.insert("bld_1".to_string(), vec![0.5, 0.25, 0.25]);
        write_json(&path, &original)?;

        let loaded: BTreeMap<String, Vec<f64>> = read_json(&path)?;
        assert_eq!(loaded, original);
        Ok(())
    }

    #[test]
    fn test_file_names_stay_in_one_component() {
        assert_eq!(file_name_for("12-3"), "12-3");
        assert_eq!(file_name_for("a/b c"), "a_b_c");
        assert_eq!(file_name_for(".."), "_..");
    }

    #[test]
    fn test_errors_name_the_file() {
        let err = read_json::<Vec<f64>>(Path::new("/nonexistent/exposure.json")).unwrap_err();
        assert!(format!("{err:#}").contains("exposure.json"));
    }
}
