// src/load.rs

use crate::error::{PipelineError, Result};
use crate::table::Table;
use glob::glob;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::info;

/// Concatenate every persisted `page_*.json` under `dir`, in ascending page
/// order, into one raw table. Zero pages is a hard error: it means the
/// ingest stage never ran or wrote nothing.
pub fn load_pages(dir: &Path) -> Result<Table> {
    let pattern = format!("{}/page_*.json", dir.display());
    let mut paths: Vec<_> = glob(&pattern)
        .expect("page glob pattern should be valid")
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    // zero-padded numbering makes lexical order the numeric order
    paths.sort();

    if paths.is_empty() {
        return Err(PipelineError::NoData {
            dir: dir.display().to_string(),
        });
    }

    let mut records: Vec<Value> = Vec::new();
    for path in &paths {
        let text = fs::read_to_string(path)?;
        let page: Vec<Value> = serde_json::from_str(&text)?;
        records.extend(page);
    }

    let table = Table::from_records(&records);
    info!(rows = table.num_rows(), pages = paths.len(), dir = %dir.display(), "loaded raw pages");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn concatenates_pages_in_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        // write out of order to prove sorting
        fs::write(
            dir.path().join("page_00002.json"),
            serde_json::to_string(&vec![json!({"id": "b"})]).unwrap(),
        )
        .unwrap();
        fs::write(
            dir.path().join("page_00001.json"),
            serde_json::to_string(&vec![json!({"id": "a"})]).unwrap(),
        )
        .unwrap();

        let table = load_pages(dir.path()).unwrap();
        assert_eq!(table.num_rows(), 2);
        let ids: Vec<_> = table
            .column("id")
            .unwrap()
            .iter()
            .map(|c| c.key().unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn empty_directory_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_pages(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::NoData { .. }));
    }
}
