// src/store/duck.rs

use crate::error::Result;
use duckdb::Connection;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load mart parquet snapshots into a DuckDB database, fully replacing each
/// named table. A missing snapshot is fatal: it means an upstream stage never
/// produced it.
pub fn load_marts(db_path: &Path, marts: &[(String, PathBuf)]) -> Result<()> {
    let conn = Connection::open(db_path)?;

    for (name, path) in marts {
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{name}: mart parquet not found: {}", path.display()),
            )
            .into());
        }
        let table_name = name.replace('-', "_");
        let file_path = path.to_string_lossy().replace('\'', "''");
        conn.execute_batch(&format!(
            "CREATE OR REPLACE TABLE \"{table_name}\" AS \
             SELECT * FROM read_parquet('{file_path}');"
        ))?;
        info!(table = %table_name, path = %path.display(), "replaced warehouse table");
    }

    Ok(())
}
