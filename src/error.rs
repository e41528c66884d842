// src/error.rs

use thiserror::Error;

/// Every way a pipeline run can fail.
///
/// Fetch errors split by retry behaviour: transient and rate-limit failures
/// are retried by the fetcher before surfacing here, fatal statuses surface
/// immediately. Everything from `Schema` down is a data-contract violation
/// and is never retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient fetch failure after {attempts} attempts: {reason}")]
    FetchTransient { attempts: u32, reason: String },

    #[error("rate limited (429) after {attempts} attempts")]
    RateLimit { attempts: u32 },

    #[error("fetch failed with status {status}: {url}")]
    FetchFatal { status: u16, url: String },

    #[error("no page files found in {dir}")]
    NoData { dir: String },

    #[error("missing required columns: {missing:?}")]
    Schema { missing: Vec<String> },

    #[error("column {column} has {bad_count} non-numeric values, e.g. {examples:?}")]
    Type {
        column: String,
        bad_count: usize,
        examples: Vec<String>,
    },

    #[error("identifier column {column} has {missing} missing values")]
    Integrity { column: String, missing: usize },

    #[error("identifier column {column} has {bad_count} values that are not {width} digits")]
    Format {
        column: String,
        width: usize,
        bad_count: usize,
    },

    #[error("row count changed after merge: primary = {primary}, merged = {merged}")]
    Cardinality { primary: usize, merged: usize },

    #[error("column {column} appears on both sides of the merge")]
    DuplicateColumn { column: String },

    #[error("duplicate grain {grain:?} in mart, e.g. {example}")]
    Grain { grain: Vec<String>, example: String },

    #[error("grain column {column} contains {nulls} missing values")]
    NullGrain { column: String, nulls: usize },

    #[error("column {column}: {violations} values outside [{min}, {max}]")]
    Range {
        column: String,
        min: f64,
        max: f64,
        violations: usize,
    },

    #[error("share column {column}: {violations} values outside [0, 1]")]
    ShareRange { column: String, violations: usize },

    #[error("share column {column}: partition {partition} sums to {sum}, expected 1")]
    ShareSum {
        column: String,
        partition: String,
        sum: f64,
    },

    #[error("column {column} not found in table")]
    UnknownColumn { column: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Duckdb(#[from] duckdb::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
