// src/merge.rs

use crate::error::{PipelineError, Result};
use crate::table::{Cell, Table};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Above this unmatched fraction the merge report warns the operator.
const MATCH_WARN_THRESHOLD: f64 = 0.2;

/// Left outer join of `primary` onto `secondary` on
/// `left_key` = `right_key`. Every primary row appears exactly once in the
/// result; a secondary side whose key is not unique would fan rows out, and
/// that surfaces as a cardinality failure instead of silently inflating the
/// table. Column names must not collide; rename the secondary's measure
/// columns before joining.
pub fn merge(
    primary: &Table,
    secondary: &Table,
    left_key: &str,
    right_key: &str,
) -> Result<Table> {
    let left_idx = primary.col_index(left_key)?;
    let right_idx = secondary.col_index(right_key)?;

    for col in secondary.columns() {
        if primary.has_column(col) {
            return Err(PipelineError::DuplicateColumn {
                column: col.clone(),
            });
        }
    }

    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, row) in secondary.rows().iter().enumerate() {
        if let Some(key) = row[right_idx].key() {
            index.entry(key).or_default().push(i);
        }
    }

    // size the join before materializing it, so fan-out is caught up front
    let mut merged_rows = 0usize;
    for row in primary.rows() {
        let matches = row[left_idx]
            .key()
            .and_then(|k| index.get(&k))
            .map_or(0, |v| v.len());
        merged_rows += matches.max(1);
    }
    if merged_rows != primary.num_rows() {
        return Err(PipelineError::Cardinality {
            primary: primary.num_rows(),
            merged: merged_rows,
        });
    }

    let mut columns: Vec<String> = primary.columns().to_vec();
    columns.extend(secondary.columns().iter().cloned());

    let sec_width = secondary.columns().len();
    let rows = primary
        .rows()
        .iter()
        .map(|row| {
            let mut out = row.clone();
            match row[left_idx].key().and_then(|k| index.get(&k)) {
                Some(hits) => out.extend(secondary.rows()[hits[0]].iter().cloned()),
                None => out.extend(std::iter::repeat(Cell::Null).take(sec_width)),
            }
            out
        })
        .collect();

    Ok(Table::new(columns, rows))
}

/// Non-fatal findings about one merge, reported to the log channel.
#[derive(Debug)]
pub struct MergeReport {
    /// Fraction of primary rows where every secondary-origin column is null.
    pub unmatched_fraction: f64,
    /// Duplicate rows under the dedup keys introduced by the merge
    /// (merged count minus the primary's own count).
    pub duplicate_diff: i64,
}

/// Inspect a completed merge: how many rows found no match, and whether the
/// join changed the duplicate count under `dedup_keys`. Neither finding stops
/// the run; both are surfaced for upstream investigation.
pub fn validate_merge(
    primary: &Table,
    merged: &Table,
    secondary_columns: &[&str],
    dedup_keys: &[&str],
) -> Result<MergeReport> {
    let available: Vec<&str> = secondary_columns
        .iter()
        .copied()
        .filter(|c| merged.has_column(c))
        .collect();
    if available.is_empty() {
        return Err(PipelineError::Schema {
            missing: secondary_columns.iter().map(|c| c.to_string()).collect(),
        });
    }

    let indices: Vec<usize> = available
        .iter()
        .map(|c| merged.col_index(c))
        .collect::<Result<_>>()?;
    let unmatched = merged
        .rows()
        .iter()
        .filter(|row| indices.iter().all(|&i| row[i].is_null()))
        .count();
    let unmatched_fraction = if merged.num_rows() == 0 {
        0.0
    } else {
        unmatched as f64 / merged.num_rows() as f64
    };

    info!(
        unmatched_pct = unmatched_fraction * 100.0,
        "secondary match missing rate"
    );
    if unmatched_fraction > MATCH_WARN_THRESHOLD {
        warn!(
            unmatched_pct = unmatched_fraction * 100.0,
            "more than 20% of rows have no matched secondary data"
        );
    }

    let duplicate_diff =
        duplicate_count(merged, dedup_keys)? as i64 - duplicate_count(primary, dedup_keys)? as i64;
    if duplicate_diff > 0 {
        warn!(
            duplicate_diff,
            keys = ?dedup_keys,
            "merge changed the duplicate count under the dedup keys"
        );
    }

    Ok(MergeReport {
        unmatched_fraction,
        duplicate_diff,
    })
}

fn duplicate_count(table: &Table, keys: &[&str]) -> Result<usize> {
    let indices: Vec<usize> = keys
        .iter()
        .map(|c| table.col_index(c))
        .collect::<Result<_>>()?;
    let mut seen: HashSet<Vec<Option<String>>> = HashSet::new();
    let mut dups = 0usize;
    for row in table.rows() {
        let key: Vec<Option<String>> = indices.iter().map(|&i| row[i].key()).collect();
        if !seen.insert(key) {
            dups += 1;
        }
    }
    Ok(dups)
}
