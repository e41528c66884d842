// src/validate.rs

use crate::error::{PipelineError, Result};
use crate::table::{Cell, Table};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

/// Maximum offending values quoted in a type failure.
const TYPE_ERROR_EXAMPLES: usize = 10;

/// The data contract for one source table: columns that must exist, columns
/// that must coerce to numbers, and the fixed-width digit identifier.
#[derive(Debug, Clone)]
pub struct TableRules {
    pub required: &'static [&'static str],
    pub numeric: &'static [&'static str],
    pub id_column: &'static str,
    pub id_width: usize,
}

/// Check `table` against `rules` and return the validated copy: numeric
/// columns coerced to `Num`, the identifier column normalized to bare digit
/// strings. Never drops or reorders rows; any violation rejects the whole
/// table. Blank numeric values count as missing, not as invalid.
pub fn validate(table: &Table, rules: &TableRules) -> Result<Table> {
    let missing: Vec<String> = rules
        .required
        .iter()
        .filter(|c| !table.has_column(c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::Schema { missing });
    }

    let mut out = table.clone();
    for &col in rules.numeric {
        out = coerce_numeric(&out, col)?;
    }
    out = normalize_identifier(&out, rules.id_column, rules.id_width)?;

    info!(rows = out.num_rows(), id = rules.id_column, "table validated");
    Ok(out)
}

fn coerce_numeric(table: &Table, col: &str) -> Result<Table> {
    let mut coerced = Vec::with_capacity(table.num_rows());
    let mut examples = Vec::new();
    let mut bad_count = 0usize;

    for cell in table.column(col)? {
        let next = match cell {
            Cell::Null => Cell::Null,
            Cell::Num(v) => Cell::Num(*v),
            Cell::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Cell::Null
                } else {
                    match trimmed.parse::<f64>() {
                        Ok(v) => Cell::Num(v),
                        Err(_) => {
                            bad_count += 1;
                            if examples.len() < TYPE_ERROR_EXAMPLES {
                                examples.push(s.clone());
                            }
                            Cell::Null
                        }
                    }
                }
            }
        };
        coerced.push(next);
    }

    if bad_count > 0 {
        return Err(PipelineError::Type {
            column: col.to_string(),
            bad_count,
            examples,
        });
    }
    Ok(table.with_column(col, coerced))
}

/// Render the identifier as a string, strip the `.0` float artifact and
/// surrounding whitespace, then require every value present and exactly
/// `width` digits.
fn normalize_identifier(table: &Table, col: &str, width: usize) -> Result<Table> {
    let mut normalized = Vec::with_capacity(table.num_rows());
    let mut missing = 0usize;
    let mut bad_count = 0usize;

    for cell in table.column(col)? {
        match cell.key() {
            None => {
                missing += 1;
                normalized.push(Cell::Null);
            }
            Some(raw) => {
                let mut s = raw.trim();
                s = s.strip_suffix(".0").unwrap_or(s);
                if s.is_empty() {
                    missing += 1;
                    normalized.push(Cell::Null);
                    continue;
                }
                if s.len() != width || !DIGITS_RE.is_match(s) {
                    bad_count += 1;
                }
                normalized.push(Cell::Str(s.to_string()));
            }
        }
    }

    if missing > 0 {
        return Err(PipelineError::Integrity {
            column: col.to_string(),
            missing,
        });
    }
    if bad_count > 0 {
        return Err(PipelineError::Format {
            column: col.to_string(),
            width,
            bad_count,
        });
    }
    Ok(table.with_column(col, normalized))
}
