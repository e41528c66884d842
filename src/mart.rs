// src/mart.rs

use crate::error::{PipelineError, Result};
use crate::table::{Cell, Table};
use std::collections::{HashMap, HashSet};
use tracing::info;

const SHARE_EPS: f64 = 1e-6;
const SHARE_SUM_TOL: f64 = 1e-3;

#[derive(Debug, Clone, Copy)]
pub enum Reduction {
    Sum,
    Mean,
    /// Row count within the group, regardless of nulls in `source`.
    Count,
    CountDistinct,
}

/// One output measure of an aggregation: reduce `source` into `name`.
#[derive(Debug, Clone, Copy)]
pub struct Measure {
    pub name: &'static str,
    pub source: &'static str,
    pub reduction: Reduction,
}

enum Acc {
    Sum(f64),
    Mean { sum: f64, count: usize },
    Count(usize),
    Distinct(HashSet<String>),
}

impl Acc {
    fn new(reduction: Reduction) -> Acc {
        match reduction {
            Reduction::Sum => Acc::Sum(0.0),
            Reduction::Mean => Acc::Mean { sum: 0.0, count: 0 },
            Reduction::Count => Acc::Count(0),
            Reduction::CountDistinct => Acc::Distinct(HashSet::new()),
        }
    }

    fn push(&mut self, cell: &Cell) {
        match self {
            Acc::Sum(total) => {
                if let Some(v) = cell.as_num() {
                    *total += v;
                }
            }
            Acc::Mean { sum, count } => {
                if let Some(v) = cell.as_num() {
                    *sum += v;
                    *count += 1;
                }
            }
            Acc::Count(n) => *n += 1,
            Acc::Distinct(set) => {
                if let Some(k) = cell.key() {
                    set.insert(k);
                }
            }
        }
    }

    fn finish(&self) -> Cell {
        match self {
            Acc::Sum(total) => Cell::Num(*total),
            Acc::Mean { sum, count } => {
                if *count == 0 {
                    Cell::Null
                } else {
                    Cell::Num(sum / *count as f64)
                }
            }
            Acc::Count(n) => Cell::Num(*n as f64),
            Acc::Distinct(set) => Cell::Num(set.len() as f64),
        }
    }
}

/// Group `table` by `group_keys` and reduce `measures`, one output row per
/// distinct key combination in first-seen order. Rows missing any group key
/// are dropped before grouping; a grain value that isn't there means nothing
/// to aggregate under.
pub fn aggregate(table: &Table, group_keys: &[&str], measures: &[Measure]) -> Result<Table> {
    let key_indices: Vec<usize> = group_keys
        .iter()
        .map(|c| table.col_index(c))
        .collect::<Result<_>>()?;
    let src_indices: Vec<usize> = measures
        .iter()
        .map(|m| table.col_index(m.source))
        .collect::<Result<_>>()?;

    let mut group_of: HashMap<Vec<String>, usize> = HashMap::new();
    let mut key_cells: Vec<Vec<Cell>> = Vec::new();
    let mut accs: Vec<Vec<Acc>> = Vec::new();
    let mut dropped = 0usize;

    for row in table.rows() {
        let key: Option<Vec<String>> = key_indices.iter().map(|&i| row[i].key()).collect();
        let key = match key {
            Some(k) => k,
            None => {
                dropped += 1;
                continue;
            }
        };

        let group = *group_of.entry(key).or_insert_with(|| {
            key_cells.push(key_indices.iter().map(|&i| row[i].clone()).collect());
            accs.push(measures.iter().map(|m| Acc::new(m.reduction)).collect());
            accs.len() - 1
        });
        for (acc, &src) in accs[group].iter_mut().zip(&src_indices) {
            acc.push(&row[src]);
        }
    }

    if dropped > 0 {
        info!(dropped, keys = ?group_keys, "dropped rows with missing group keys");
    }

    let mut columns: Vec<String> = group_keys.iter().map(|c| c.to_string()).collect();
    columns.extend(measures.iter().map(|m| m.name.to_string()));

    let rows = key_cells
        .into_iter()
        .zip(accs)
        .map(|(mut row, group_accs)| {
            row.extend(group_accs.iter().map(Acc::finish));
            row
        })
        .collect();

    Ok(Table::new(columns, rows))
}

/// Append `share_name` = `measure` / (sum of `measure` over all rows sharing
/// `partition_keys`). A partition whose total is zero yields null shares
/// rather than a division error.
pub fn share_of_total(
    table: &Table,
    share_name: &str,
    measure: &str,
    partition_keys: &[&str],
) -> Result<Table> {
    let measure_idx = table.col_index(measure)?;
    let part_indices: Vec<usize> = partition_keys
        .iter()
        .map(|c| table.col_index(c))
        .collect::<Result<_>>()?;

    let mut totals: HashMap<Vec<Option<String>>, f64> = HashMap::new();
    for row in table.rows() {
        let part: Vec<Option<String>> = part_indices.iter().map(|&i| row[i].key()).collect();
        if let Some(v) = row[measure_idx].as_num() {
            *totals.entry(part).or_insert(0.0) += v;
        }
    }

    let shares = table
        .rows()
        .iter()
        .map(|row| {
            let part: Vec<Option<String>> = part_indices.iter().map(|&i| row[i].key()).collect();
            let total = totals.get(&part).copied().unwrap_or(0.0);
            match row[measure_idx].as_num() {
                Some(v) if total != 0.0 => Cell::Num(v / total),
                _ => Cell::Null,
            }
        })
        .collect();

    Ok(table.with_column(share_name, shares))
}

/// A closed numeric bound on one mart column; nulls are not counted against
/// it.
#[derive(Debug, Clone, Copy)]
pub struct Bound {
    pub column: &'static str,
    pub min: f64,
    pub max: f64,
}

impl Bound {
    pub const fn at_least(column: &'static str, min: f64) -> Bound {
        Bound {
            column,
            min,
            max: f64::INFINITY,
        }
    }
}

/// A share-of-total column and the partition its values must sum to 1 over.
#[derive(Debug, Clone, Copy)]
pub struct ShareSpec {
    pub column: &'static str,
    pub partition: &'static [&'static str],
}

/// Everything a mart must satisfy before it is persisted.
#[derive(Debug, Clone, Copy)]
pub struct MartRules {
    pub grain: &'static [&'static str],
    pub bounds: &'static [Bound],
    pub shares: &'static [ShareSpec],
}

/// Validate one mart: unique non-null grain, declared bounds, and share
/// columns in [0,1] that sum to 1 per partition (within tolerance; partitions
/// whose shares are all null, i.e. zero totals, are exempt).
pub fn validate_mart(table: &Table, rules: &MartRules) -> Result<()> {
    for &col in rules.grain {
        let nulls = table
            .column(col)?
            .iter()
            .filter(|c| c.is_null())
            .count();
        if nulls > 0 {
            return Err(PipelineError::NullGrain {
                column: col.to_string(),
                nulls,
            });
        }
    }

    let grain_indices: Vec<usize> = rules
        .grain
        .iter()
        .map(|c| table.col_index(c))
        .collect::<Result<_>>()?;
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    for row in table.rows() {
        let key: Vec<String> = grain_indices
            .iter()
            .map(|&i| row[i].key().unwrap_or_default())
            .collect();
        if !seen.insert(key.clone()) {
            return Err(PipelineError::Grain {
                grain: rules.grain.iter().map(|c| c.to_string()).collect(),
                example: key.join(", "),
            });
        }
    }

    for bound in rules.bounds {
        let violations = table
            .column(bound.column)?
            .iter()
            .filter_map(|c| c.as_num())
            .filter(|v| *v < bound.min || *v > bound.max)
            .count();
        if violations > 0 {
            return Err(PipelineError::Range {
                column: bound.column.to_string(),
                min: bound.min,
                max: bound.max,
                violations,
            });
        }
    }

    for share in rules.shares {
        validate_share(table, share)?;
    }

    info!(rows = table.num_rows(), grain = ?rules.grain, "mart validated");
    Ok(())
}

fn validate_share(table: &Table, share: &ShareSpec) -> Result<()> {
    let idx = table.col_index(share.column)?;
    let part_indices: Vec<usize> = share
        .partition
        .iter()
        .map(|c| table.col_index(c))
        .collect::<Result<_>>()?;

    let out_of_range = table
        .rows()
        .iter()
        .filter_map(|row| row[idx].as_num())
        .filter(|v| *v < -SHARE_EPS || *v > 1.0 + SHARE_EPS)
        .count();
    if out_of_range > 0 {
        return Err(PipelineError::ShareRange {
            column: share.column.to_string(),
            violations: out_of_range,
        });
    }

    // partitions with all-null shares (zero totals) never enter the map
    let mut sums: HashMap<Vec<Option<String>>, f64> = HashMap::new();
    for row in table.rows() {
        let part: Vec<Option<String>> = part_indices.iter().map(|&i| row[i].key()).collect();
        if let Some(v) = row[idx].as_num() {
            *sums.entry(part).or_insert(0.0) += v;
        }
    }

    for (part, sum) in &sums {
        if (sum - 1.0).abs() > SHARE_SUM_TOL {
            let name: Vec<String> = part
                .iter()
                .map(|k| k.clone().unwrap_or_else(|| "null".to_string()))
                .collect();
            return Err(PipelineError::ShareSum {
                column: share.column.to_string(),
                partition: name.join(", "),
                sum: *sum,
            });
        }
    }
    Ok(())
}
