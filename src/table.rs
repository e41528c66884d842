// src/table.rs

use crate::error::{PipelineError, Result};
use serde_json::Value;

/// A single field value. Raw API payloads arrive as JSON strings and numbers;
/// validation coerces designated columns to `Num`.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Str(String),
    Num(f64),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Cell::Num(v) => Some(*v),
            _ => None,
        }
    }

    /// Canonical string rendering, used for join and group keys.
    /// `Num(1234.0)` renders as `"1234"` so ids survive a float round-trip.
    pub fn key(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Str(s) => Some(s.clone()),
            Cell::Num(v) => Some(fmt_num(*v)),
        }
    }

    pub fn from_json(v: &Value) -> Cell {
        match v {
            Value::Null => Cell::Null,
            Value::String(s) => Cell::Str(s.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) => Cell::Num(f),
                None => Cell::Str(n.to_string()),
            },
            Value::Bool(b) => Cell::Str(b.to_string()),
            other => Cell::Str(other.to_string()),
        }
    }
}

pub fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// An ordered, column-named table: one `Vec<Cell>` per row, one name per
/// column. Operations return new tables rather than mutating in place, so two
/// stages never alias the same data.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Table {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Table { columns, rows }
    }

    /// Build a table from flat JSON objects. Column order is first-seen order
    /// across all records; fields absent from a record become `Null`.
    pub fn from_records(records: &[Value]) -> Table {
        let mut columns: Vec<String> = Vec::new();
        for rec in records {
            if let Value::Object(map) = rec {
                for key in map.keys() {
                    if !columns.iter().any(|c| c == key) {
                        columns.push(key.clone());
                    }
                }
            }
        }

        let rows = records
            .iter()
            .map(|rec| {
                columns
                    .iter()
                    .map(|c| match rec.get(c) {
                        Some(v) => Cell::from_json(v),
                        None => Cell::Null,
                    })
                    .collect()
            })
            .collect();

        Table { columns, rows }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn col_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| PipelineError::UnknownColumn {
                column: name.to_string(),
            })
    }

    /// All cells of one column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<&Cell>> {
        let idx = self.col_index(name)?;
        Ok(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// A copy of this table with `name` replaced (or appended) by `cells`.
    pub fn with_column(&self, name: &str, cells: Vec<Cell>) -> Table {
        assert_eq!(cells.len(), self.rows.len(), "column length mismatch");
        let mut columns = self.columns.clone();
        let mut rows = self.rows.clone();
        match columns.iter().position(|c| c == name) {
            Some(idx) => {
                for (row, cell) in rows.iter_mut().zip(cells) {
                    row[idx] = cell;
                }
            }
            None => {
                columns.push(name.to_string());
                for (row, cell) in rows.iter_mut().zip(cells) {
                    row.push(cell);
                }
            }
        }
        Table { columns, rows }
    }

    /// A copy with columns renamed per `(from, to)` pairs; unknown names are
    /// ignored so a shared rename map can serve several sources.
    pub fn rename(&self, mapping: &[(&str, &str)]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                mapping
                    .iter()
                    .find(|(from, _)| from == c)
                    .map(|(_, to)| to.to_string())
                    .unwrap_or_else(|| c.clone())
            })
            .collect();
        Table {
            columns,
            rows: self.rows.clone(),
        }
    }

    /// A copy sorted descending by a numeric column, nulls last.
    pub fn sort_desc_by(&self, name: &str) -> Result<Table> {
        let idx = self.col_index(name)?;
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            let x = a[idx].as_num();
            let y = b[idx].as_num();
            y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(Table {
            columns: self.columns.clone(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_records_keeps_order_and_fills_nulls() {
        let recs = vec![
            json!({"a": "1", "b": 2}),
            json!({"b": 3, "c": "x"}),
        ];
        let t = Table::from_records(&recs);
        assert_eq!(t.columns(), &["a", "b", "c"]);
        assert_eq!(t.num_rows(), 2);
        assert_eq!(t.rows()[0][2], Cell::Null);
        assert_eq!(t.rows()[1][0], Cell::Null);
        assert_eq!(t.rows()[1][1], Cell::Num(3.0));
    }

    #[test]
    fn key_drops_float_artifact() {
        assert_eq!(Cell::Num(1234567890.0).key().unwrap(), "1234567890");
        assert_eq!(Cell::Num(1.5).key().unwrap(), "1.5");
        assert!(Cell::Null.key().is_none());
    }

    #[test]
    fn with_column_replaces_without_touching_original() {
        let recs = vec![json!({"a": "1"}), json!({"a": "2"})];
        let t = Table::from_records(&recs);
        let t2 = t.with_column("a", vec![Cell::Num(1.0), Cell::Num(2.0)]);
        assert_eq!(t.rows()[0][0], Cell::Str("1".into()));
        assert_eq!(t2.rows()[0][0], Cell::Num(1.0));
    }
}
