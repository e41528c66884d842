// src/store/mod.rs

pub mod duck;

use crate::error::Result;
use crate::table::{fmt_num, Cell, Table};
use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Persist `table` as a parquet snapshot at `path`, overwriting any previous
/// run's file. Columns whose non-null cells are all numeric become
/// `Float64`; everything else becomes `Utf8`.
pub fn write_parquet(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut fields = Vec::with_capacity(table.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns().len());

    for name in table.columns() {
        let cells = table.column(name)?;
        let all_numeric = cells
            .iter()
            .all(|c| matches!(c, Cell::Num(_) | Cell::Null));

        if all_numeric {
            let values: Float64Array = cells.iter().map(|c| c.as_num()).collect();
            fields.push(Field::new(name, DataType::Float64, true));
            arrays.push(Arc::new(values) as ArrayRef);
        } else {
            let values: StringArray = cells
                .iter()
                .map(|c| match c {
                    Cell::Null => None,
                    Cell::Str(s) => Some(s.clone()),
                    Cell::Num(v) => Some(fmt_num(*v)),
                })
                .collect();
            fields.push(Field::new(name, DataType::Utf8, true));
            arrays.push(Arc::new(values) as ArrayRef);
        }
    }

    let schema = Arc::new(ArrowSchema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(BufWriter::new(file), schema, None)?;
    writer.write(&batch)?;
    writer.close()?;

    info!(rows = table.num_rows(), path = %path.display(), "wrote parquet snapshot");
    Ok(())
}

/// Read a parquet snapshot back into a table. Numeric columns come back as
/// `Num` cells, strings as `Str`; anything else is rendered to its display
/// string.
pub fn read_parquet(path: &Path) -> Result<Table> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<Cell>> = Vec::new();

    for batch in reader {
        let batch = batch?;
        if columns.is_empty() {
            columns = batch
                .schema()
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect();
        }
        for i in 0..batch.num_rows() {
            let mut row = Vec::with_capacity(batch.num_columns());
            for arr in batch.columns() {
                row.push(cell_at(arr, i)?);
            }
            rows.push(row);
        }
    }

    Ok(Table::new(columns, rows))
}

fn cell_at(arr: &ArrayRef, i: usize) -> Result<Cell> {
    if arr.is_null(i) {
        return Ok(Cell::Null);
    }
    if let Some(floats) = arr.as_any().downcast_ref::<Float64Array>() {
        return Ok(Cell::Num(floats.value(i)));
    }
    if let Some(ints) = arr.as_any().downcast_ref::<Int64Array>() {
        return Ok(Cell::Num(ints.value(i) as f64));
    }
    if let Some(strings) = arr.as_any().downcast_ref::<StringArray>() {
        return Ok(Cell::Str(strings.value(i).to_string()));
    }
    Ok(Cell::Str(array_value_to_string(arr, i)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parquet_round_trip_preserves_rows_and_dtypes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clean").join("snapshot.parquet");

        let table = Table::from_records(&[
            json!({"npi": "1234567890", "total_claims": 40.0, "note": null}),
            json!({"npi": "9876543210", "total_claims": null, "note": "kept"}),
        ]);
        write_parquet(&table, &path).unwrap();
        let back = read_parquet(&path).unwrap();

        assert_eq!(back.columns(), table.columns());
        assert_eq!(back.num_rows(), 2);
        assert_eq!(
            back.column("npi").unwrap()[0],
            &Cell::Str("1234567890".into())
        );
        assert_eq!(back.column("total_claims").unwrap()[0], &Cell::Num(40.0));
        assert!(back.column("total_claims").unwrap()[1].is_null());
        assert_eq!(back.column("note").unwrap()[1], &Cell::Str("kept".into()));
    }

    #[test]
    fn overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.parquet");

        let first = Table::from_records(&[json!({"a": 1.0}), json!({"a": 2.0})]);
        write_parquet(&first, &path).unwrap();
        let second = Table::from_records(&[json!({"a": 3.0})]);
        write_parquet(&second, &path).unwrap();

        assert_eq!(read_parquet(&path).unwrap().num_rows(), 1);
    }
}
