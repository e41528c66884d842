use anyhow::Result;
use medimart::{
    config::{default_data_root, today_str, RunPaths},
    pipeline,
};

/// `load_duckdb [run_date]` — replace the warehouse tables from this run's
/// mart snapshots.
fn main() -> Result<()> {
    medimart::init_tracing();

    let run_date = std::env::args().nth(1).unwrap_or_else(today_str);
    let paths = RunPaths::new(default_data_root(), &run_date);

    let marts: Vec<_> = [
        pipeline::MART_PRESCRIBER_DRUG_YEAR,
        pipeline::MART_PRESCRIBER_YEAR,
        pipeline::MART_DRUG_YEAR,
    ]
    .iter()
    .map(|name| (name.to_string(), paths.mart_path(name)))
    .collect();

    pipeline::run_warehouse_load(&paths, &marts)?;
    println!("warehouse updated: {}", paths.duckdb_path().display());
    Ok(())
}
