use anyhow::Result;
use medimart::{
    config::{default_data_root, today_str, RunPaths},
    pipeline,
};
use tracing::info;

/// Run the whole pipeline in order: ingest both sources, transform, build
/// marts, load the warehouse. `medimart [run_date] [max_rows]`.
#[tokio::main]
async fn main() -> Result<()> {
    medimart::init_tracing();

    let mut args = std::env::args().skip(1);
    let run_date = args.next().unwrap_or_else(today_str);
    let max_rows = match args.next() {
        Some(s) => Some(s.parse::<usize>()?),
        None => None,
    };

    let paths = RunPaths::new(default_data_root(), &run_date);
    info!(run_date = %run_date, ?max_rows, "pipeline run start");

    let partd_rows = pipeline::run_ingest(&paths, pipeline::partd_source(), max_rows).await?;
    let provider_rows =
        pipeline::run_ingest(&paths, pipeline::provider_source(), max_rows).await?;
    info!(partd_rows, provider_rows, "ingest complete");

    let clean_path = pipeline::run_transform(&paths)?;
    info!(path = %clean_path.display(), "transform complete");

    let marts = pipeline::run_build_marts(&paths, pipeline::DEFAULT_CLAIM_YEAR)?;
    pipeline::run_warehouse_load(&paths, &marts)?;
    info!(db = %paths.duckdb_path().display(), "warehouse load complete");

    Ok(())
}
