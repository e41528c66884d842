use anyhow::Result;
use medimart::{
    config::{default_data_root, today_str, RunPaths},
    pipeline,
};

/// `ingest_partd [run_date] [max_rows]`
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
    let total = pipeline::run_ingest(&paths, pipeline::partd_source(), max_rows).await?;
    println!(
        "{} rows persisted under {}",
        total,
        paths.raw_run_dir(pipeline::PARTD_SOURCE).display()
    );
    Ok(())
}
