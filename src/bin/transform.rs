use anyhow::Result;
use medimart::{
    config::{default_data_root, today_str, RunPaths},
    pipeline,
};

/// `transform [run_date]` — validate both raw sources, join, write the clean
/// snapshot.
fn main() -> Result<()> {
    medimart::init_tracing();

    let run_date = std::env::args().nth(1).unwrap_or_else(today_str);
    let paths = RunPaths::new(default_data_root(), &run_date);
    let out = pipeline::run_transform(&paths)?;
    println!("clean snapshot: {}", out.display());
    Ok(())
}
