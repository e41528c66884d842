use anyhow::Result;
use medimart::{
    config::{default_data_root, today_str, RunPaths},
    pipeline,
};

/// `build_marts [run_date] [claim_year]`
fn main() -> Result<()> {
    medimart::init_tracing();

    let mut args = std::env::args().skip(1);
    let run_date = args.next().unwrap_or_else(today_str);
    let claim_year = match args.next() {
        Some(s) => s.parse::<i32>()?,
        None => pipeline::DEFAULT_CLAIM_YEAR,
    };

    let paths = RunPaths::new(default_data_root(), &run_date);
    for (name, path) in pipeline::run_build_marts(&paths, claim_year)? {
        println!("{}: {}", name, path.display());
    }
    Ok(())
}
