// src/config.rs

use chrono::Local;
use std::path::{Path, PathBuf};

/// Where one CMS dataset lives. The data API serves
/// `{base_url}/{dataset_id}/data` with `offset`/`size` paging.
#[derive(Debug, Clone)]
pub struct DatasetSource {
    /// Short name used for the raw page directory, e.g. `cms_partd`.
    pub name: String,
    pub base_url: String,
    pub dataset_id: String,
}

impl DatasetSource {
    pub fn new(name: &str, base_url: &str, dataset_id: &str) -> DatasetSource {
        DatasetSource {
            name: name.to_string(),
            base_url: base_url.to_string(),
            dataset_id: dataset_id.to_string(),
        }
    }

    pub fn data_url(&self) -> String {
        format!("{}/{}/data", self.base_url, self.dataset_id)
    }
}

/// Every path one pipeline run touches, rooted at a data directory and scoped
/// by run date. Built once per invocation and passed down; nothing reads
/// these out of ambient globals.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub data_root: PathBuf,
    pub run_date: String,
}

impl RunPaths {
    pub fn new(data_root: impl Into<PathBuf>, run_date: &str) -> RunPaths {
        RunPaths {
            data_root: data_root.into(),
            run_date: run_date.to_string(),
        }
    }

    /// Raw page directory for one source and this run: `raw/<source>/<date>`.
    pub fn raw_run_dir(&self, source: &str) -> PathBuf {
        self.data_root.join("raw").join(source).join(&self.run_date)
    }

    pub fn clean_dir(&self) -> PathBuf {
        self.data_root.join("clean")
    }

    pub fn clean_path(&self) -> PathBuf {
        self.clean_dir().join(format!(
            "medicare_partd_provider_clean_{}.parquet",
            self.run_date
        ))
    }

    pub fn mart_dir(&self) -> PathBuf {
        self.data_root.join("mart")
    }

    pub fn mart_path(&self, mart_name: &str) -> PathBuf {
        self.mart_dir()
            .join(format!("{}_{}.parquet", mart_name, self.run_date))
    }

    pub fn duckdb_path(&self) -> PathBuf {
        self.data_root.join("medicare_part_d.duckdb")
    }
}

/// Default data root relative to the working directory.
pub fn default_data_root() -> PathBuf {
    Path::new("data").to_path_buf()
}

pub fn today_str() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}
