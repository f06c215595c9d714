//! JSON-lines persistence
//!
//! Appends one record per line to `snapshots.jsonl`, `baselines.jsonl` and
//! `stress_results.jsonl` under a data directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use watchdog_lib::{Baseline, PersistenceSink, Snapshot, StressTestMetrics};

pub const SNAPSHOTS_FILE: &str = "snapshots.jsonl";
pub const BASELINES_FILE: &str = "baselines.jsonl";
pub const STRESS_RESULTS_FILE: &str = "stress_results.jsonl";

#[derive(Serialize)]
struct Tagged<'a, T> {
    test_id: &'a str,
    #[serde(flatten)]
    record: &'a T,
}

pub struct JsonlSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let path = self.dir.join(file);
        let _guard = self.write_lock.lock().await;
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        handle.write_all(line.as_bytes()).await?;
        handle.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceSink for JsonlSink {
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.append(SNAPSHOTS_FILE, snapshot).await
    }

    async fn save_baseline(&self, test_id: &str, baseline: &Baseline) -> Result<()> {
        self.append(
            BASELINES_FILE,
            &Tagged {
                test_id,
                record: baseline,
            },
        )
        .await
    }

    async fn save_stress_result(&self, _test_id: &str, metrics: &StressTestMetrics) -> Result<()> {
        self.append(STRESS_RESULTS_FILE, metrics).await
    }
}
