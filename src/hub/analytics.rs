//! Append-only trigger log used for the dashboard's analytics summary.
//!
//! One JSON object per line: `{"node_id":"object1","at":"2025-01-01T08:30:00Z"}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub node_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub total_triggers: u64,
    pub per_node: BTreeMap<String, u64>,
    pub first_trigger: DateTime<Utc>,
    pub last_trigger: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AnalyticsLog {
    path: PathBuf,
}

impl AnalyticsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, record: &TriggerRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let mut line = serde_json::to_vec(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }

    /// Summarise the log. `None` when there is nothing to report.
    pub async fn summary(&self) -> std::io::Result<Option<AnalyticsSummary>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(summarise(&contents))
    }
}

fn summarise(contents: &str) -> Option<AnalyticsSummary> {
    let mut per_node: BTreeMap<String, u64> = BTreeMap::new();
    let mut total = 0u64;
    let mut first: Option<DateTime<Utc>> = None;
    let mut last: Option<DateTime<Utc>> = None;

    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(record) = serde_json::from_str::<TriggerRecord>(line) else {
            tracing::debug!("Skipping malformed analytics line");
            continue;
        };
        total += 1;
        *per_node.entry(record.node_id).or_default() += 1;
        first = Some(first.map_or(record.at, |f| f.min(record.at)));
        last = Some(last.map_or(record.at, |l| l.max(record.at)));
    }

    Some(AnalyticsSummary {
        total_triggers: total,
        per_node,
        first_trigger: first?,
        last_trigger: last?,
    })
}
