//! MetricsSource (consumed, §6): no concrete broker is specified, so the
//! shipped adapter reads a JSON snapshot written by whatever queue backend
//! the deployment actually uses (a sidecar, a cron job, the queue driver's
//! own exporter). Re-read every call; the controller never caches it.

use async_trait::async_trait;
use chrono::Utc;
use domain::{MetricsSource, QueueKey, QueueMetrics};
use serde::Deserialize;
use shared::{Error, Result};
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct SnapshotEntry {
    connection: String,
    queue: String,
    pending: u64,
    #[serde(default)]
    oldest_job_age_sec: u64,
    throughput_per_minute: f64,
    #[serde(default)]
    avg_job_duration_ms: f64,
    #[serde(default)]
    active_workers: u32,
}

/// Reads `{connection, queue, pending, oldest_job_age_sec,
/// throughput_per_minute, avg_job_duration_ms, active_workers}[]` from a JSON
/// file at `path`, refreshed on every `list_queues` call.
pub struct FileMetricsSource {
    path: PathBuf,
}

impl FileMetricsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MetricsSource for FileMetricsSource {
    async fn list_queues(&self) -> Result<Vec<(QueueKey, QueueMetrics)>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::MetricsUnavailable(format!("{}: {e}", self.path.display())))?;

        let entries: Vec<SnapshotEntry> = serde_json::from_str(&content)
            .map_err(|e| Error::MetricsUnavailable(format!("malformed metrics snapshot: {e}")))?;

        let now = Utc::now();
        Ok(entries
            .into_iter()
            .map(|e| {
                (
                    QueueKey::new(e.connection, e.queue),
                    QueueMetrics {
                        pending: e.pending,
                        oldest_job_age_sec: e.oldest_job_age_sec,
                        throughput_per_minute: e.throughput_per_minute,
                        avg_job_duration_ms: e.avg_job_duration_ms,
                        active_workers: e.active_workers,
                        measured_at: now,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn parses_snapshot_entries() {
        let mut file = tempfile_with_content(
            r#"[{"connection":"redis","queue":"default","pending":10,"oldest_job_age_sec":5,"throughput_per_minute":120.0,"avg_job_duration_ms":500.0,"active_workers":3}]"#,
        );
        let source = FileMetricsSource::new(file.path().to_path_buf());
        let queues = source.list_queues().await.unwrap();
        assert_eq!(queues.len(), 1);
        assert_eq!(queues[0].0, QueueKey::new("redis", "default"));
        assert_eq!(queues[0].1.pending, 10);
        file.flush().ok();
    }

    #[tokio::test]
    async fn missing_file_is_metrics_unavailable() {
        let source = FileMetricsSource::new("/nonexistent/path/metrics.json");
        let err = source.list_queues().await.unwrap_err();
        assert!(matches!(err, Error::MetricsUnavailable(_)));
    }

    fn tempfile_with_content(content: &str) -> NamedTempHandle {
        let dir = std::env::temp_dir();
        let path = dir.join(format!(
            "queue_autoscaler_test_metrics_{}.json",
            std::process::id()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        NamedTempHandle { path, file: f }
    }

    struct NamedTempHandle {
        path: PathBuf,
        file: std::fs::File,
    }

    impl NamedTempHandle {
        fn path(&self) -> &std::path::Path {
            &self.path
        }
        fn flush(&mut self) -> std::io::Result<()> {
            self.file.flush()
        }
    }

    impl Drop for NamedTempHandle {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
