//! Metrics sinks

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{MetricsError, MetricsRecord};

/// Destination for per-query metrics records
pub trait MetricsSink: Send + Sync {
    /// Append one record
    fn record(&self, record: &MetricsRecord) -> Result<(), MetricsError>;
}

/// Appends records to a CSV file.
///
/// The file is opened for each append and closed before returning. A header
/// row is written when the file is new or empty; missing parent directories
/// are created. Appends through one sink never interleave.
pub struct CsvMetricsSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvMetricsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for CsvMetricsSink {
    fn record(&self, record: &MetricsRecord) -> Result<(), MetricsError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;

        tracing::debug!(
            path = %self.path.display(),
            header = needs_header,
            "Appended metrics record"
        );
        Ok(())
    }
}

/// Keeps records in memory, for tests and embedding
#[derive(Default)]
pub struct MemoryMetricsSink {
    records: Mutex<Vec<MetricsRecord>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl MetricsSink for MemoryMetricsSink {
    fn record(&self, record: &MetricsRecord) -> Result<(), MetricsError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }
}
