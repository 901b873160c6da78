// src/recording/exporter.rs
//! Export audit logs to files
//!
//! Supports:
//! - CSV (header row, RFC 4180 quoting)
//! - JSON lines (one entry object per line)
//!
//! File writes run on Tokio's blocking pool so callers on async or
//! latency-sensitive threads never wait on disk I/O.

use crate::recording::audit_log::{AuditLogStore, ExportSummary};
use crate::utils::errors::{PolicyError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-separated values
    Csv,

    /// Newline-delimited JSON
    JsonLines,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::JsonLines => "jsonl",
        }
    }
}

/// Exporter for audit logs
pub struct Exporter {
    format: ExportFormat,
}

impl Exporter {
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    /// Export entries after `after` to a string
    pub fn export(&self, store: &AuditLogStore, after: u64) -> Result<String> {
        debug!(
            "Exporting {} audit log to {:?} format",
            store.domain(),
            self.format
        );

        let mut buffer = Vec::new();
        self.write(store, &mut buffer, after)?;
        String::from_utf8(buffer)
            .map_err(|e| PolicyError::ExportFailed(format!("Export is not UTF-8: {}", e)))
    }

    fn write(&self, store: &AuditLogStore, out: &mut Vec<u8>, after: u64) -> Result<ExportSummary> {
        match self.format {
            ExportFormat::Csv => store.export_csv(out, after),
            ExportFormat::JsonLines => store.export_json_lines(out, after),
        }
    }

    /// Export entries after `after` into `path`, replacing the file
    pub async fn export_to_file(
        &self,
        store: Arc<AuditLogStore>,
        path: impl AsRef<Path>,
        after: u64,
    ) -> Result<ExportSummary> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let format = self.format;

        let summary = tokio::task::spawn_blocking(move || -> Result<ExportSummary> {
            let file = File::create(&path)?;
            let summary = match format {
                ExportFormat::Csv => store.export_csv(file, after)?,
                ExportFormat::JsonLines => store.export_json_lines(file, after)?,
            };
            info!(
                "Exported {} {} audit entries to {:?}",
                summary.rows,
                store.domain(),
                path
            );
            Ok(summary)
        })
        .await
        .map_err(|e| PolicyError::ExportFailed(format!("Export task failed: {}", e)))??;

        Ok(summary)
    }

    /// Default file name for a store, e.g. `hosts.csv`
    pub fn file_name(&self, store: &AuditLogStore) -> String {
        format!("{}.{}", store.domain(), self.format.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::audit_log::{AuditConfig, AuditRecord};
    use crate::recording::domain::AuditDomain;

    fn create_test_store() -> Arc<AuditLogStore> {
        let store = AuditLogStore::new(AuditDomain::Hosts, AuditConfig::default());
        store.add_entry(AuditRecord::new().field("host", "api.example.com").field("port", 443));
        store.add_entry(AuditRecord::new().field("host", "cdn.example.com").field("port", 80));
        Arc::new(store)
    }

    #[test]
    fn test_csv_export() {
        let exporter = Exporter::new(ExportFormat::Csv);
        let csv = exporter.export(&create_test_store(), 0).unwrap();

        assert!(csv.starts_with("seq,timestamp,host,port\n"));
        assert!(csv.contains("api.example.com"));
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_json_lines_export() {
        let exporter = Exporter::new(ExportFormat::JsonLines);
        let json = exporter.export(&create_test_store(), 1).unwrap();

        assert_eq!(json.lines().count(), 1);
        assert!(json.contains("cdn.example.com"));
    }

    #[test]
    fn test_file_name() {
        let exporter = Exporter::new(ExportFormat::JsonLines);
        assert_eq!(exporter.file_name(&create_test_store()), "hosts.jsonl");
    }

    #[tokio::test]
    async fn test_export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.csv");
        let exporter = Exporter::new(ExportFormat::Csv);

        let summary = exporter
            .export_to_file(create_test_store(), &path, 0)
            .await
            .unwrap();

        assert_eq!(summary.rows, 2);
        assert_eq!(summary.last_sequence, 2);
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("cdn.example.com"));
    }

    #[tokio::test]
    async fn test_export_io_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("hosts.csv");
        let exporter = Exporter::new(ExportFormat::Csv);

        let result = exporter.export_to_file(create_test_store(), &path, 0).await;
        assert!(matches!(result, Err(PolicyError::Io(_))));
    }
}
