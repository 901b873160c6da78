// src/recording/mod.rs
//! Audit recording and export
//!
//! This module keeps a bounded record of intercepted traffic:
//!
//! - **Audit Log**: per-domain store with filters, FIFO eviction and sequence numbers
//! - **Domain**: fixed column layouts and host pre-filters
//! - **Filter**: `+`/`-`/`!` prefixed substring filters
//! - **Exporter**: CSV and JSON-lines export, to memory or file
//!
//! # Architecture
//!
//! ```text
//! Audit tap → add_entry() → pre-filters → key/value filters → truncate
//!                                                                ↓
//!                                             BTreeMap<seq, entry> (≤ max_entries)
//!                                                                ↓
//!                                              snapshot() / export_csv(after)
//! ```

pub mod audit_log;
pub mod domain;
pub mod exporter;
pub mod filter;

// Re-export commonly used types
pub use audit_log::{
    AddOutcome, AuditConfig, AuditEntry, AuditLogStore, AuditRecord, AuditStats, DropReason,
    ExportSummary,
};
pub use domain::AuditDomain;
pub use exporter::{ExportFormat, Exporter};
pub use filter::FilterSet;
