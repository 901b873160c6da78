// src/policies/audit_taps.rs
//! Observer handlers that feed the audit stores

use crate::interception::engine::{CallFrame, Decision, PolicyHandler};
use crate::recording::audit_log::{AddOutcome, AuditLogStore, AuditRecord};
use std::sync::Arc;
use tracing::trace;

fn record(store: &AuditLogStore, record: AuditRecord) {
    if let AddOutcome::Dropped(reason) = store.add_entry(record) {
        trace!(domain = %store.domain(), "Audit entry dropped: {}", reason.as_str());
    }
}

/// Records the host (arg 0) and optional port (arg 1) of resolve/connect calls
pub struct HostAuditTap {
    store: Arc<AuditLogStore>,
}

impl HostAuditTap {
    pub fn new(store: Arc<AuditLogStore>) -> Self {
        Self { store }
    }
}

impl PolicyHandler for HostAuditTap {
    fn name(&self) -> &str {
        "host-audit"
    }

    fn before(&self, frame: &CallFrame) -> anyhow::Result<Option<Decision>> {
        if let Some(host) = frame.arg_text(0) {
            record(
                &self.store,
                AuditRecord::new()
                    .field("host", host)
                    .optional("port", frame.arg_text(1)),
            );
        }
        Ok(None)
    }
}

/// Records header name (arg 0) and value (arg 1)
pub struct HeaderAuditTap {
    store: Arc<AuditLogStore>,
}

impl HeaderAuditTap {
    pub fn new(store: Arc<AuditLogStore>) -> Self {
        Self { store }
    }
}

impl PolicyHandler for HeaderAuditTap {
    fn name(&self) -> &str {
        "header-audit"
    }

    fn before(&self, frame: &CallFrame) -> anyhow::Result<Option<Decision>> {
        if let Some(name) = frame.arg_text(0) {
            record(
                &self.store,
                AuditRecord::new()
                    .field("name", name)
                    .optional("value", frame.arg_text(1)),
            );
        }
        Ok(None)
    }
}

/// Records key-value storage reads once the value is known
///
/// The frame target is the store's file name, arg 0 the key and arg 1 the
/// default the caller supplied.
pub struct StorageAuditTap {
    store: Arc<AuditLogStore>,
}

impl StorageAuditTap {
    pub fn new(store: Arc<AuditLogStore>) -> Self {
        Self { store }
    }
}

impl PolicyHandler for StorageAuditTap {
    fn name(&self) -> &str {
        "storage-audit"
    }

    fn after(&self, frame: &CallFrame) -> anyhow::Result<Option<Decision>> {
        let Some(key) = frame.arg_text(0) else {
            return Ok(None);
        };

        record(
            &self.store,
            AuditRecord::new()
                .field("method", &frame.method)
                .optional("fileName", frame.target.as_deref())
                .field("key", key)
                .optional("value", frame.result_text())
                .optional("defaultValue", frame.arg_text(1)),
        );
        Ok(None)
    }
}
