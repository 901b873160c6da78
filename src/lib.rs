// src/lib.rs
//! Sentra Lab Policy Layer
//!
//! In-process runtime policies that sit behind a call-interception engine:
//! several independent policies share hooked call sites, intercepted traffic
//! is kept in bounded audit logs, and features that want an expensive shared
//! resource switched off coordinate through an arbiter.
//!
//! # Architecture
//!
//! - **interception**: engine contract, per-point hook chains, URL routing table
//! - **recording**: bounded audit log stores, filters and export
//! - **arbitration**: resource arbiter, lifecycle controllers, termination guard
//! - **policies**: concrete handlers (audit taps, blocklist, rewriter, dialogs)
//! - **install**: process-wide wiring of all of the above
//! - **observability**: tracing subscriber and Prometheus recorder setup
//! - **utils**: configuration and errors

pub mod arbitration;
pub mod install;
pub mod interception;
pub mod observability;
pub mod policies;
pub mod recording;
pub mod utils;

// Re-export commonly used types
pub use arbitration::{ArbitrationController, ControllerMode, ResourceArbiter, ResourceGate};
pub use install::{PointCatalog, PolicyRuntime};
pub use interception::{ChainMode, HookChainRegistry, InterceptionEngine, PolicyHandler};
pub use recording::{AuditDomain, AuditLogStore};
pub use utils::config::PolicyConfig;
pub use utils::errors::{PolicyError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
