// src/policies/mod.rs
//! Concrete policies built on the hook chains
//!
//! Argument layout each policy expects from the engine adapter:
//!
//! | point           | args                      | target    | result |
//! |-----------------|---------------------------|-----------|--------|
//! | resolve host    | host                      |           |        |
//! | connect socket  | host, port                |           |        |
//! | set header      | name, value               |           |        |
//! | read storage    | key, default value        | file name | value  |
//! | construct URL   | url                       |           |        |
//! | show dialog     | title, message            |           |        |

pub mod audit_taps;
pub mod dialog;
pub mod network;

// Re-export commonly used types
pub use audit_taps::{HeaderAuditTap, HostAuditTap, StorageAuditTap};
pub use dialog::DialogSuppressor;
pub use network::{HostBlocklist, UrlRewriter};
