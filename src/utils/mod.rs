// src/utils/mod.rs
//! Common utilities shared by every layer
//!
//! - **errors**: crate-wide error type and `Result` alias
//! - **config**: typed configuration loaded from file and environment

pub mod config;
pub mod errors;

pub use config::PolicyConfig;
pub use errors::{PolicyError, Result};
