// src/interception/mod.rs
//! Call interception layer
//!
//! This module is the boundary between the interception engine and the
//! policies that react to intercepted calls:
//!
//! - **Engine**: typed contract with the external engine (points, frames, decisions)
//! - **Hook Chain**: per-point handler chains with install-once hooking
//! - **Routing Table**: domain to replacement-origin mapping for URL rewrites
//!
//! # Architecture
//!
//! ```text
//! Application Code (Unmodified)
//!     │
//!     └─ hooked call → Interception Engine → HookChain (snapshot)
//!                                               ├─ handler 1
//!                                               ├─ handler 2   (decisive: first decision wins)
//!                                               └─ handler N   (observer: all run)
//! ```

pub mod engine;
pub mod hook_chain;
pub mod routing_table;

// Re-export commonly used types
pub use engine::{
    CallFrame, CallOutcome, Decision, InterceptCallbacks, InterceptionEngine, InterceptionPoint,
    Phase, PolicyHandler,
};
pub use hook_chain::{ChainMode, DispatchReport, HookChain, HookChainRegistry};
pub use routing_table::{Route, RoutingTable};
