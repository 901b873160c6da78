// src/arbitration/arbiter.rs
//! Reference-counted arbitration of a shared resource
//!
//! Several features can ask for the same expensive switch (e.g. "networking
//! allowed") to be turned off. Each feature holds a [`ResourceKey`]; the
//! resource is suppressed while at least one key is held and restored only
//! when the last key is released.
//!
//! Gate calls may block. Requests issued from the primary thread are queued
//! to a worker that runs them on Tokio's blocking pool, in submission order.

use crate::observability::names;
use crate::utils::errors::PolicyError;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// External operation that actually flips the resource
pub trait ResourceGate: Send + Sync {
    fn suppress(&self) -> anyhow::Result<()>;
    fn restore(&self) -> anyhow::Result<()>;
}

/// Identity of one requester
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Whether the resource is currently available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Enabled,
    Disabled,
}

/// Point-in-time view of an arbiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArbiterStatus {
    pub resource: String,
    pub state: ResourceState,
    pub requested_keys: Vec<String>,
    pub gate_calls: u64,
    pub gate_failures: u64,
}

/// The thread that must never block on gate calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrimaryThread(Option<ThreadId>);

impl PrimaryThread {
    /// No primary thread; every request runs inline
    pub fn none() -> Self {
        Self(None)
    }

    /// The calling thread becomes the primary thread
    pub fn current() -> Self {
        Self(Some(thread::current().id()))
    }

    pub fn from_id(id: ThreadId) -> Self {
        Self(Some(id))
    }

    pub fn is_current(&self) -> bool {
        self.0 == Some(thread::current().id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Suppress,
    Restore,
    /// Call the gate again for a key that is still held
    Reassert,
}

#[derive(Debug, Clone, Copy)]
enum GateOp {
    Suppress,
    Restore,
}

impl GateOp {
    fn as_str(&self) -> &'static str {
        match self {
            GateOp::Suppress => "suppress",
            GateOp::Restore => "restore",
        }
    }
}

#[derive(Debug, Default)]
struct ArbitrationState {
    requested_keys: BTreeSet<ResourceKey>,
    resource_suppressed: bool,
}

struct ArbiterInner {
    resource: String,
    gate: Arc<dyn ResourceGate>,
    /// Held for a whole transition, gate call included
    gate_lock: Mutex<()>,
    /// Never held across a gate call
    state: Mutex<ArbitrationState>,
    // mirrors `resource_suppressed` so readers never wait behind a gate call
    suppressed: AtomicBool,
    gate_calls: AtomicU64,
    gate_failures: AtomicU64,
}

impl ArbiterInner {
    fn apply(&self, transition: Transition, key: &ResourceKey) -> ResourceState {
        // serializes transitions; `state` is only held to decide and to commit
        let _serial = self.gate_lock.lock();

        let op = self.decide(transition, key);
        let suppressed = match op {
            Some(op) => {
                let succeeded = self.call_gate(op);
                let mut state = self.state.lock();
                if succeeded {
                    state.resource_suppressed = matches!(op, GateOp::Suppress);
                }
                state.resource_suppressed
            }
            None => self.state.lock().resource_suppressed,
        };

        self.suppressed.store(suppressed, Ordering::Release);
        to_state(suppressed)
    }

    /// Update the key set and pick the gate call, if any
    fn decide(&self, transition: Transition, key: &ResourceKey) -> Option<GateOp> {
        let mut state = self.state.lock();

        match transition {
            Transition::Suppress => {
                state.requested_keys.insert(key.clone());
                if state.resource_suppressed {
                    trace!(resource = %self.resource, key = %key, "Already suppressed");
                    return None;
                }
                debug!(resource = %self.resource, key = %key, "Suppress requested");
                Some(GateOp::Suppress)
            }
            Transition::Reassert => {
                if state.requested_keys.contains(key) {
                    Some(GateOp::Suppress)
                } else {
                    trace!(resource = %self.resource, key = %key, "Key released, skipping reassert");
                    None
                }
            }
            Transition::Restore => {
                state.requested_keys.remove(key);
                if !state.requested_keys.is_empty() {
                    debug!(
                        resource = %self.resource,
                        key = %key,
                        holders = state.requested_keys.len(),
                        "Restore deferred, resource still held"
                    );
                    None
                } else if state.resource_suppressed {
                    debug!(resource = %self.resource, key = %key, "Last holder released");
                    Some(GateOp::Restore)
                } else {
                    None
                }
            }
        }
    }

    fn call_gate(&self, op: GateOp) -> bool {
        self.gate_calls.fetch_add(1, Ordering::Relaxed);

        let outcome = catch_unwind(AssertUnwindSafe(|| match op {
            GateOp::Suppress => self.gate.suppress(),
            GateOp::Restore => self.gate.restore(),
        }));

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(_) => Some("gate panicked".to_string()),
        };

        let label = if error.is_none() { "ok" } else { "error" };
        metrics::counter!(
            names::GATE_CALLS_TOTAL,
            "resource" => self.resource.clone(),
            "op" => op.as_str(),
            "outcome" => label
        )
        .increment(1);

        match error {
            None => {
                info!(resource = %self.resource, "Gate {} succeeded", op.as_str());
                true
            }
            Some(reason) => {
                self.gate_failures.fetch_add(1, Ordering::Relaxed);
                let err = PolicyError::GateFailed(format!("{} {}: {}", self.resource, op.as_str(), reason));
                warn!(resource = %self.resource, "{}, state unchanged", err);
                false
            }
        }
    }
}

fn to_state(suppressed: bool) -> ResourceState {
    if suppressed {
        ResourceState::Disabled
    } else {
        ResourceState::Enabled
    }
}

enum Command {
    Apply(Transition, ResourceKey),
    Flush(oneshot::Sender<()>),
}

/// Shared arbiter for one resource
///
/// Cheap to clone; clones share state, gate and worker.
#[derive(Clone)]
pub struct ResourceArbiter {
    inner: Arc<ArbiterInner>,
    primary: PrimaryThread,
    runtime: Handle,
    queue: mpsc::UnboundedSender<Command>,
}

impl ResourceArbiter {
    /// Create an arbiter and start its worker on `runtime`
    pub fn new(
        resource: impl Into<String>,
        gate: Arc<dyn ResourceGate>,
        primary: PrimaryThread,
        runtime: Handle,
    ) -> Self {
        let inner = Arc::new(ArbiterInner {
            resource: resource.into(),
            gate,
            gate_lock: Mutex::new(()),
            state: Mutex::new(ArbitrationState::default()),
            suppressed: AtomicBool::new(false),
            gate_calls: AtomicU64::new(0),
            gate_failures: AtomicU64::new(0),
        });

        let (queue, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_worker(Arc::clone(&inner), rx));

        Self {
            inner,
            primary,
            runtime,
            queue,
        }
    }

    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Hold the resource suppressed on behalf of `key`
    pub fn request_suppress(&self, key: &ResourceKey) {
        self.dispatch(Transition::Suppress, key);
    }

    /// Release `key`; the resource is restored once no key is held
    pub fn request_restore(&self, key: &ResourceKey) {
        self.dispatch(Transition::Restore, key);
    }

    /// Re-run the suppress gate for a key that is still held
    pub fn reassert_suppress(&self, key: &ResourceKey) {
        self.dispatch(Transition::Reassert, key);
    }

    /// Suppress on the calling thread, whatever thread it is
    pub fn request_suppress_blocking(&self, key: &ResourceKey) -> ResourceState {
        self.inner.apply(Transition::Suppress, key)
    }

    /// Queue a transition for the worker and return immediately
    pub(crate) fn submit(&self, transition: Transition, key: &ResourceKey) {
        if self
            .queue
            .send(Command::Apply(transition, key.clone()))
            .is_err()
        {
            warn!(resource = %self.inner.resource, "Arbiter worker stopped, dropping {:?}", transition);
        }
    }

    fn dispatch(&self, transition: Transition, key: &ResourceKey) {
        if self.primary.is_current() {
            trace!(resource = %self.inner.resource, "Redispatching {:?} off primary thread", transition);
            self.submit(transition, key);
        } else {
            self.inner.apply(transition, key);
        }
    }

    /// Wait until every transition queued so far has been applied
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.queue.send(Command::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> ResourceState {
        to_state(self.inner.suppressed.load(Ordering::Acquire))
    }

    pub fn status(&self) -> ArbiterStatus {
        let state = self.inner.state.lock();
        ArbiterStatus {
            resource: self.inner.resource.clone(),
            state: to_state(state.resource_suppressed),
            requested_keys: state
                .requested_keys
                .iter()
                .map(|key| key.to_string())
                .collect(),
            gate_calls: self.inner.gate_calls.load(Ordering::Relaxed),
            gate_failures: self.inner.gate_failures.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(inner: Arc<ArbiterInner>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Apply(transition, key) => {
                let inner = Arc::clone(&inner);
                let resource = inner.resource.clone();
                let result = tokio::task::spawn_blocking(move || {
                    inner.apply(transition, &key);
                })
                .await;
                if let Err(e) = result {
                    warn!(resource = %resource, "Arbiter transition task failed: {}", e);
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Arbiter worker stopped");
}
