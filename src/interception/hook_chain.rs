// src/interception/hook_chain.rs
//! Hook chain registry
//!
//! Several independent policies can share one interception point. Each point
//! gets a [`HookChain`]; the engine is asked to hook the point only once, on
//! the first registration, and every delivered call is fanned out to the
//! chain's handlers in registration order.
//!
//! Dispatch iterates over a snapshot of the handler list, so a registration
//! racing with an in-flight call never blocks on it and never corrupts it.

use crate::interception::engine::{
    CallFrame, Decision, InterceptCallbacks, InterceptionEngine, InterceptionPoint, Phase,
    PolicyHandler,
};
use crate::observability::names;
use crate::utils::errors::{PolicyError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// How a chain treats handler decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    /// First handler returning a decision wins; later handlers are skipped
    Decisive,

    /// Every handler runs; decisions are ignored
    Observer,
}

impl ChainMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainMode::Decisive => "decisive",
            ChainMode::Observer => "observer",
        }
    }
}

/// What happened during one dispatch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Handlers that were invoked
    pub invoked: usize,

    /// Handlers that returned an error or panicked
    pub faulted: usize,

    /// Name of the handler whose decision was applied (decisive chains only)
    pub decided_by: Option<String>,

    /// The applied decision
    pub decision: Option<Decision>,
}

/// Ordered handlers bound to one interception point
pub struct HookChain {
    point: InterceptionPoint,
    mode: ChainMode,
    handlers: Mutex<Vec<Arc<dyn PolicyHandler>>>,
    installed: AtomicBool,
    dispatched: AtomicU64,
}

impl HookChain {
    fn new(point: InterceptionPoint, mode: ChainMode) -> Self {
        Self {
            point,
            mode,
            handlers: Mutex::new(Vec::new()),
            installed: AtomicBool::new(false),
            dispatched: AtomicU64::new(0),
        }
    }

    pub fn point(&self) -> &InterceptionPoint {
        &self.point
    }

    pub fn mode(&self) -> ChainMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// Number of calls dispatched through this chain
    pub fn dispatch_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    fn push(&self, handler: Arc<dyn PolicyHandler>) {
        self.handlers.lock().push(handler);
    }

    fn snapshot(&self) -> Vec<Arc<dyn PolicyHandler>> {
        self.handlers.lock().clone()
    }

    /// Run the chain for one phase of a call
    pub fn dispatch(&self, phase: Phase, frame: &mut CallFrame) -> DispatchReport {
        let handlers = self.snapshot();
        let mut report = DispatchReport::default();

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(names::DISPATCH_TOTAL, "point" => self.point.name().to_string())
            .increment(1);

        for handler in handlers {
            report.invoked += 1;

            let decision = match invoke(handler.as_ref(), phase, frame) {
                Ok(decision) => decision,
                Err(reason) => {
                    report.faulted += 1;
                    warn!(
                        point = %self.point,
                        handler = handler.name(),
                        "Policy handler failed, continuing chain: {}",
                        reason
                    );
                    metrics::counter!(
                        names::HANDLER_FAULTS_TOTAL,
                        "point" => self.point.name().to_string()
                    )
                    .increment(1);
                    continue;
                }
            };

            let Some(decision) = decision else {
                continue;
            };

            match self.mode {
                ChainMode::Observer => {
                    trace!(
                        point = %self.point,
                        handler = handler.name(),
                        "Ignoring decision from observer: {:?}",
                        decision
                    );
                }
                ChainMode::Decisive => {
                    if !decision.apply(frame) {
                        warn!(
                            point = %self.point,
                            handler = handler.name(),
                            "Decision could not be applied: {:?}",
                            decision
                        );
                    }
                    debug!(point = %self.point, handler = handler.name(), "Applied {:?}", decision);
                    report.decided_by = Some(handler.name().to_string());
                    report.decision = Some(decision);
                    break;
                }
            }
        }

        report
    }
}

impl InterceptCallbacks for HookChain {
    fn before(&self, frame: &mut CallFrame) {
        self.dispatch(Phase::Before, frame);
    }

    fn after(&self, frame: &mut CallFrame) {
        self.dispatch(Phase::After, frame);
    }
}

fn invoke(
    handler: &dyn PolicyHandler,
    phase: Phase,
    frame: &CallFrame,
) -> std::result::Result<Option<Decision>, String> {
    let outcome = catch_unwind(AssertUnwindSafe(|| match phase {
        Phase::Before => handler.before(frame),
        Phase::After => handler.after(frame),
    }));

    match outcome {
        Ok(Ok(decision)) => Ok(decision),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Process-wide registry of hook chains
pub struct HookChainRegistry {
    engine: Arc<dyn InterceptionEngine>,
    chains: DashMap<InterceptionPoint, Arc<HookChain>>,
}

impl HookChainRegistry {
    pub fn new(engine: Arc<dyn InterceptionEngine>) -> Self {
        Self {
            engine,
            chains: DashMap::new(),
        }
    }

    /// Append a handler to a point's chain
    ///
    /// The first registration for a point hooks it in the engine. If the
    /// engine refuses, the install guard is released so the next
    /// registration retries; the handler stays in the chain either way.
    pub fn register(
        &self,
        point: &InterceptionPoint,
        mode: ChainMode,
        handler: Arc<dyn PolicyHandler>,
    ) -> Result<()> {
        let chain = self
            .chains
            .entry(point.clone())
            .or_insert_with(|| Arc::new(HookChain::new(point.clone(), mode)))
            .clone();

        if chain.mode() != mode {
            return Err(PolicyError::ChainModeMismatch {
                point: point.to_string(),
                existing: chain.mode().as_str(),
                requested: mode.as_str(),
            });
        }

        debug!(point = %point, handler = handler.name(), "Registering policy handler");
        chain.push(handler);

        if chain
            .installed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let callbacks: Arc<dyn InterceptCallbacks> = chain.clone();
            if let Err(e) = self.engine.intercept(point, callbacks) {
                chain.installed.store(false, Ordering::Release);
                return Err(PolicyError::InterceptionFailed(format!(
                    "Failed to hook {}: {:#}",
                    point, e
                )));
            }
            info!(point = %point, mode = mode.as_str(), "Hooked interception point");
        }

        Ok(())
    }

    /// Dispatch a call on a point; points without a chain yield an empty report
    pub fn dispatch(
        &self,
        point: &InterceptionPoint,
        phase: Phase,
        frame: &mut CallFrame,
    ) -> DispatchReport {
        // clone the Arc out so the shard lock is not held while handlers run
        let chain = self.chains.get(point).map(|entry| Arc::clone(entry.value()));
        match chain {
            Some(chain) => chain.dispatch(phase, frame),
            None => DispatchReport::default(),
        }
    }

    pub fn chain(&self, point: &InterceptionPoint) -> Option<Arc<HookChain>> {
        self.chains.get(point).map(|entry| Arc::clone(entry.value()))
    }

    pub fn handler_count(&self, point: &InterceptionPoint) -> usize {
        self.chain(point).map(|chain| chain.len()).unwrap_or(0)
    }

    /// All points that have a chain
    pub fn points(&self) -> Vec<InterceptionPoint> {
        self.chains.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Engine that records hooked points and can be told to refuse
    #[derive(Default)]
    pub struct RecordingEngine {
        pub hooked: Mutex<Vec<InterceptionPoint>>,
        pub callbacks: Mutex<Vec<(InterceptionPoint, Arc<dyn InterceptCallbacks>)>>,
        pub refuse: AtomicBool,
    }

    impl RecordingEngine {
        pub fn hook_count(&self, point: &InterceptionPoint) -> usize {
            self.hooked.lock().iter().filter(|p| *p == point).count()
        }

        /// Deliver a call the way a real engine would
        pub fn fire(&self, point: &InterceptionPoint, frame: &mut CallFrame) {
            let callbacks: Vec<_> = self
                .callbacks
                .lock()
                .iter()
                .filter(|(p, _)| p == point)
                .map(|(_, cb)| Arc::clone(cb))
                .collect();
            for cb in &callbacks {
                cb.before(frame);
            }
            for cb in &callbacks {
                cb.after(frame);
            }
        }
    }

    impl InterceptionEngine for RecordingEngine {
        fn intercept(
            &self,
            point: &InterceptionPoint,
            callbacks: Arc<dyn InterceptCallbacks>,
        ) -> anyhow::Result<()> {
            if self.refuse.load(Ordering::SeqCst) {
                anyhow::bail!("method not found");
            }
            self.hooked.lock().push(point.clone());
            self.callbacks.lock().push((point.clone(), callbacks));
            Ok(())
        }
    }
}
