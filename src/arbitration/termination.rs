// src/arbitration/termination.rs
//! Suppress the resource before the process exits
//!
//! A [`TerminationGuard`] sits on a decisive chain at the host's termination
//! point. The first attempt is swallowed, the resource is suppressed
//! synchronously, and after a grace period termination is re-issued with a
//! one-shot bypass so the second attempt goes through. A bypass that goes
//! unused for another grace period is withdrawn.

use crate::arbitration::arbiter::{ResourceArbiter, ResourceKey};
use crate::interception::engine::{CallFrame, Decision, PolicyHandler};
use crate::utils::errors::PolicyError;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Re-issues process termination after the grace period
pub trait ProcessTerminator: Send + Sync {
    fn terminate(&self) -> anyhow::Result<()>;
}

/// Sends a signal to the current process
#[derive(Debug, Clone, Copy)]
pub struct SignalTerminator {
    signal: Signal,
}

impl SignalTerminator {
    pub fn new(signal: Signal) -> Self {
        Self { signal }
    }
}

impl Default for SignalTerminator {
    fn default() -> Self {
        Self::new(Signal::SIGTERM)
    }
}

impl ProcessTerminator for SignalTerminator {
    fn terminate(&self) -> anyhow::Result<()> {
        let pid = Pid::this();
        info!("Sending {:?} to process {}", self.signal, pid);
        kill(pid, self.signal).map_err(|e| {
            PolicyError::TerminationFailed(format!("kill({}, {:?}): {}", pid, self.signal, e))
        })?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TerminationLatch {
    /// A retry is scheduled
    pending: AtomicBool,
    /// The next attempt is the retry and must pass
    bypass: AtomicBool,
}

pub struct TerminationGuard {
    arbiter: ResourceArbiter,
    key: ResourceKey,
    terminator: Arc<dyn ProcessTerminator>,
    grace: Duration,
    latch: Arc<TerminationLatch>,
    intercepted: AtomicU64,
}

impl TerminationGuard {
    pub fn new(
        arbiter: ResourceArbiter,
        key: ResourceKey,
        terminator: Arc<dyn ProcessTerminator>,
        grace: Duration,
    ) -> Self {
        Self {
            arbiter,
            key,
            terminator,
            grace,
            latch: Arc::new(TerminationLatch::default()),
            intercepted: AtomicU64::new(0),
        }
    }

    /// Attempts that started a delayed termination
    pub fn intercepted(&self) -> u64 {
        self.intercepted.load(Ordering::Relaxed)
    }

    pub fn is_pending(&self) -> bool {
        self.latch.pending.load(Ordering::Acquire)
    }

    fn schedule_retry(&self) {
        let latch = Arc::clone(&self.latch);
        let terminator = Arc::clone(&self.terminator);
        let grace = self.grace;

        self.arbiter.runtime().spawn(async move {
            tokio::time::sleep(grace).await;

            latch.bypass.store(true, Ordering::Release);
            latch.pending.store(false, Ordering::Release);

            let outcome = tokio::task::spawn_blocking(move || terminator.terminate()).await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(e) => Some(e.to_string()),
            };
            if let Some(reason) = failure {
                latch.bypass.store(false, Ordering::Release);
                warn!("Delayed termination failed: {}", reason);
                return;
            }

            // a handled signal may never reach the exit point
            tokio::time::sleep(grace).await;
            if latch
                .bypass
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                debug!("Delayed termination did not pass the exit point, bypass withdrawn");
            }
        });
    }
}

impl PolicyHandler for TerminationGuard {
    fn name(&self) -> &str {
        "termination-guard"
    }

    fn before(&self, frame: &CallFrame) -> anyhow::Result<Option<Decision>> {
        if self
            .latch
            .bypass
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("Letting delayed {} through", frame.method);
            return Ok(None);
        }

        if self
            .latch
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Termination already pending, swallowing {}", frame.method);
            return Ok(Some(Decision::Suppress));
        }

        self.intercepted.fetch_add(1, Ordering::Relaxed);
        info!(
            key = %self.key,
            "Intercepted {}, suppressing {} before exit",
            frame.method,
            self.arbiter.resource()
        );

        self.arbiter.request_suppress_blocking(&self.key);
        self.schedule_retry();

        Ok(Some(Decision::Suppress))
    }
}
