// src/arbitration/mod.rs
//! Resource arbitration
//!
//! Features that each want an expensive shared resource switched off (and
//! back on) coordinate through this module:
//!
//! - **Arbiter**: key set plus gate; restore only when the last key releases
//! - **Controller**: lifecycle-debounced, condition-polled or watchdog mode
//! - **Lifecycle**: foreground counting and event fan-out
//! - **Timers**: one cancellable timer per purpose
//! - **Termination**: suppress the resource before the process exits
//!
//! # Architecture
//!
//! ```text
//! Host lifecycle → LifecycleHub → ArbitrationController (per feature key)
//!                                        ↓ timers
//!                                  ResourceArbiter (shared)
//!                                        ↓ off primary thread
//!                                  ResourceGate::suppress()/restore()
//! ```

pub mod arbiter;
pub mod controller;
pub mod lifecycle;
pub mod termination;
pub mod timers;

// Re-export commonly used types
pub use arbiter::{
    ArbiterStatus, PrimaryThread, ResourceArbiter, ResourceGate, ResourceKey, ResourceState,
};
pub use controller::{ArbitrationController, ControllerMode, ControllerOptions, ExternalCondition};
pub use lifecycle::{LifecycleCounter, LifecycleHub, LifecycleObserver, LifecycleTransition};
pub use termination::{ProcessTerminator, SignalTerminator, TerminationGuard};
pub use timers::TimerSlot;

#[cfg(test)]
pub(crate) mod testing {
    use super::ResourceGate;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread::{self, ThreadId};
    use std::time::{Duration, Instant};

    /// Gate that counts calls and remembers which threads made them
    #[derive(Default)]
    pub struct CountingGate {
        suppress_calls: AtomicUsize,
        restore_calls: AtomicUsize,
        fail_next_suppress: AtomicBool,
        threads: Mutex<Vec<ThreadId>>,
        delay: Duration,
    }

    impl CountingGate {
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        pub fn fail_next_suppress(&self) {
            self.fail_next_suppress.store(true, Ordering::SeqCst);
        }

        pub fn suppress_calls(&self) -> usize {
            self.suppress_calls.load(Ordering::SeqCst)
        }

        pub fn restore_calls(&self) -> usize {
            self.restore_calls.load(Ordering::SeqCst)
        }

        pub fn threads(&self) -> Vec<ThreadId> {
            self.threads.lock().clone()
        }

        fn enter(&self) {
            self.threads.lock().push(thread::current().id());
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
        }
    }

    impl ResourceGate for CountingGate {
        fn suppress(&self) -> anyhow::Result<()> {
            self.enter();
            self.suppress_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next_suppress.swap(false, Ordering::SeqCst) {
                anyhow::bail!("radio busy");
            }
            Ok(())
        }

        fn restore(&self) -> anyhow::Result<()> {
            self.enter();
            self.restore_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Poll `check` until it holds or `timeout` passes
    pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if check() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
