// src/arbitration/timers.rs
//! Cancellable one-shot and repeating timers
//!
//! A [`TimerSlot`] owns at most one scheduled task. Scheduling again replaces
//! the previous task, and every fire checks the slot generation so a task
//! that was already past its sleep when it got replaced still does nothing.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

pub struct TimerSlot {
    purpose: &'static str,
    generation: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
    pub fn new(purpose: &'static str) -> Self {
        Self {
            purpose,
            generation: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    pub fn purpose(&self) -> &'static str {
        self.purpose
    }

    /// Run `action` once after `delay`, replacing anything already scheduled
    pub fn schedule_once<F>(&self, runtime: &Handle, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut task = self.task.lock();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let current = Arc::clone(&self.generation);
        let purpose = self.purpose;

        let handle = runtime.spawn(async move {
            time::sleep(delay).await;
            if current.load(Ordering::Acquire) == generation {
                action();
            } else {
                trace!("Stale {} timer skipped", purpose);
            }
        });

        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
        trace!("Scheduled {} timer in {:?}", self.purpose, delay);
    }

    /// Run `action` every `period`, first after one full period
    pub fn schedule_repeating<F>(&self, runtime: &Handle, period: Duration, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut task = self.task.lock();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let current = Arc::clone(&self.generation);

        let handle = runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if current.load(Ordering::Acquire) != generation {
                    break;
                }
                action();
            }
        });

        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
        trace!("Scheduled repeating {} timer every {:?}", self.purpose, period);
    }

    /// Cancel whatever is scheduled; a no-op on an idle slot
    pub fn cancel(&self) {
        let mut task = self.task.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(previous) = task.take() {
            previous.abort();
            trace!("Cancelled {} timer", self.purpose);
        }
    }

    /// Whether a scheduled task has yet to finish
    pub fn is_pending(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
