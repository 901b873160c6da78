// src/arbitration/controller.rs
//! Per-feature arbitration controller
//!
//! Turns host lifecycle edges (or an external condition) into suppress and
//! restore requests for one [`ResourceKey`] on a shared [`ResourceArbiter`].
//!
//! ```text
//!                 0→1                              1→0
//! Debounced   cancel disable, restore        cancel enable, suppress
//!             after enable_delay             after disable_debounce
//! Polled      evaluate now                   (nothing)
//! Watchdog    cancel watchdog, restore       suppress, reassert every interval
//! ```

use crate::arbitration::arbiter::{ResourceArbiter, ResourceKey, ResourceState, Transition};
use crate::arbitration::lifecycle::{LifecycleCounter, LifecycleObserver, LifecycleTransition};
use crate::arbitration::timers::TimerSlot;
use crate::utils::config::ArbitrationSettings;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Outside signal deciding whether the resource may be on
pub trait ExternalCondition: Send + Sync {
    fn is_met(&self) -> bool;
}

impl<F> ExternalCondition for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_met(&self) -> bool {
        self()
    }
}

/// How a controller reacts to lifecycle edges
#[derive(Clone)]
pub enum ControllerMode {
    LifecycleDebounced {
        enable_delay: Duration,
        disable_debounce: Duration,
    },
    ConditionPolled {
        condition: Arc<dyn ExternalCondition>,
        interval: Duration,
    },
    WatchdogReasserted {
        interval: Duration,
    },
}

impl ControllerMode {
    pub fn lifecycle_debounced(settings: &ArbitrationSettings) -> Self {
        ControllerMode::LifecycleDebounced {
            enable_delay: settings.enable_delay(),
            disable_debounce: settings.disable_debounce(),
        }
    }

    pub fn condition_polled(
        condition: Arc<dyn ExternalCondition>,
        settings: &ArbitrationSettings,
    ) -> Self {
        ControllerMode::ConditionPolled {
            condition,
            interval: settings.poll_interval(),
        }
    }

    pub fn watchdog(settings: &ArbitrationSettings) -> Self {
        ControllerMode::WatchdogReasserted {
            interval: settings.watchdog_interval(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControllerMode::LifecycleDebounced { .. } => "lifecycle_debounced",
            ControllerMode::ConditionPolled { .. } => "condition_polled",
            ControllerMode::WatchdogReasserted { .. } => "watchdog_reasserted",
        }
    }
}

impl fmt::Debug for ControllerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerMode::LifecycleDebounced {
                enable_delay,
                disable_debounce,
            } => f
                .debug_struct("LifecycleDebounced")
                .field("enable_delay", enable_delay)
                .field("disable_debounce", disable_debounce)
                .finish(),
            ControllerMode::ConditionPolled { interval, .. } => f
                .debug_struct("ConditionPolled")
                .field("interval", interval)
                .finish_non_exhaustive(),
            ControllerMode::WatchdogReasserted { interval } => f
                .debug_struct("WatchdogReasserted")
                .field("interval", interval)
                .finish(),
        }
    }
}

/// Controller install options
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerOptions {
    /// Suppress the resource as soon as the controller is installed
    pub suppress_on_install: bool,
}

/// Drives one feature's key on a shared arbiter
pub struct ArbitrationController {
    key: ResourceKey,
    arbiter: ResourceArbiter,
    mode: ControllerMode,
    counter: LifecycleCounter,
    enable_timer: TimerSlot,
    disable_timer: TimerSlot,
    watchdog_timer: TimerSlot,
    poll_timer: TimerSlot,
    evaluator: Option<Arc<ConditionEvaluator>>,
}

impl ArbitrationController {
    /// Create the controller and start any mode-specific timers
    pub fn install(
        key: ResourceKey,
        arbiter: ResourceArbiter,
        mode: ControllerMode,
        options: ControllerOptions,
    ) -> Self {
        info!(
            resource = arbiter.resource(),
            key = %key,
            "Installing {} arbitration controller",
            mode.name()
        );

        let evaluator = match &mode {
            ControllerMode::ConditionPolled { condition, .. } => Some(Arc::new(
                ConditionEvaluator::new(arbiter.clone(), key.clone(), Arc::clone(condition)),
            )),
            _ => None,
        };

        let controller = Self {
            key,
            arbiter,
            mode,
            counter: LifecycleCounter::new(),
            enable_timer: TimerSlot::new("enable"),
            disable_timer: TimerSlot::new("disable"),
            watchdog_timer: TimerSlot::new("watchdog"),
            poll_timer: TimerSlot::new("poll"),
            evaluator,
        };

        if options.suppress_on_install {
            controller.arbiter.request_suppress(&controller.key);
        }

        if let (ControllerMode::ConditionPolled { interval, .. }, Some(evaluator)) =
            (&controller.mode, &controller.evaluator)
        {
            let evaluator = Arc::clone(evaluator);
            controller.poll_timer.schedule_repeating(
                controller.arbiter.runtime(),
                *interval,
                move || evaluator.spawn(),
            );
        }

        controller
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn mode(&self) -> &ControllerMode {
        &self.mode
    }

    pub fn arbiter(&self) -> &ResourceArbiter {
        &self.arbiter
    }

    pub fn state(&self) -> ResourceState {
        self.arbiter.state()
    }

    pub fn foreground_count(&self) -> usize {
        self.counter.count()
    }

    pub fn has_pending_enable(&self) -> bool {
        self.enable_timer.is_pending()
    }

    pub fn has_pending_disable(&self) -> bool {
        self.disable_timer.is_pending()
    }

    pub fn is_watchdog_running(&self) -> bool {
        self.watchdog_timer.is_pending()
    }

    pub fn is_polling(&self) -> bool {
        self.poll_timer.is_pending()
    }

    /// Stop every timer; outstanding keys stay as they are
    pub fn shutdown(&self) {
        debug!(key = %self.key, "Shutting down arbitration controller");
        self.enable_timer.cancel();
        self.disable_timer.cancel();
        self.watchdog_timer.cancel();
        self.poll_timer.cancel();
    }

    fn on_foregrounded(&self) {
        let runtime = self.arbiter.runtime();

        match &self.mode {
            ControllerMode::LifecycleDebounced { enable_delay, .. } => {
                self.disable_timer.cancel();
                let arbiter = self.arbiter.clone();
                let key = self.key.clone();
                self.enable_timer.schedule_once(runtime, *enable_delay, move || {
                    arbiter.submit(Transition::Restore, &key);
                });
            }
            ControllerMode::ConditionPolled { .. } => {
                if let Some(evaluator) = &self.evaluator {
                    evaluator.spawn();
                }
            }
            ControllerMode::WatchdogReasserted { .. } => {
                self.watchdog_timer.cancel();
                self.arbiter.request_restore(&self.key);
            }
        }
    }

    fn on_backgrounded(&self) {
        let runtime = self.arbiter.runtime();

        match &self.mode {
            ControllerMode::LifecycleDebounced {
                disable_debounce, ..
            } => {
                self.enable_timer.cancel();
                let arbiter = self.arbiter.clone();
                let key = self.key.clone();
                self.disable_timer
                    .schedule_once(runtime, *disable_debounce, move || {
                        arbiter.submit(Transition::Suppress, &key);
                    });
            }
            ControllerMode::ConditionPolled { .. } => {
                trace!(key = %self.key, "Backgrounded, polling continues");
            }
            ControllerMode::WatchdogReasserted { interval } => {
                self.arbiter.request_suppress(&self.key);
                let arbiter = self.arbiter.clone();
                let key = self.key.clone();
                self.watchdog_timer
                    .schedule_repeating(runtime, *interval, move || {
                        arbiter.submit(Transition::Reassert, &key);
                    });
            }
        }
    }
}

impl LifecycleObserver for ArbitrationController {
    fn on_unit_foregrounded(&self, unit: &str) {
        if self.counter.entered() == Some(LifecycleTransition::Foregrounded) {
            debug!(key = %self.key, unit, "Foreground edge");
            self.on_foregrounded();
        }
    }

    fn on_unit_backgrounded(&self, unit: &str) {
        if self.counter.left() == Some(LifecycleTransition::Backgrounded) {
            debug!(key = %self.key, unit, "Background edge");
            self.on_backgrounded();
        }
    }
}

/// Checks the external condition on the blocking pool
///
/// Checks can overlap; each one takes a ticket when it is started and a
/// result is dropped once a later-started check has already been applied.
struct ConditionEvaluator {
    arbiter: ResourceArbiter,
    key: ResourceKey,
    condition: Arc<dyn ExternalCondition>,
    issued: AtomicU64,
    applied: Mutex<u64>,
}

impl ConditionEvaluator {
    fn new(arbiter: ResourceArbiter, key: ResourceKey, condition: Arc<dyn ExternalCondition>) -> Self {
        Self {
            arbiter,
            key,
            condition,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
        }
    }

    fn spawn(self: &Arc<Self>) {
        let ticket = self.issued.fetch_add(1, Ordering::AcqRel) + 1;
        let evaluator = Arc::clone(self);
        drop(
            self.arbiter
                .runtime()
                .spawn_blocking(move || evaluator.evaluate(ticket)),
        );
    }

    fn evaluate(&self, ticket: u64) {
        let met = match catch_unwind(AssertUnwindSafe(|| self.condition.is_met())) {
            Ok(met) => met,
            Err(_) => {
                warn!(key = %self.key, "External condition panicked, skipping evaluation");
                return;
            }
        };

        let mut applied = self.applied.lock();
        if ticket < *applied {
            trace!(key = %self.key, ticket, latest = *applied, "Dropping stale evaluation");
            return;
        }
        *applied = ticket;

        if met {
            self.arbiter.request_restore(&self.key);
        } else {
            self.arbiter.request_suppress(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::arbiter::PrimaryThread;
    use crate::arbitration::testing::{wait_until, CountingGate};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::runtime::Handle;
    use tokio::time;

    fn shared_arbiter(gate: &Arc<CountingGate>) -> ResourceArbiter {
        ResourceArbiter::new("network", gate.clone(), PrimaryThread::none(), Handle::current())
    }

    fn debounced(enable_ms: u64, debounce_ms: u64) -> ControllerMode {
        ControllerMode::LifecycleDebounced {
            enable_delay: Duration::from_millis(enable_ms),
            disable_debounce: Duration::from_millis(debounce_ms),
        }
    }

    #[tokio::test]
    async fn test_debounce_absorbs_churn() {
        let gate = Arc::new(CountingGate::default());
        let controller = ArbitrationController::install(
            ResourceKey::from("sync"),
            shared_arbiter(&gate),
            debounced(10, 80),
            ControllerOptions::default(),
        );

        controller.on_unit_foregrounded("main");
        time::sleep(Duration::from_millis(20)).await;
        controller.on_unit_backgrounded("main");
        assert!(controller.has_pending_disable());
        time::sleep(Duration::from_millis(20)).await;
        controller.on_unit_foregrounded("main");
        assert!(!controller.has_pending_disable());

        time::sleep(Duration::from_millis(150)).await;
        controller.arbiter().flush().await;

        assert_eq!(gate.suppress_calls(), 0);
        assert_eq!(gate.restore_calls(), 0);
        assert_eq!(controller.state(), ResourceState::Enabled);
    }

    #[tokio::test]
    async fn test_debounced_suppress_and_restore() {
        let gate = Arc::new(CountingGate::default());
        let controller = ArbitrationController::install(
            ResourceKey::from("sync"),
            shared_arbiter(&gate),
            debounced(10, 60),
            ControllerOptions::default(),
        );

        controller.on_unit_foregrounded("main");
        controller.on_unit_backgrounded("main");
        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.state(), ResourceState::Enabled);

        assert!(wait_until(Duration::from_secs(2), || controller.state() == ResourceState::Disabled).await);
        assert_eq!(gate.suppress_calls(), 1);

        controller.on_unit_foregrounded("main");
        assert!(wait_until(Duration::from_secs(2), || controller.state() == ResourceState::Enabled).await);
        assert_eq!(gate.restore_calls(), 1);
    }

    #[tokio::test]
    async fn test_only_outer_edges_count() {
        let gate = Arc::new(CountingGate::default());
        let controller = ArbitrationController::install(
            ResourceKey::from("sync"),
            shared_arbiter(&gate),
            debounced(10, 30),
            ControllerOptions::default(),
        );

        controller.on_unit_foregrounded("main");
        controller.on_unit_foregrounded("settings");
        controller.on_unit_backgrounded("settings");
        assert_eq!(controller.foreground_count(), 1);
        assert!(!controller.has_pending_disable());

        time::sleep(Duration::from_millis(80)).await;
        controller.arbiter().flush().await;
        assert_eq!(gate.suppress_calls(), 0);
    }

    #[tokio::test]
    async fn test_shared_arbiter_waits_for_both_features() {
        let gate = Arc::new(CountingGate::default());
        let arbiter = shared_arbiter(&gate);
        let sync = ArbitrationController::install(
            ResourceKey::from("sync"),
            arbiter.clone(),
            debounced(10, 10),
            ControllerOptions::default(),
        );
        let prefetch = ArbitrationController::install(
            ResourceKey::from("prefetch"),
            arbiter.clone(),
            debounced(10, 10),
            ControllerOptions::default(),
        );

        for controller in [&sync, &prefetch] {
            controller.on_unit_foregrounded("main");
            controller.on_unit_backgrounded("main");
        }
        assert!(wait_until(Duration::from_secs(2), || arbiter.status().requested_keys.len() == 2).await);
        assert_eq!(arbiter.state(), ResourceState::Disabled);

        sync.on_unit_foregrounded("main");
        assert!(wait_until(Duration::from_secs(2), || arbiter.status().requested_keys.len() == 1).await);
        assert_eq!(arbiter.state(), ResourceState::Disabled);
        assert_eq!(gate.restore_calls(), 0);

        prefetch.on_unit_foregrounded("main");
        assert!(wait_until(Duration::from_secs(2), || arbiter.state() == ResourceState::Enabled).await);
        assert_eq!(gate.suppress_calls(), 1);
        assert_eq!(gate.restore_calls(), 1);
    }

    #[tokio::test]
    async fn test_condition_polled() {
        let gate = Arc::new(CountingGate::default());
        let allowed = Arc::new(AtomicBool::new(false));

        let flag = allowed.clone();
        let controller = ArbitrationController::install(
            ResourceKey::from("metered"),
            shared_arbiter(&gate),
            ControllerMode::ConditionPolled {
                condition: Arc::new(move || flag.load(Ordering::SeqCst)),
                interval: Duration::from_millis(20),
            },
            ControllerOptions::default(),
        );
        assert!(controller.is_polling());

        assert!(wait_until(Duration::from_secs(2), || controller.state() == ResourceState::Disabled).await);

        allowed.store(true, Ordering::SeqCst);
        assert!(wait_until(Duration::from_secs(2), || controller.state() == ResourceState::Enabled).await);

        controller.shutdown();
        assert!(!controller.is_polling());
    }

    #[tokio::test]
    async fn test_condition_evaluated_on_foreground() {
        let gate = Arc::new(CountingGate::default());
        let controller = ArbitrationController::install(
            ResourceKey::from("metered"),
            shared_arbiter(&gate),
            ControllerMode::ConditionPolled {
                condition: Arc::new(|| true),
                interval: Duration::from_secs(60),
            },
            ControllerOptions {
                suppress_on_install: true,
            },
        );
        assert_eq!(controller.state(), ResourceState::Disabled);

        controller.on_unit_foregrounded("main");
        assert!(wait_until(Duration::from_secs(2), || controller.state() == ResourceState::Enabled).await);
    }

    #[tokio::test]
    async fn test_stale_evaluation_discarded() {
        let gate = Arc::new(CountingGate::default());
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter = calls.clone();
        let controller = ArbitrationController::install(
            ResourceKey::from("metered"),
            shared_arbiter(&gate),
            ControllerMode::ConditionPolled {
                condition: Arc::new(move || {
                    // the first check is slow and sees an outdated "not met"
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        std::thread::sleep(Duration::from_millis(200));
                        return false;
                    }
                    true
                }),
                interval: Duration::from_secs(60),
            },
            ControllerOptions::default(),
        );

        controller.on_unit_foregrounded("main");
        assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) == 1).await);
        controller.on_unit_backgrounded("main");
        controller.on_unit_foregrounded("main");
        assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) == 2).await);

        time::sleep(Duration::from_millis(400)).await;
        assert_eq!(controller.state(), ResourceState::Enabled);
        assert_eq!(gate.suppress_calls(), 0);
    }

    #[tokio::test]
    async fn test_watchdog_reasserts_while_backgrounded() {
        let gate = Arc::new(CountingGate::default());
        let controller = ArbitrationController::install(
            ResourceKey::from("lockdown"),
            shared_arbiter(&gate),
            ControllerMode::WatchdogReasserted {
                interval: Duration::from_millis(20),
            },
            ControllerOptions::default(),
        );

        controller.on_unit_foregrounded("main");
        controller.on_unit_backgrounded("main");
        assert_eq!(controller.state(), ResourceState::Disabled);
        assert!(controller.is_watchdog_running());

        assert!(wait_until(Duration::from_secs(2), || gate.suppress_calls() >= 3).await);

        controller.on_unit_foregrounded("main");
        controller.arbiter().flush().await;
        assert_eq!(controller.state(), ResourceState::Enabled);
        assert!(!controller.is_watchdog_running());

        let seen = gate.suppress_calls();
        time::sleep(Duration::from_millis(80)).await;
        controller.arbiter().flush().await;
        assert_eq!(gate.suppress_calls(), seen);
    }

    #[test]
    fn test_mode_from_settings() {
        let settings = ArbitrationSettings::default();

        match ControllerMode::lifecycle_debounced(&settings) {
            ControllerMode::LifecycleDebounced {
                enable_delay,
                disable_debounce,
            } => {
                assert_eq!(enable_delay, settings.enable_delay());
                assert_eq!(disable_debounce, settings.disable_debounce());
            }
            other => panic!("unexpected mode {:?}", other),
        }
        assert_eq!(ControllerMode::watchdog(&settings).name(), "watchdog_reasserted");
    }
}
