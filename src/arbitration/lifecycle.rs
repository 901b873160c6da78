// src/arbitration/lifecycle.rs
//! Foreground/background lifecycle tracking
//!
//! The host reports each UI unit entering or leaving the foreground. Only the
//! edges matter to arbitration: the first unit entering (0 → 1) and the last
//! unit leaving (1 → 0).

use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Edge of the foreground count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleTransition {
    /// First unit came to the foreground
    Foregrounded,

    /// Last unit left the foreground
    Backgrounded,
}

/// Receives unit lifecycle events from the host
pub trait LifecycleObserver: Send + Sync {
    fn on_unit_foregrounded(&self, unit: &str);
    fn on_unit_backgrounded(&self, unit: &str);
}

/// Count of foreground units
#[derive(Debug, Default)]
pub struct LifecycleCounter {
    count: AtomicUsize,
}

impl LifecycleCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// A unit entered the foreground
    pub fn entered(&self) -> Option<LifecycleTransition> {
        let previous = self.count.fetch_add(1, Ordering::AcqRel);
        (previous == 0).then_some(LifecycleTransition::Foregrounded)
    }

    /// A unit left the foreground; ignored if none were counted
    pub fn left(&self) -> Option<LifecycleTransition> {
        match self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            }) {
            Ok(1) => Some(LifecycleTransition::Backgrounded),
            Ok(_) => None,
            Err(_) => {
                warn!("Unit left the foreground with none counted, ignoring");
                None
            }
        }
    }
}

/// Fans host lifecycle events out to every registered observer
#[derive(Default)]
pub struct LifecycleHub {
    observers: RwLock<Vec<Arc<dyn LifecycleObserver>>>,
}

impl LifecycleHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn LifecycleObserver>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn LifecycleObserver>> {
        self.observers.read().clone()
    }
}

impl LifecycleObserver for LifecycleHub {
    fn on_unit_foregrounded(&self, unit: &str) {
        debug!("Unit {} foregrounded", unit);
        for observer in self.snapshot() {
            observer.on_unit_foregrounded(unit);
        }
    }

    fn on_unit_backgrounded(&self, unit: &str) {
        debug!("Unit {} backgrounded", unit);
        for observer in self.snapshot() {
            observer.on_unit_backgrounded(unit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_edges_only() {
        let counter = LifecycleCounter::new();

        assert_eq!(counter.entered(), Some(LifecycleTransition::Foregrounded));
        assert_eq!(counter.entered(), None);
        assert_eq!(counter.left(), None);
        assert_eq!(counter.left(), Some(LifecycleTransition::Backgrounded));
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_unbalanced_leave_ignored() {
        let counter = LifecycleCounter::new();

        assert_eq!(counter.left(), None);
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.entered(), Some(LifecycleTransition::Foregrounded));
    }

    #[test]
    fn test_hub_fans_out() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<String>>);

        impl LifecycleObserver for Recorder {
            fn on_unit_foregrounded(&self, unit: &str) {
                self.0.lock().push(format!("+{}", unit));
            }

            fn on_unit_backgrounded(&self, unit: &str) {
                self.0.lock().push(format!("-{}", unit));
            }
        }

        let hub = LifecycleHub::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        hub.subscribe(first.clone());
        hub.subscribe(second.clone());

        hub.on_unit_foregrounded("main");
        hub.on_unit_backgrounded("main");

        assert_eq!(hub.len(), 2);
        assert_eq!(*first.0.lock(), vec!["+main", "-main"]);
        assert_eq!(*second.0.lock(), vec!["+main", "-main"]);
    }
}
