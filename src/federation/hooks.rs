//! Observer bus keyed by hook.
//!
//! Callbacks run synchronously, in registration order. The same callback may
//! be registered more than once and then runs once per registration. A
//! panicking observer is not caught.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Events the federation publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FederationHook {
    /// Aggregate federation state changed.
    Update,
}

impl FederationHook {
    pub fn as_str(&self) -> &'static str {
        match self {
            FederationHook::Update => "onFederationUpdate",
        }
    }
}

impl fmt::Display for FederationHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Observer = Arc<dyn Fn() + Send + Sync>;

#[derive(Default, Clone)]
pub struct HookBus {
    observers: Arc<RwLock<HashMap<FederationHook, Vec<Observer>>>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: FederationHook, observer: Observer) {
        let mut guard = self
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.entry(hook).or_default().push(observer);
    }

    /// Run every observer of `hook`. Returns how many ran.
    pub fn notify(&self, hook: FederationHook) -> usize {
        // Snapshot first so an observer may register further observers.
        let snapshot: Vec<Observer> = {
            let guard = self
                .observers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.get(&hook).cloned().unwrap_or_default()
        };
        for observer in &snapshot {
            observer();
        }
        snapshot.len()
    }

    pub fn len(&self, hook: FederationHook) -> usize {
        self.observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&hook)
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for HookBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookBus")
            .field("update", &self.len(FederationHook::Update))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_observers_run_in_registration_order() {
        let bus = HookBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            bus.register(FederationHook::Update, Arc::new(move || log.lock().unwrap().push(i)));
        }
        assert_eq!(bus.notify(FederationHook::Update), 3);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_duplicate_registration_runs_twice() {
        let bus = HookBus::new();
        let hits = Arc::new(Mutex::new(0));
        let cb: Observer = {
            let hits = Arc::clone(&hits);
            Arc::new(move || *hits.lock().unwrap() += 1)
        };
        bus.register(FederationHook::Update, Arc::clone(&cb));
        bus.register(FederationHook::Update, cb);
        bus.notify(FederationHook::Update);
        assert_eq!(*hits.lock().unwrap(), 2);
    }

    #[test]
    fn test_notify_without_observers() {
        let bus = HookBus::new();
        assert_eq!(bus.notify(FederationHook::Update), 0);
        assert_eq!(FederationHook::Update.to_string(), "onFederationUpdate");
    }
}
