//! Per-account admission control for polling cycles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::registry::AgentRegistry;

/// Concurrent cycles admitted per account.
pub const MAX_IN_FLIGHT: usize = 2;

/// Caps in-flight cycles per account key and refuses everything once the
/// agent is shutting down.
pub struct AdmissionThrottle {
    in_flight: Mutex<HashMap<String, usize>>,
    registry: Arc<AgentRegistry>,
    cap: usize,
}

impl AdmissionThrottle {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self::with_cap(registry, MAX_IN_FLIGHT)
    }

    pub fn with_cap(registry: Arc<AgentRegistry>, cap: usize) -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            registry,
            cap,
        }
    }

    pub fn try_enter(&self, key: &str) -> bool {
        if self.registry.is_shutdown() {
            return false;
        }
        let mut in_flight = self.lock();
        let count = in_flight.entry(key.to_string()).or_insert(0);
        if *count >= self.cap {
            return false;
        }
        *count += 1;
        true
    }

    pub fn leave(&self, key: &str) {
        let mut in_flight = self.lock();
        if let Some(count) = in_flight.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(key);
            }
        }
    }

    pub fn in_flight(&self, key: &str) -> usize {
        self.lock().get(key).copied().unwrap_or(0)
    }

    /// Admit a cycle, returning a permit that leaves on drop.
    pub fn admit(self: &Arc<Self>, key: &str) -> Option<AdmissionPermit> {
        self.try_enter(key).then(|| AdmissionPermit {
            throttle: Arc::clone(self),
            key: key.to_string(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Holds one admission slot until dropped.
pub struct AdmissionPermit {
    throttle: Arc<AdmissionThrottle>,
    key: String,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.throttle.leave(&self.key);
    }
}
