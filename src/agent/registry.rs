//! Registered polling services and the process-wide shutdown latch.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Why the agent stopped polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Operator interrupt.
    Interrupted,
    NotEnabled,
    NotConfigured,
    MessagingError,
}

impl ShutdownReason {
    pub fn code(&self) -> u8 {
        match self {
            Self::Interrupted => 0,
            Self::NotEnabled => 1,
            Self::NotConfigured => 2,
            Self::MessagingError => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupted => "INTERRUPTED",
            Self::NotEnabled => "NOT_ENABLED",
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::MessagingError => "MESSAGING_ERROR",
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

/// Set once, never cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownState {
    pub reason: ShutdownReason,
    pub at: DateTime<Utc>,
}

/// Shared by every poller through an `Arc`.
#[derive(Default)]
pub struct AgentRegistry {
    services: Mutex<BTreeSet<String>>,
    shutdown: OnceLock<ShutdownState>,
    changed: Notify,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: &str) {
        let added = self.lock().insert(key.to_string());
        if added {
            info!(service = key, "Service registered");
        }
        self.changed.notify_waiters();
    }

    pub fn deregister(&self, key: &str) {
        let removed = self.lock().remove(key);
        if removed {
            info!(service = key, "Service deregistered");
        }
        self.changed.notify_waiters();
    }

    /// Registered service keys, sorted.
    pub fn services(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.get().is_some()
    }

    pub fn shutdown_state(&self) -> Option<&ShutdownState> {
        self.shutdown.get()
    }

    /// Latch shutdown. Returns `false` when it was already set; the first
    /// reason is kept.
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        let latched = self
            .shutdown
            .set(ShutdownState {
                reason,
                at: Utc::now(),
            })
            .is_ok();
        if latched {
            warn!(%reason, "Agent shutdown latched");
            self.changed.notify_waiters();
        }
        latched
    }

    /// Resolve once no service is registered any more.
    pub async fn idle(&self) {
        loop {
            let changed = self.changed.notified();
            if self.lock().is_empty() {
                return;
            }
            changed.await;
        }
    }

    /// Resolve once shutdown has been latched.
    pub async fn stopped(&self) {
        loop {
            let changed = self.changed.notified();
            if self.is_shutdown() {
                return;
            }
            changed.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        // A poisoned set is still a valid set.
        self.services.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn first_shutdown_reason_wins() {
        let registry = AgentRegistry::new();
        assert!(!registry.is_shutdown());
        assert!(registry.shutdown(ShutdownReason::NotEnabled));
        assert!(!registry.shutdown(ShutdownReason::MessagingError));
        assert_eq!(
            registry.shutdown_state().unwrap().reason,
            ShutdownReason::NotEnabled
        );
    }

    #[test]
    fn services_register_and_deregister() {
        let registry = AgentRegistry::new();
        registry.register("imap.example.com:993:support:INBOX");
        registry.register("pop.example.com:0:help:INBOX");
        assert_eq!(registry.services().len(), 2);
        registry.deregister("pop.example.com:0:help:INBOX");
        assert_eq!(
            registry.services(),
            vec!["imap.example.com:993:support:INBOX".to_string()]
        );
    }

    #[tokio::test]
    async fn idle_resolves_after_last_deregister() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register("a");
        let waiter = tokio::spawn({
            let registry = registry.clone();
            async move { registry.idle().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        registry.deregister("a");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn reason_codes() {
        assert_eq!(ShutdownReason::NotEnabled.code(), 1);
        assert_eq!(ShutdownReason::NotConfigured.code(), 2);
        assert_eq!(ShutdownReason::MessagingError.code(), 3);
    }
}
