//! Per-account polling loop.
//!
//! Each account gets one task that registers the account with the agent,
//! fires a cycle every interval and stops as soon as the agent shuts down.
//! Cycles run in their own tasks and enforce the account timeout
//! themselves, so a slow mailbox never delays the next tick; overlapping
//! cycles are bounded by the admission throttle inside
//! [`MailClient::receive`].

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use super::client::MailClient;
use crate::agent::registry::AgentRegistry;

/// Spawn the polling task for `client`. The task ends after the shutdown
/// latch is set and the account has been deregistered.
pub fn spawn_account_poller(client: Arc<MailClient>, registry: Arc<AgentRegistry>) -> JoinHandle<()> {
    let key = client.account().registry_key();
    registry.register(&key);

    tokio::spawn(async move {
        let interval = client.account().interval;
        info!(
            service = %key,
            "Mail poller started, polling every {} minute(s)",
            interval.as_secs() / 60
        );

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = registry.stopped() => {}
            }

            if registry.is_shutdown() {
                info!(service = %key, "Mail poller shutting down");
                registry.deregister(&key);
                return;
            }

            let client = Arc::clone(&client);
            tokio::spawn(async move { client.receive().await });
        }
    })
}
