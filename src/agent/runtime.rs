//! Agent assembly: shared collaborators, one poller per account, and the
//! wait for shutdown.

use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::classifier::classify;
use super::registry::{AgentRegistry, ShutdownReason, ShutdownState};
use super::throttle::AdmissionThrottle;
use crate::cases::{CaseService, SessionManager, SessionSettings};
use crate::config::{AccountConfig, CaseServiceSettings, MailAccount};
use crate::error::{ConfigError, Error};
use crate::mail::{AttachmentPolicy, MailConnector};
use crate::notify::{AgentDetails, NotificationDispatcher, Notifier};
use crate::pipeline::{BatchSubmitter, ClientContext, MailClient, spawn_account_poller};
use crate::storage::AttachmentStore;

/// External collaborators the agent is built from.
pub struct AgentDeps {
    pub case_service: Arc<dyn CaseService>,
    pub attachments: Arc<dyn AttachmentStore>,
    /// `None` leaves notifications disabled (logged only).
    pub notifier: Option<Arc<dyn Notifier>>,
    /// Replaces the protocol's own connector for every account.
    pub connector: Option<Arc<dyn MailConnector>>,
}

/// The running agent.
pub struct Agent {
    registry: Arc<AgentRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    context: ClientContext,
    case_service: Arc<dyn CaseService>,
    session_settings: SessionSettings,
    connector: Option<Arc<dyn MailConnector>>,
    pollers: Vec<JoinHandle<()>>,
}

impl Agent {
    pub fn new(settings: &CaseServiceSettings, policy: AttachmentPolicy, deps: AgentDeps) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            deps.notifier,
            Some(AgentDetails::from_settings(settings)),
            Arc::clone(&registry),
        ));
        let submitter = Arc::new(BatchSubmitter::new(
            deps.attachments,
            Arc::clone(&registry),
            settings.memory_ceiling_bytes,
        ));
        let context = ClientContext {
            registry: Arc::clone(&registry),
            throttle: Arc::new(AdmissionThrottle::new(Arc::clone(&registry))),
            dispatcher: Arc::clone(&dispatcher),
            submitter,
            policy,
        };

        Self {
            registry,
            dispatcher,
            context,
            case_service: deps.case_service,
            session_settings: SessionSettings::from_settings(settings),
            connector: deps.connector,
            pollers: Vec::new(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// Number of pollers started so far.
    pub fn poller_count(&self) -> usize {
        self.pollers.len()
    }

    // ── Startup ─────────────────────────────────────────────────────

    /// Build the client for one validated account. Every client owns its
    /// case service session.
    pub fn client(&self, account: MailAccount) -> Arc<MailClient> {
        let connector = self
            .connector
            .clone()
            .unwrap_or_else(|| account.protocol.connector());
        let session = SessionManager::new(Arc::clone(&self.case_service), self.session_settings.clone());
        Arc::new(MailClient::new(account, connector, session, self.context.clone()))
    }

    /// Validate every account and start a poller for each valid one.
    /// Invalid accounts are reported and skipped. Returns the number of
    /// pollers started.
    pub async fn start_accounts(&mut self, accounts: &[AccountConfig]) -> usize {
        let mut started = 0;
        for (index, section) in accounts.iter().enumerate() {
            match section.validate() {
                Ok(account) => {
                    let client = self.client(account);
                    self.pollers
                        .push(spawn_account_poller(client, Arc::clone(&self.registry)));
                    started += 1;
                }
                Err(e) => {
                    warn!(account = index, error = %e, "Skipping mail account");
                    self.report(e).await;
                }
            }
        }
        if started == 0 {
            warn!("No mail account could be started");
        }
        started
    }

    /// Notify about a configuration problem and latch shutdown when it is
    /// fatal.
    pub async fn report(&self, e: ConfigError) {
        let error = Error::Config(e);
        let c = classify(&error, false);
        if c.notifiable {
            self.dispatcher
                .notify(c.severity(), &c.subject, &error.to_string())
                .await;
        }
        if let Some(reason) = c.shutdown_reason {
            self.registry.shutdown(reason);
        }
    }

    // ── Run ─────────────────────────────────────────────────────────

    /// Wait until no service is registered or the operator interrupts,
    /// then let every poller wind down. Returns the latched shutdown
    /// state, if any.
    pub async fn run(self) -> Option<ShutdownState> {
        let interrupted = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received"),
                Err(e) => {
                    error!(error = %e, "Unable to listen for interrupts");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = self.registry.idle() => info!("No services registered"),
            _ = interrupted => {
                self.registry.shutdown(ShutdownReason::Interrupted);
            }
        }

        self.join().await
    }

    /// Latch shutdown if nothing has yet and wait for every poller.
    pub async fn stop(self) -> Option<ShutdownState> {
        self.registry.shutdown(ShutdownReason::Interrupted);
        self.join().await
    }

    async fn join(self) -> Option<ShutdownState> {
        for joined in join_all(self.pollers).await {
            if let Err(e) = joined {
                error!(error = %e, "Poller task failed");
            }
        }
        self.registry.shutdown_state().cloned()
    }
}
