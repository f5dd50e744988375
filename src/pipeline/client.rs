//! One mail account's polling cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::batch::make_batches;
use super::submitter::{BatchSubmitter, MailboxFolders};
use crate::agent::classifier::classify;
use crate::agent::registry::AgentRegistry;
use crate::agent::throttle::AdmissionThrottle;
use crate::cases::SessionManager;
use crate::config::MailAccount;
use crate::error::{Error, Result};
use crate::mail::{AttachmentPolicy, MailConnector, MailStore, MessageHandle, MessageId};
use crate::notify::{NotificationDispatcher, SUBJECT_MAIL_AUTH, SUBJECT_MAIL_CONNECT};

/// Unrecognized transport failures during a cycle do not stop the agent.
const SHUTDOWN_ON_TRANSPORT_ERROR: bool = false;

/// Upper bound on each of close and logout once the cycle is over.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared collaborators handed to every client.
#[derive(Clone)]
pub struct ClientContext {
    pub registry: Arc<AgentRegistry>,
    pub throttle: Arc<AdmissionThrottle>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub submitter: Arc<BatchSubmitter>,
    pub policy: AttachmentPolicy,
}

/// Polls one mailbox and turns its messages into cases.
pub struct MailClient {
    account: MailAccount,
    connector: Arc<dyn MailConnector>,
    context: ClientContext,
    /// Serializes cycles and owns the case service session.
    session: Mutex<SessionManager>,
}

impl MailClient {
    pub fn new(
        account: MailAccount,
        connector: Arc<dyn MailConnector>,
        session: SessionManager,
        context: ClientContext,
    ) -> Self {
        Self {
            account,
            connector,
            context,
            session: Mutex::new(session),
        }
    }

    pub fn account(&self) -> &MailAccount {
        &self.account
    }

    /// Run one polling cycle. Failures are classified and reported here;
    /// nothing is returned to the caller.
    ///
    /// The cycle has until the account timeout to finish its work. Work
    /// still running at the deadline is abandoned, but an opened inbox is
    /// always closed with expunge and the session logged out, so messages
    /// already filed are not picked up again.
    pub async fn receive(&self) {
        let deadline = Instant::now() + self.account.timeout;
        let key = self.account.admission_key();
        if self.context.registry.is_shutdown() {
            debug!(account = %key, "Agent shut down, skipping cycle");
            return;
        }
        let Some(_permit) = self.context.throttle.admit(&key) else {
            info!(account = %key, "Previous cycles still running, skipping");
            return;
        };

        let Ok(mut session) = timeout_at(deadline, self.session.lock()).await else {
            self.overran();
            return;
        };
        let span = info_span!("cycle", account = %key, cycle = %Uuid::new_v4());
        self.cycle(&mut session, deadline).instrument(span).await;
    }

    async fn cycle(&self, session: &mut SessionManager, deadline: Instant) {
        let credentials = self.account.credentials();
        let connected = timeout_at(deadline, self.connector.connect(&credentials)).await;
        let mut store = match connected {
            Ok(Ok(store)) => store,
            Ok(Err(e)) => {
                let subject = if e.is_auth() {
                    SUBJECT_MAIL_AUTH
                } else {
                    SUBJECT_MAIL_CONNECT
                };
                let body = format!(
                    "Service: {}\nUser: {}\n\nMessage: {e}",
                    self.account.server, self.account.username
                );
                self.fail(Error::Transport(e), Some(subject), Some(body), session)
                    .await;
                return;
            }
            Err(_) => {
                self.overran();
                return;
            }
        };

        let configured = timeout_at(deadline, self.configure(store.as_mut())).await;
        match configured {
            Ok(Ok(folders)) => {
                let processed =
                    timeout_at(deadline, self.process(store.as_mut(), &folders, session)).await;
                match processed {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => self.fail(e, None, None, session).await,
                    Err(_) => {
                        self.overran();
                        // A case call may have been cut off mid-request.
                        session.invalidate();
                    }
                }
                match timeout(CLEANUP_TIMEOUT, store.close(&folders.inbox, true)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Failed to close inbox"),
                    Err(_) => warn!("Timed out closing inbox"),
                }
            }
            Ok(Err(e)) => self.fail(e, None, None, session).await,
            Err(_) => self.overran(),
        }

        match timeout(CLEANUP_TIMEOUT, store.logout()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Logout failed"),
            Err(_) => debug!("Timed out logging out"),
        }
    }

    fn overran(&self) {
        warn!(
            account = %self.account.admission_key(),
            "Polling cycle exceeded {} minute(s), abandoning remaining work",
            self.account.timeout.as_secs() / 60
        );
    }

    async fn configure(&self, store: &mut dyn MailStore) -> Result<MailboxFolders> {
        let protocol = self.account.protocol;
        let root = store.default_folder().await?;
        let inbox = protocol
            .configure_inbox(store, &root, &self.account.inbox)
            .await?;
        let readbox = protocol
            .configure_readbox(store, &root, self.account.readbox.as_deref())
            .await?;
        let errorbox = protocol
            .configure_errorbox(store, &root, self.account.errorbox.as_deref())
            .await?;
        store.open(&inbox).await?;
        Ok(MailboxFolders {
            inbox,
            readbox,
            errorbox,
        })
    }

    async fn process(
        &self,
        store: &mut dyn MailStore,
        folders: &MailboxFolders,
        session: &mut SessionManager,
    ) -> Result<()> {
        let handles = retrieve(store, folders).await?;
        if handles.is_empty() {
            debug!("No messages");
            return Ok(());
        }
        info!(messages = handles.len(), "Processing messages");

        for batch in make_batches(handles, &self.context.policy) {
            if self.context.registry.is_shutdown() {
                info!("Agent shut down, leaving remaining messages");
                break;
            }
            self.context
                .submitter
                .submit(store, folders, session, batch)
                .await?;
        }
        Ok(())
    }

    async fn fail(
        &self,
        error: Error,
        subject: Option<&str>,
        body: Option<String>,
        session: &mut SessionManager,
    ) {
        let c = classify(&error, SHUTDOWN_ON_TRANSPORT_ERROR);
        error!(error = %error, fatal = c.fatal, "Cycle failed");

        if c.invalidate_session {
            session.invalidate();
        }
        if c.notifiable {
            let subject = subject.unwrap_or(c.subject.as_str());
            let body = body.unwrap_or_else(|| error.to_string());
            self.context
                .dispatcher
                .notify(c.severity(), subject, &body)
                .await;
        }
        if let Some(reason) = c.shutdown_reason {
            self.context.registry.shutdown(reason);
        }
    }
}

/// Fetch every message of the inbox, falling back to one fetch per index
/// and quarantining the indices that cannot be read.
async fn retrieve(
    store: &mut dyn MailStore,
    folders: &MailboxFolders,
) -> Result<Vec<MessageHandle>> {
    let bulk = store.list_messages(&folders.inbox).await;
    let error = match bulk {
        Ok(handles) => return Ok(handles),
        Err(e) => e,
    };
    warn!(error = %error, "Bulk fetch failed, fetching messages one at a time");

    let ids = store.pending_ids(&folders.inbox).await?;
    let mut handles = Vec::new();
    let mut unreadable: Vec<MessageId> = Vec::new();
    for id in ids {
        match store.fetch_message(&folders.inbox, id).await {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                warn!(message_id = id, error = %e, "Unreadable message");
                unreadable.push(id);
            }
        }
    }

    if !unreadable.is_empty() {
        if let Some(errorbox) = &folders.errorbox {
            store.copy_messages(&unreadable, errorbox).await?;
        }
        for id in &unreadable {
            store.set_delete_flag(*id).await?;
        }
        error!("Unable to process {} message(s).", unreadable.len());
    }
    Ok(handles)
}
