//! Batch submission and reconciliation of per-item results against the
//! mailbox.
//!
//! Mailbox state only changes once the case service has given an answer
//! for every item, so a failed call leaves the batch in the inbox for the
//! next cycle. The exceptions are messages that could not be read at all,
//! which are quarantined up front, and the first message that also fails
//! on its own during the item-by-item fallback.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::batch::{Batch, BatchItem};
use crate::agent::registry::{AgentRegistry, ShutdownReason};
use crate::cases::{CaseConnection, CaseRecord, SessionManager, SubmissionResult};
use crate::error::{
    ConfigError, ConfigErrorCode, Error, FaultCode, RemoteFault, Result, ServiceError,
    SessionError,
};
use crate::mail::{Folder, MailStore, MessageId};
use crate::storage::AttachmentStore;

/// Folders a cycle reads from and files into.
#[derive(Debug, Clone)]
pub struct MailboxFolders {
    pub inbox: Folder,
    pub readbox: Option<Folder>,
    pub errorbox: Option<Folder>,
}

/// Submits batches and applies the outcome to the mailbox.
pub struct BatchSubmitter {
    attachments: Arc<dyn AttachmentStore>,
    registry: Arc<AgentRegistry>,
    memory_ceiling: Option<u64>,
}

impl BatchSubmitter {
    pub fn new(
        attachments: Arc<dyn AttachmentStore>,
        registry: Arc<AgentRegistry>,
        memory_ceiling: Option<u64>,
    ) -> Self {
        Self {
            attachments,
            registry,
            memory_ceiling,
        }
    }

    /// Submit one batch. Returns the ids of every message that was filed
    /// and flagged for deletion.
    pub async fn submit(
        &self,
        store: &mut dyn MailStore,
        folders: &MailboxFolders,
        session: &mut SessionManager,
        batch: Batch,
    ) -> Result<Vec<MessageId>> {
        let mut processed = self.quarantine_unparsed(store, folders, &batch).await?;
        if batch.items.is_empty() {
            return Ok(processed);
        }

        if let Some(ceiling) = self.memory_ceiling {
            let size = batch.payload_size();
            if size > ceiling {
                return Err(Error::ResourceExhausted {
                    batch_bytes: size,
                    ceiling_bytes: ceiling,
                });
            }
        }

        let records = batch.records();
        let connection = session.acquire().await.map_err(session_failure)?;
        let service = Arc::clone(session.service());

        match service.submit_batch(&connection, &records).await {
            Ok(results) if results.len() != batch.items.len() => Err(Error::ResultMismatch {
                expected: batch.items.len(),
                actual: results.len(),
            }),
            Ok(results) => {
                processed.extend(self.reconcile(store, folders, &batch.items, &results).await?);
                Ok(processed)
            }
            Err(ServiceError::Fault(fault)) => match fault.code {
                FaultCode::FeatureDisabled => {
                    self.registry.shutdown(ShutdownReason::NotEnabled);
                    Err(fault_config(ConfigErrorCode::CaseNotEnabled, &fault))
                }
                FaultCode::InvalidRouting => {
                    Err(fault_config(ConfigErrorCode::CaseRoutingAddressError, &fault))
                }
                FaultCode::ExpiredPassword => {
                    Err(fault_config(ConfigErrorCode::CaseAuthenticationError, &fault))
                }
                FaultCode::Other(_) => {
                    let original = Error::Service(ServiceError::Fault(fault));
                    self.one_by_one(store, folders, &connection, session, &batch.items, original)
                        .await
                }
            },
            Err(ServiceError::Timeout(reason)) => Err(ConfigError::with_context(
                ConfigErrorCode::CaseHttpTimeout,
                reason,
            )
            .into()),
            Err(ServiceError::Connection(reason)) => {
                session.invalidate();
                Err(ServiceError::Connection(reason).into())
            }
            Err(ServiceError::LoginRejected(reason)) => {
                session.invalidate();
                Err(ConfigError::with_context(ConfigErrorCode::CaseAuthenticationError, reason).into())
            }
            Err(e @ ServiceError::Unexpected(_)) => {
                self.one_by_one(store, folders, &connection, session, &batch.items, e.into())
                    .await
            }
        }
    }

    /// Copy messages without a body to the error folder and flag them.
    async fn quarantine_unparsed(
        &self,
        store: &mut dyn MailStore,
        folders: &MailboxFolders,
        batch: &Batch,
    ) -> Result<Vec<MessageId>> {
        let ids: Vec<MessageId> = batch.unparsed.iter().map(|(id, _)| *id).collect();
        for (id, e) in &batch.unparsed {
            warn!(message_id = id, error = %e, "Quarantining unreadable message");
        }
        file_and_delete(store, folders.errorbox.as_ref(), &ids).await?;
        Ok(ids)
    }

    /// Apply aligned per-item results to the mailbox.
    async fn reconcile(
        &self,
        store: &mut dyn MailStore,
        folders: &MailboxFolders,
        items: &[BatchItem],
        results: &[SubmissionResult],
    ) -> Result<Vec<MessageId>> {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (item, result) in items.iter().zip(results) {
            if result.success {
                succeeded.push(item);
            } else {
                let (code, message) = result
                    .first_error()
                    .map(|e| (e.status_code.as_str(), e.message.as_str()))
                    .unwrap_or(("UNKNOWN", "no error detail"));
                error!(message_id = item.id, subject = %item.message.subject, code, "Case creation failed: {message}");
                failed.push(item.id);
            }
        }

        let succeeded_ids: Vec<MessageId> = succeeded.iter().map(|i| i.id).collect();
        if let Some(readbox) = &folders.readbox {
            if !succeeded_ids.is_empty() {
                store.copy_messages(&succeeded_ids, readbox).await?;
            }
        }
        if let Some(errorbox) = &folders.errorbox {
            if !failed.is_empty() {
                store.copy_messages(&failed, errorbox).await?;
            }
        }

        let all: Vec<MessageId> = items.iter().map(|i| i.id).collect();
        for id in &all {
            store.set_delete_flag(*id).await?;
        }

        for item in &succeeded {
            self.persist_oversized(item).await;
        }

        info!(created = succeeded.len(), failed = failed.len(), "Batch submitted");
        Ok(all)
    }

    async fn persist_oversized(&self, item: &BatchItem) {
        for attachment in &item.message.oversized {
            if let Err(e) = self
                .attachments
                .persist(&attachment.relative_path, &attachment.body)
                .await
            {
                error!(message_id = item.id, path = %attachment.relative_path, error = %e, "Failed to store oversized attachment");
            }
        }
    }

    /// Retry each record alone after an unrecognized batch failure. The
    /// first record that fails again is quarantined and the original error
    /// returned; later records stay in the inbox.
    async fn one_by_one(
        &self,
        store: &mut dyn MailStore,
        folders: &MailboxFolders,
        connection: &CaseConnection,
        session: &mut SessionManager,
        items: &[BatchItem],
        original: Error,
    ) -> Result<Vec<MessageId>> {
        warn!(error = %original, items = items.len(), "Batch submission failed, retrying messages one at a time");
        let service = Arc::clone(session.service());

        for item in items {
            let record = CaseRecord::from(&item.message);
            if let Err(e) = service.submit_one(connection, &record).await {
                error!(message_id = item.id, subject = %item.message.subject, error = %e, "Message rejected on its own, moving to error folder");
                file_and_delete(store, folders.errorbox.as_ref(), &[item.id]).await?;
                break;
            }
        }
        Err(original)
    }
}

/// Copy `ids` to `dest` when there is one, then flag them deleted.
async fn file_and_delete(
    store: &mut dyn MailStore,
    dest: Option<&Folder>,
    ids: &[MessageId],
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    if let Some(dest) = dest {
        store.copy_messages(ids, dest).await?;
    }
    for id in ids {
        store.set_delete_flag(*id).await?;
    }
    Ok(())
}

fn fault_config(code: ConfigErrorCode, fault: &RemoteFault) -> Error {
    ConfigError::with_context(code, format!("{}: {}", fault.code, fault.message)).into()
}

fn session_failure(e: SessionError) -> Error {
    match e {
        SessionError::LoginRejected(reason) => {
            ConfigError::with_context(ConfigErrorCode::CaseAuthenticationError, reason).into()
        }
        other => other.into(),
    }
}
