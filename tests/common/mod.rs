//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use mail2case::cases::{CaseConnection, CaseRecord, CaseService, SessionManager, SessionSettings, SubmissionResult};
use mail2case::config::MailAccount;
use mail2case::error::{NotifyError, ServiceError, StorageError, TransportError};
use mail2case::mail::{
    Folder, MailConnector, MailCredentials, MailStore, MessageHandle, MessageId, Protocol,
};
use mail2case::notify::{Notification, Notifier};
use mail2case::storage::AttachmentStore;

pub const SERVER: &str = "mail.example.com";
pub const USER: &str = "support";

/// Raw RFC 822 message with the given subject.
pub fn raw_message(subject: &str) -> Vec<u8> {
    format!(
        "From: Alice Example <alice@example.com>\r\n\
         To: support@example.com\r\n\
         Subject: {subject}\r\n\
         Message-ID: <{}@example.com>\r\n\
         \r\n\
         Please help with {subject}.\r\n",
        subject.replace(' ', "-")
    )
    .into_bytes()
}

pub fn handles(subjects: &[&str]) -> Vec<MessageHandle> {
    subjects
        .iter()
        .enumerate()
        .map(|(i, s)| MessageHandle {
            id: i as MessageId + 1,
            body: Some(raw_message(s)),
        })
        .collect()
}

pub fn inbox() -> Folder {
    Folder {
        full_name: "INBOX".into(),
        separator: '/',
    }
}

pub fn folder(name: &str) -> Folder {
    Folder {
        full_name: name.into(),
        separator: '/',
    }
}

pub fn account() -> MailAccount {
    MailAccount {
        server: SERVER.into(),
        port: 0,
        protocol: Protocol::Imap,
        username: USER.into(),
        password: SecretString::from("secret".to_string()),
        interval: Duration::from_secs(15 * 60),
        timeout: Duration::from_secs(10 * 60),
        inbox: "INBOX".into(),
        readbox: Some("Processed".into()),
        errorbox: Some("Errors".into()),
    }
}

pub fn session_settings() -> SessionSettings {
    SessionSettings {
        refresh: Duration::from_secs(25 * 60),
        timeout: Duration::from_secs(5),
        retry_base: Duration::from_millis(1),
    }
}

pub fn session(service: &Arc<StubCaseService>) -> SessionManager {
    SessionManager::new(service.clone(), session_settings())
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// Everything a test wants to assert about a mailbox.
#[derive(Debug, Default)]
pub struct MailboxState {
    pub folders: Vec<String>,
    pub messages: Vec<MessageHandle>,
    /// Fail the bulk fetch, forcing one fetch per index.
    pub fail_list: bool,
    /// Indices that cannot be fetched on their own.
    pub unreadable: Vec<MessageId>,
    pub opened: Vec<String>,
    pub copies: Vec<(Vec<MessageId>, String)>,
    pub deleted: Vec<MessageId>,
    pub closed: Vec<bool>,
    pub logged_out: bool,
}

impl MailboxState {
    pub fn with_messages(messages: Vec<MessageHandle>) -> Self {
        Self {
            folders: vec!["INBOX".into(), "Processed".into(), "Errors".into()],
            messages,
            ..Self::default()
        }
    }

    /// Ids copied to `folder`, in copy order.
    pub fn copied_to(&self, folder: &str) -> Vec<MessageId> {
        self.copies
            .iter()
            .filter(|(_, dest)| dest == folder)
            .flat_map(|(ids, _)| ids.iter().copied())
            .collect()
    }
}

pub type SharedMailbox = Arc<Mutex<MailboxState>>;

pub fn mailbox(messages: Vec<MessageHandle>) -> SharedMailbox {
    Arc::new(Mutex::new(MailboxState::with_messages(messages)))
}

/// [`MailStore`] over a shared [`MailboxState`].
pub struct MemoryStore {
    pub state: SharedMailbox,
}

impl MemoryStore {
    fn state(&self) -> std::sync::MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl MailStore for MemoryStore {
    async fn default_folder(&mut self) -> Result<Folder, TransportError> {
        Ok(Folder::root('/'))
    }

    async fn resolve_folder(
        &mut self,
        name: &str,
        root: &Folder,
    ) -> Result<Option<Folder>, TransportError> {
        let path = root.child_path(name);
        Ok(self
            .state()
            .folders
            .iter()
            .any(|f| *f == path)
            .then(|| folder(&path)))
    }

    async fn open(&mut self, folder: &Folder) -> Result<(), TransportError> {
        self.state().opened.push(folder.full_name.clone());
        Ok(())
    }

    async fn list_messages(
        &mut self,
        _folder: &Folder,
    ) -> Result<Vec<MessageHandle>, TransportError> {
        let state = self.state();
        if state.fail_list {
            return Err(TransportError::Protocol("FETCH 1:* failed".into()));
        }
        Ok(state.messages.clone())
    }

    async fn pending_ids(&mut self, _folder: &Folder) -> Result<Vec<MessageId>, TransportError> {
        Ok(self.state().messages.iter().map(|m| m.id).collect())
    }

    async fn fetch_message(
        &mut self,
        _folder: &Folder,
        id: MessageId,
    ) -> Result<MessageHandle, TransportError> {
        let state = self.state();
        if state.unreadable.contains(&id) {
            return Err(TransportError::Protocol(format!("FETCH {id} failed")));
        }
        state
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or(TransportError::Closed)
    }

    async fn copy_messages(
        &mut self,
        ids: &[MessageId],
        dest: &Folder,
    ) -> Result<(), TransportError> {
        self.state()
            .copies
            .push((ids.to_vec(), dest.full_name.clone()));
        Ok(())
    }

    async fn set_delete_flag(&mut self, id: MessageId) -> Result<(), TransportError> {
        self.state().deleted.push(id);
        Ok(())
    }

    async fn close(&mut self, _folder: &Folder, expunge: bool) -> Result<(), TransportError> {
        self.state().closed.push(expunge);
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), TransportError> {
        self.state().logged_out = true;
        Ok(())
    }
}

/// How [`MemoryConnector::connect`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Ok,
    AuthFailure,
    Unreachable,
}

pub struct MemoryConnector {
    pub state: SharedMailbox,
    pub mode: ConnectMode,
    pub connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(state: SharedMailbox, mode: ConnectMode) -> Arc<Self> {
        Arc::new(Self {
            state,
            mode,
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailConnector for MemoryConnector {
    async fn connect(
        &self,
        credentials: &MailCredentials,
    ) -> Result<Box<dyn MailStore>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            ConnectMode::Ok => Ok(Box::new(MemoryStore {
                state: self.state.clone(),
            })),
            ConnectMode::AuthFailure => Err(TransportError::Auth {
                server: credentials.server.clone(),
                user: credentials.username.clone(),
                reason: "LOGIN failed".into(),
            }),
            ConnectMode::Unreachable => Err(TransportError::Connect {
                server: format!("{}:143", credentials.server),
                reason: "connection refused".into(),
            }),
        }
    }
}

// ── Case service ────────────────────────────────────────────────────

/// Scripted case service. Without a script every record succeeds.
#[derive(Default)]
pub struct StubCaseService {
    pub batch_script: Mutex<VecDeque<Result<Vec<SubmissionResult>, ServiceError>>>,
    pub single_script: Mutex<VecDeque<Result<SubmissionResult, ServiceError>>>,
    /// Subjects of every batch call, in order.
    pub batches: Mutex<Vec<Vec<String>>>,
    /// Subjects of every single-record call, in order.
    pub singles: Mutex<Vec<String>>,
    pub logins: AtomicUsize,
    /// 1-based batch call that never answers.
    pub stall_at: Mutex<Option<usize>>,
}

impl StubCaseService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_batch(&self, outcome: Result<Vec<SubmissionResult>, ServiceError>) {
        self.batch_script.lock().unwrap().push_back(outcome);
    }

    pub fn script_single(&self, outcome: Result<SubmissionResult, ServiceError>) {
        self.single_script.lock().unwrap().push_back(outcome);
    }

    /// Make the `call`th batch submission hang.
    pub fn stall_batch(&self, call: usize) {
        *self.stall_at.lock().unwrap() = Some(call);
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn batch_subjects(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn single_subjects(&self) -> Vec<String> {
        self.singles.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaseService for StubCaseService {
    async fn login(&self, timeout: Duration) -> Result<CaseConnection, ServiceError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(CaseConnection {
            session_id: SecretString::from("session-1".to_string()),
            endpoint: "https://cases.example.com/api".into(),
            timeout,
        })
    }

    async fn submit_batch(
        &self,
        _connection: &CaseConnection,
        records: &[CaseRecord],
    ) -> Result<Vec<SubmissionResult>, ServiceError> {
        let call = {
            let mut batches = self.batches.lock().unwrap();
            batches.push(records.iter().map(|r| r.subject.clone()).collect());
            batches.len()
        };
        let stall = *self.stall_at.lock().unwrap() == Some(call);
        if stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        match self.batch_script.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(records
                .iter()
                .enumerate()
                .map(|(i, _)| SubmissionResult::created(format!("500{i}")))
                .collect()),
        }
    }

    async fn submit_one(
        &self,
        _connection: &CaseConnection,
        record: &CaseRecord,
    ) -> Result<SubmissionResult, ServiceError> {
        self.singles.lock().unwrap().push(record.subject.clone());
        match self.single_script.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(SubmissionResult::created("5009")),
        }
    }
}

// ── Notifier and attachments ────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAttachments {
    pub written: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryAttachments {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn paths(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachments {
    async fn persist(&self, relative_path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.written
            .lock()
            .unwrap()
            .push((relative_path.to_string(), bytes.to_vec()));
        Ok(())
    }
}
