//! Mailbox transport seam.
//!
//! A [`MailConnector`] opens a [`MailStore`] session against one server.
//! The polling pipeline only talks to these traits; the IMAP and POP3
//! clients live next door and tests plug in memory-backed stores.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::TransportError;

/// Sequence number of a message within the open folder (1-based).
pub type MessageId = u32;

/// A folder on the mail server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// Full hierarchical name, empty for the root.
    pub full_name: String,
    /// Hierarchy separator reported by the server.
    pub separator: char,
}

impl Folder {
    pub fn root(separator: char) -> Self {
        Self {
            full_name: String::new(),
            separator,
        }
    }

    /// Translate a configured name that uses `.` between levels into this
    /// server's hierarchy, relative to `self`.
    pub fn child_path(&self, configured: &str) -> String {
        let name = configured.replace('.', &self.separator.to_string());
        if self.full_name.is_empty() {
            name
        } else {
            format!("{}{}{}", self.full_name, self.separator, name)
        }
    }
}

/// One fetched message. `body` is `None` when the server listed the message
/// but returned no content for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub id: MessageId,
    pub body: Option<Vec<u8>>,
}

/// Where to connect and who to log in as.
#[derive(Debug, Clone)]
pub struct MailCredentials {
    pub server: String,
    /// 0 selects the protocol default.
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Opens authenticated mailbox sessions.
#[async_trait]
pub trait MailConnector: Send + Sync {
    async fn connect(&self, credentials: &MailCredentials)
    -> Result<Box<dyn MailStore>, TransportError>;
}

/// An authenticated mailbox session.
#[async_trait]
pub trait MailStore: Send {
    /// The root of the folder hierarchy.
    async fn default_folder(&mut self) -> Result<Folder, TransportError>;

    /// Resolve `name` below `root`, `None` when no such folder exists.
    async fn resolve_folder(
        &mut self,
        name: &str,
        root: &Folder,
    ) -> Result<Option<Folder>, TransportError>;

    /// Open `folder` for reading and flagging.
    async fn open(&mut self, folder: &Folder) -> Result<(), TransportError>;

    /// Fetch every message of the open folder not yet flagged for
    /// deletion, in one go.
    async fn list_messages(&mut self, folder: &Folder)
    -> Result<Vec<MessageHandle>, TransportError>;

    /// Sequence numbers of the messages not yet flagged for deletion.
    async fn pending_ids(&mut self, folder: &Folder) -> Result<Vec<MessageId>, TransportError>;

    /// Fetch a single message by sequence number.
    async fn fetch_message(
        &mut self,
        folder: &Folder,
        id: MessageId,
    ) -> Result<MessageHandle, TransportError>;

    async fn copy_messages(
        &mut self,
        ids: &[MessageId],
        dest: &Folder,
    ) -> Result<(), TransportError>;

    /// Flag a message for deletion. Removal happens on an expunging close.
    async fn set_delete_flag(&mut self, id: MessageId) -> Result<(), TransportError>;

    async fn close(&mut self, folder: &Folder, expunge: bool) -> Result<(), TransportError>;

    async fn logout(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_path_uses_server_separator() {
        let root = Folder::root('/');
        assert_eq!(root.child_path("Support.Processed"), "Support/Processed");
        assert_eq!(Folder::root('.').child_path("Support.Processed"), "Support.Processed");
    }

    #[test]
    fn child_path_nests_under_parent() {
        let parent = Folder {
            full_name: "Shared".into(),
            separator: '/',
        };
        assert_eq!(parent.child_path("Errors"), "Shared/Errors");
    }
}
