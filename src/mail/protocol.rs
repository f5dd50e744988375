//! Protocol selection and per-protocol folder setup.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use super::imap::ImapConnector;
use super::pop3::Pop3Connector;
use super::transport::{Folder, MailConnector, MailStore};
use crate::error::{ConfigError, ConfigErrorCode, Error};

/// POP3 has a single mailbox with this name.
pub const POP3_INBOX: &str = "INBOX";

/// Mail access protocol of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Pop3,
    Imap,
    Imaps,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pop3 => "pop3",
            Self::Imap => "imap",
            Self::Imaps => "imaps",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Pop3 => 110,
            Self::Imap => 143,
            Self::Imaps => 993,
        }
    }

    /// Whether messages can be copied into read and error folders.
    pub fn supports_folders(&self) -> bool {
        !matches!(self, Self::Pop3)
    }

    /// The network connector for this protocol.
    pub fn connector(&self) -> Arc<dyn MailConnector> {
        match self {
            Self::Pop3 => Arc::new(Pop3Connector),
            Self::Imap => Arc::new(ImapConnector { tls: false }),
            Self::Imaps => Arc::new(ImapConnector { tls: true }),
        }
    }

    /// Resolve the folder new mail is read from.
    pub async fn configure_inbox(
        &self,
        store: &mut dyn MailStore,
        root: &Folder,
        name: &str,
    ) -> Result<Folder, Error> {
        if !self.supports_folders() {
            if name.eq_ignore_ascii_case(POP3_INBOX) {
                return Ok(Folder {
                    full_name: POP3_INBOX.to_string(),
                    separator: root.separator,
                });
            }
            return Err(folder_error(ConfigErrorCode::MailInboxNotValid, name).into());
        }
        require_folder(store, root, name, ConfigErrorCode::MailInboxNotValid).await
    }

    /// Resolve the folder processed mail is copied to, when configured.
    pub async fn configure_readbox(
        &self,
        store: &mut dyn MailStore,
        root: &Folder,
        name: Option<&str>,
    ) -> Result<Option<Folder>, Error> {
        self.optional_folder(store, root, name, ConfigErrorCode::MailReadboxNotValid)
            .await
    }

    /// Resolve the folder failed mail is copied to.
    pub async fn configure_errorbox(
        &self,
        store: &mut dyn MailStore,
        root: &Folder,
        name: Option<&str>,
    ) -> Result<Option<Folder>, Error> {
        self.optional_folder(store, root, name, ConfigErrorCode::MailErrorboxNotValid)
            .await
    }

    async fn optional_folder(
        &self,
        store: &mut dyn MailStore,
        root: &Folder,
        name: Option<&str>,
        code: ConfigErrorCode,
    ) -> Result<Option<Folder>, Error> {
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok(None);
        };
        if !self.supports_folders() {
            debug!(folder = name, protocol = %self, "Protocol has no folders, ignoring");
            return Ok(None);
        }
        require_folder(store, root, name, code).await.map(Some)
    }
}

async fn require_folder(
    store: &mut dyn MailStore,
    root: &Folder,
    name: &str,
    code: ConfigErrorCode,
) -> Result<Folder, Error> {
    store
        .resolve_folder(name, root)
        .await?
        .ok_or_else(|| folder_error(code, name).into())
}

fn folder_error(code: ConfigErrorCode, name: &str) -> ConfigError {
    ConfigError::with_context(code, format!("Folder: {name}"))
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pop3" => Ok(Self::Pop3),
            "imap" => Ok(Self::Imap),
            "imaps" => Ok(Self::Imaps),
            other => Err(format!("unknown mail protocol: {other}")),
        }
    }
}
