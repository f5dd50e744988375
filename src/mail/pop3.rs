//! POP3 client.
//!
//! POP3 has one mailbox and no folders, so copies are unsupported and
//! deletions only take effect on QUIT.

use async_trait::async_trait;
use secrecy::ExposeSecret;

use super::protocol::POP3_INBOX;
use super::transport::{Folder, MailConnector, MailCredentials, MailStore, MessageHandle, MessageId};
use super::wire::{Wire, connect_stream};
use crate::error::TransportError;

const SEPARATOR: char = '/';

/// Opens [`Pop3Store`] sessions.
#[derive(Debug, Clone, Copy)]
pub struct Pop3Connector;

#[async_trait]
impl MailConnector for Pop3Connector {
    async fn connect(
        &self,
        credentials: &MailCredentials,
    ) -> Result<Box<dyn MailStore>, TransportError> {
        let credentials = credentials.clone();
        let session = tokio::task::spawn_blocking(move || Pop3Session::login(&credentials))
            .await
            .map_err(|e| TransportError::Task(e.to_string()))??;
        Ok(Box::new(Pop3Store {
            session: Some(session),
        }))
    }
}

struct Pop3Session {
    wire: Wire,
    quit: bool,
}

impl Pop3Session {
    fn login(credentials: &MailCredentials) -> Result<Self, TransportError> {
        let port = match credentials.port {
            0 => 110,
            p => p,
        };
        let mut session = Self {
            wire: Wire::new(connect_stream(&credentials.server, port, false)?),
            quit: false,
        };

        let greeting = session.wire.read_line()?;
        if !greeting.starts_with("+OK") {
            return Err(TransportError::Connect {
                server: credentials.server.clone(),
                reason: format!("unexpected greeting: {greeting}"),
            });
        }

        let auth = |e: TransportError| match e {
            TransportError::Rejected { reason, .. } => TransportError::Auth {
                server: credentials.server.clone(),
                user: credentials.username.clone(),
                reason,
            },
            other => other,
        };
        session
            .command(&format!("USER {}", credentials.username))
            .map_err(&auth)?;
        session
            .command(&format!("PASS {}", credentials.password.expose_secret()))
            .map_err(&auth)?;
        Ok(session)
    }

    /// Send a command and return the text after `+OK`.
    fn command(&mut self, command: &str) -> Result<String, TransportError> {
        self.wire.send_line(command)?;
        let reply = self.wire.read_line()?;
        let verb = command.split_whitespace().next().unwrap_or_default();
        match reply.strip_prefix("+OK") {
            Some(rest) => Ok(rest.trim().to_string()),
            None => Err(TransportError::Rejected {
                command: verb.to_string(),
                reason: reply.trim_start_matches("-ERR").trim().to_string(),
            }),
        }
    }

    /// Message numbers from a multi-line LIST. Messages marked with DELE
    /// are left out while their numbers stay reserved.
    fn ids(&mut self) -> Result<Vec<MessageId>, TransportError> {
        self.command("LIST")?;
        let mut ids = Vec::new();
        loop {
            let line = self.wire.read_line()?;
            let line = line.trim_end();
            if line == "." {
                return Ok(ids);
            }
            let id = line
                .split_whitespace()
                .next()
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| TransportError::Protocol(format!("bad LIST line: {line}")))?;
            ids.push(id);
        }
    }

    /// Retrieve one message, undoing dot-stuffing.
    fn retrieve(&mut self, id: MessageId) -> Result<Vec<u8>, TransportError> {
        self.command(&format!("RETR {id}"))?;
        let mut body = Vec::new();
        loop {
            let line = self.wire.read_line_bytes()?;
            let content = line
                .strip_suffix(b"\r\n")
                .or_else(|| line.strip_suffix(b"\n"))
                .unwrap_or(&line[..]);
            if content == b"." {
                return Ok(body);
            }
            let unstuffed = line.strip_prefix(b".").filter(|_| line.starts_with(b".."));
            body.extend_from_slice(unstuffed.unwrap_or(&line[..]));
        }
    }

    fn quit(&mut self) -> Result<(), TransportError> {
        if self.quit {
            return Ok(());
        }
        self.quit = true;
        self.command("QUIT").map(drop)
    }
}

/// An authenticated POP3 session.
pub struct Pop3Store {
    session: Option<Pop3Session>,
}

impl Pop3Store {
    async fn run<T, F>(&mut self, op: F) -> Result<T, TransportError>
    where
        F: FnOnce(&mut Pop3Session) -> Result<T, TransportError> + Send + 'static,
        T: Send + 'static,
    {
        let mut session = self.session.take().ok_or(TransportError::Closed)?;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?;
        self.session = Some(session);
        result
    }
}

#[async_trait]
impl MailStore for Pop3Store {
    async fn default_folder(&mut self) -> Result<Folder, TransportError> {
        Ok(Folder::root(SEPARATOR))
    }

    async fn resolve_folder(
        &mut self,
        name: &str,
        _root: &Folder,
    ) -> Result<Option<Folder>, TransportError> {
        Ok(name.eq_ignore_ascii_case(POP3_INBOX).then(|| Folder {
            full_name: POP3_INBOX.to_string(),
            separator: SEPARATOR,
        }))
    }

    async fn open(&mut self, _folder: &Folder) -> Result<(), TransportError> {
        Ok(())
    }

    async fn list_messages(
        &mut self,
        _folder: &Folder,
    ) -> Result<Vec<MessageHandle>, TransportError> {
        self.run(|s| {
            s.ids()?
                .into_iter()
                .map(|id| -> Result<MessageHandle, TransportError> {
                    Ok(MessageHandle {
                        id,
                        body: Some(s.retrieve(id)?),
                    })
                })
                .collect()
        })
        .await
    }

    async fn pending_ids(&mut self, _folder: &Folder) -> Result<Vec<MessageId>, TransportError> {
        self.run(|s| s.ids()).await
    }

    async fn fetch_message(
        &mut self,
        _folder: &Folder,
        id: MessageId,
    ) -> Result<MessageHandle, TransportError> {
        let body = self.run(move |s| s.retrieve(id)).await?;
        Ok(MessageHandle {
            id,
            body: Some(body),
        })
    }

    async fn copy_messages(
        &mut self,
        _ids: &[MessageId],
        _dest: &Folder,
    ) -> Result<(), TransportError> {
        Err(TransportError::Unsupported {
            protocol: "pop3",
            operation: "copy",
        })
    }

    async fn set_delete_flag(&mut self, id: MessageId) -> Result<(), TransportError> {
        self.run(move |s| s.command(&format!("DELE {id}")).map(drop))
            .await
    }

    /// Deletions commit on QUIT; without expunge they are reset first.
    async fn close(&mut self, _folder: &Folder, expunge: bool) -> Result<(), TransportError> {
        self.run(move |s| {
            if !expunge {
                s.command("RSET")?;
            }
            s.quit()
        })
        .await
    }

    async fn logout(&mut self) -> Result<(), TransportError> {
        let result = self.run(|s| s.quit()).await;
        self.session = None;
        result
    }
}
