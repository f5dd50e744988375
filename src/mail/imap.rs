//! IMAP client over plain TCP or TLS.
//!
//! Speaks just enough IMAP4rev1 for the polling cycle: LOGIN, LIST, SELECT,
//! SEARCH UNDELETED, FETCH RFC822, COPY, STORE, CLOSE and LOGOUT. The socket is blocking, so
//! every command runs on the blocking pool with the session moved in and
//! handed back afterwards.

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::debug;

use super::transport::{Folder, MailConnector, MailCredentials, MailStore, MessageHandle, MessageId};
use super::wire::{Wire, connect_stream};
use crate::error::TransportError;

/// Separator assumed when the server reports none.
const DEFAULT_SEPARATOR: char = '/';

/// Opens [`ImapStore`] sessions.
#[derive(Debug, Clone, Copy)]
pub struct ImapConnector {
    pub tls: bool,
}

#[async_trait]
impl MailConnector for ImapConnector {
    async fn connect(
        &self,
        credentials: &MailCredentials,
    ) -> Result<Box<dyn MailStore>, TransportError> {
        let credentials = credentials.clone();
        let tls = self.tls;
        let session = tokio::task::spawn_blocking(move || ImapSession::login(&credentials, tls))
            .await
            .map_err(|e| TransportError::Task(e.to_string()))??;
        Ok(Box::new(ImapStore {
            session: Some(session),
        }))
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// One untagged server response with any literals it carried.
#[derive(Debug, Default)]
struct Untagged {
    text: String,
    literals: Vec<Vec<u8>>,
}

struct ImapSession {
    wire: Wire,
    tag: u32,
    selected: Option<String>,
}

impl ImapSession {
    fn login(credentials: &MailCredentials, tls: bool) -> Result<Self, TransportError> {
        let port = match credentials.port {
            0 if tls => 993,
            0 => 143,
            p => p,
        };
        let stream = connect_stream(&credentials.server, port, tls)?;
        let mut session = Self {
            wire: Wire::new(stream),
            tag: 0,
            selected: None,
        };

        let greeting = session.wire.read_line()?;
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(TransportError::Connect {
                server: credentials.server.clone(),
                reason: format!("unexpected greeting: {greeting}"),
            });
        }

        let login = format!(
            "LOGIN {} {}",
            quote(&credentials.username),
            quote(credentials.password.expose_secret())
        );
        match session.command(&login) {
            Ok(_) => Ok(session),
            Err(TransportError::Rejected { reason, .. }) => Err(TransportError::Auth {
                server: credentials.server.clone(),
                user: credentials.username.clone(),
                reason,
            }),
            Err(e) => Err(e),
        }
    }

    /// Send a tagged command and collect untagged responses until the
    /// tagged completion. NO and BAD completions become `Rejected`.
    fn command(&mut self, command: &str) -> Result<Vec<Untagged>, TransportError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        self.wire.send_line(&format!("{tag} {command}"))?;

        let verb = command.split_whitespace().next().unwrap_or_default().to_string();
        let mut responses = Vec::new();
        loop {
            let line = self.wire.read_line()?;
            if let Some(status) = line.strip_prefix(&tag).map(str::trim_start) {
                if status.starts_with("OK") {
                    return Ok(responses);
                }
                return Err(TransportError::Rejected {
                    command: verb,
                    reason: status.to_string(),
                });
            }
            if line.starts_with('+') {
                return Err(TransportError::Protocol(format!(
                    "unexpected continuation for {verb}"
                )));
            }
            responses.push(self.untagged(line)?);
        }
    }

    /// Finish an untagged response, pulling in literal blocks.
    fn untagged(&mut self, first: String) -> Result<Untagged, TransportError> {
        let mut response = Untagged::default();
        let mut line = first;
        loop {
            let literal = literal_len(&line);
            response.text.push_str(&line);
            match literal {
                Some(len) => {
                    response.literals.push(self.wire.read_exact(len)?);
                    line = self.wire.read_line()?;
                }
                None => return Ok(response),
            }
        }
    }

    fn separator(&mut self) -> Result<char, TransportError> {
        let responses = self.command(r#"LIST "" """#)?;
        Ok(responses
            .iter()
            .find_map(|r| list_separator(&r.text))
            .unwrap_or(DEFAULT_SEPARATOR))
    }

    fn exists(&mut self, path: &str) -> Result<bool, TransportError> {
        let responses = self.command(&format!(r#"LIST "" {}"#, quote(path)))?;
        Ok(responses.iter().any(|r| r.text.starts_with("* LIST")))
    }

    fn select(&mut self, path: &str) -> Result<(), TransportError> {
        let responses = self.command(&format!("SELECT {}", quote(path)))?;
        let messages = responses
            .iter()
            .find_map(|r| exists_count(&r.text))
            .unwrap_or(0);
        self.selected = Some(path.to_string());
        debug!(folder = path, messages, "IMAP folder selected");
        Ok(())
    }

    /// Sequence numbers in `path` without the `\Deleted` flag. Messages
    /// flagged by a cycle that never expunged are skipped.
    fn undeleted(&mut self, path: &str) -> Result<Vec<MessageId>, TransportError> {
        if self.selected.as_deref() != Some(path) {
            self.select(path)?;
        }
        let responses = self.command("SEARCH UNDELETED")?;
        Ok(responses
            .iter()
            .filter_map(|r| search_ids(&r.text))
            .flatten()
            .collect())
    }

    /// FETCH the given messages, one handle per requested id in request
    /// order. Servers may interleave unsolicited FETCH responses (flag
    /// updates, other messages); only the first literal per id counts.
    fn fetch(&mut self, ids: &[MessageId]) -> Result<Vec<MessageHandle>, TransportError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let responses = self.command(&format!("FETCH {} RFC822", sequence_set(ids)))?;
        let mut bodies: HashMap<MessageId, Vec<u8>> = HashMap::new();
        for r in responses {
            let Some(id) = fetch_id(&r.text) else {
                continue;
            };
            if let Some(body) = r.literals.into_iter().next() {
                bodies.entry(id).or_insert(body);
            }
        }
        Ok(ids
            .iter()
            .map(|&id| MessageHandle {
                id,
                body: bodies.remove(&id),
            })
            .collect())
    }

    fn close(&mut self, expunge: bool) -> Result<(), TransportError> {
        if self.selected.take().is_some() && expunge {
            self.command("CLOSE")?;
        }
        Ok(())
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// An authenticated IMAP session.
pub struct ImapStore {
    session: Option<ImapSession>,
}

impl ImapStore {
    /// Run `op` on the blocking pool with the session moved in.
    async fn run<T, F>(&mut self, op: F) -> Result<T, TransportError>
    where
        F: FnOnce(&mut ImapSession) -> Result<T, TransportError> + Send + 'static,
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
impl MailStore for ImapStore {
    async fn default_folder(&mut self) -> Result<Folder, TransportError> {
        let separator = self.run(|s| s.separator()).await?;
        Ok(Folder::root(separator))
    }

    async fn resolve_folder(
        &mut self,
        name: &str,
        root: &Folder,
    ) -> Result<Option<Folder>, TransportError> {
        let path = root.child_path(name);
        let lookup = path.clone();
        let found = self.run(move |s| s.exists(&lookup)).await?;
        Ok(found.then(|| Folder {
            full_name: path,
            separator: root.separator,
        }))
    }

    async fn open(&mut self, folder: &Folder) -> Result<(), TransportError> {
        let path = folder.full_name.clone();
        self.run(move |s| s.select(&path)).await
    }

    async fn list_messages(
        &mut self,
        folder: &Folder,
    ) -> Result<Vec<MessageHandle>, TransportError> {
        let path = folder.full_name.clone();
        self.run(move |s| {
            let ids = s.undeleted(&path)?;
            s.fetch(&ids)
        })
        .await
    }

    async fn pending_ids(&mut self, folder: &Folder) -> Result<Vec<MessageId>, TransportError> {
        let path = folder.full_name.clone();
        self.run(move |s| s.undeleted(&path)).await
    }

    async fn fetch_message(
        &mut self,
        _folder: &Folder,
        id: MessageId,
    ) -> Result<MessageHandle, TransportError> {
        let fetched = self.run(move |s| s.fetch(&[id])).await?;
        Ok(fetched
            .into_iter()
            .next()
            .unwrap_or(MessageHandle { id, body: None }))
    }

    async fn copy_messages(
        &mut self,
        ids: &[MessageId],
        dest: &Folder,
    ) -> Result<(), TransportError> {
        if ids.is_empty() {
            return Ok(());
        }
        let command = format!("COPY {} {}", sequence_set(ids), quote(&dest.full_name));
        self.run(move |s| s.command(&command).map(drop)).await
    }

    async fn set_delete_flag(&mut self, id: MessageId) -> Result<(), TransportError> {
        self.run(move |s| s.command(&format!(r"STORE {id} +FLAGS.SILENT (\Deleted)")).map(drop))
            .await
    }

    async fn close(&mut self, _folder: &Folder, expunge: bool) -> Result<(), TransportError> {
        self.run(move |s| s.close(expunge)).await
    }

    async fn logout(&mut self) -> Result<(), TransportError> {
        let result = self.run(|s| s.command("LOGOUT").map(drop)).await;
        self.session = None;
        result
    }
}

// ── Response parsing ────────────────────────────────────────────────

/// Quote a string for use as an IMAP astring.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Length of a `{n}` literal announced at the end of a line.
fn literal_len(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].trim_end_matches('+').parse().ok()
}

/// Hierarchy separator from `* LIST (flags) "sep" name`.
fn list_separator(line: &str) -> Option<char> {
    let rest = line.strip_prefix("* LIST")?;
    let after_flags = &rest[rest.find(')')? + 1..];
    let after_flags = after_flags.trim_start();
    let quoted = after_flags.strip_prefix('"')?;
    let mut chars = quoted.chars();
    match chars.next()? {
        '\\' => chars.next(),
        c => Some(c),
    }
}

/// Message count from `* n EXISTS`.
fn exists_count(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("* ")?;
    let (n, word) = rest.split_once(' ')?;
    if word.trim().eq_ignore_ascii_case("EXISTS") {
        n.parse().ok()
    } else {
        None
    }
}

/// Ids from `* SEARCH 2 5 9`.
fn search_ids(line: &str) -> Option<Vec<MessageId>> {
    let rest = line.strip_prefix("* SEARCH")?;
    Some(rest.split_whitespace().filter_map(|n| n.parse().ok()).collect())
}

/// Compact sequence set, runs of consecutive ids as `a:b`.
fn sequence_set(ids: &[MessageId]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = ids.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        parts.push(if start == end {
            start.to_string()
        } else {
            format!("{start}:{end}")
        });
    }
    parts.join(",")
}

/// Sequence number from `* n FETCH (...`.
fn fetch_id(line: &str) -> Option<MessageId> {
    let rest = line.strip_prefix("* ")?;
    let (n, rest) = rest.split_once(' ')?;
    if rest.starts_with("FETCH") {
        n.parse().ok()
    } else {
        None
    }
}
