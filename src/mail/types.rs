//! Parsed message types shared by the parser and the batch pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One decoded header line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

/// A sender address with its display name when one was given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub name: Option<String>,
    pub address: String,
}

/// An attachment carried inline in the case record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Attachment {
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// An attachment too large for the case record, staged for the
/// attachment store. `relative_path` uses `/` separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OversizedAttachment {
    pub relative_path: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Structured view of one raw message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    pub headers: Vec<HeaderField>,
    pub from: Vec<Sender>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
    pub oversized: Vec<OversizedAttachment>,
}

impl ParsedMessage {
    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Approximate in-memory payload size, used against the memory ceiling.
    pub fn payload_size(&self) -> u64 {
        let headers: usize = self
            .headers
            .iter()
            .map(|h| h.name.len() + h.value.len())
            .sum();
        let attachments: usize = self.attachments.iter().map(Attachment::size).sum();
        (headers + self.subject.len() + self.text_body.len() + self.html_body.len() + attachments)
            as u64
    }
}

/// How attachments are sized up and where oversized ones will live.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentPolicy {
    /// Attachments at or above this many bytes are externalized.
    pub max_size: Option<u64>,
    /// Prefix of the public URL the proxy stub links to.
    pub url_prefix: String,
    /// Local directory backing the URL prefix.
    pub directory: Option<PathBuf>,
}

impl AttachmentPolicy {
    pub fn unlimited() -> Self {
        Self {
            max_size: None,
            url_prefix: String::new(),
            directory: None,
        }
    }

    pub fn is_oversized(&self, size: usize) -> bool {
        self.max_size.is_some_and(|max| size as u64 >= max)
    }
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self::unlimited()
    }
}
