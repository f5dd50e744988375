//! Grouping fetched messages into submission batches.

use chrono::{DateTime, Local};

use crate::cases::CaseRecord;
use crate::error::ParseError;
use crate::mail::{AttachmentPolicy, MessageHandle, MessageId, ParsedMessage, parse_message_at};

/// Messages per case service call.
pub const BATCH_SIZE: usize = 5;

/// A parsed message and the mailbox message it came from.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: MessageId,
    pub message: ParsedMessage,
}

/// Up to [`BATCH_SIZE`] consecutive mailbox messages. Messages whose body
/// could not be retrieved are kept aside for quarantine.
#[derive(Debug, Default)]
pub struct Batch {
    pub items: Vec<BatchItem>,
    pub unparsed: Vec<(MessageId, ParseError)>,
}

impl Batch {
    pub fn ids(&self) -> Vec<MessageId> {
        self.items.iter().map(|i| i.id).collect()
    }

    pub fn records(&self) -> Vec<CaseRecord> {
        self.items.iter().map(|i| CaseRecord::from(&i.message)).collect()
    }

    /// Combined payload of every parsed message.
    pub fn payload_size(&self) -> u64 {
        self.items.iter().map(|i| i.message.payload_size()).sum()
    }

    pub fn len(&self) -> usize {
        self.items.len() + self.unparsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse `handles` and split them into batches, preserving mailbox order.
pub fn make_batches(handles: Vec<MessageHandle>, policy: &AttachmentPolicy) -> Vec<Batch> {
    make_batches_at(handles, policy, Local::now())
}

pub fn make_batches_at(
    handles: Vec<MessageHandle>,
    policy: &AttachmentPolicy,
    now: DateTime<Local>,
) -> Vec<Batch> {
    let mut batches = Vec::with_capacity(handles.len().div_ceil(BATCH_SIZE));
    let mut handles = handles.into_iter().peekable();
    while handles.peek().is_some() {
        let mut batch = Batch::default();
        for handle in handles.by_ref().take(BATCH_SIZE) {
            match handle.body {
                Some(raw) => batch.items.push(BatchItem {
                    id: handle.id,
                    message: parse_message_at(&raw, policy, now),
                }),
                None => batch
                    .unparsed
                    .push((handle.id, ParseError::MissingBody(handle.id))),
            }
        }
        batches.push(batch);
    }
    batches
}
