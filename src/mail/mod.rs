//! Mailbox access and message parsing.

pub mod imap;
pub mod parser;
pub mod pop3;
pub mod protocol;
pub mod text;
pub mod transport;
pub mod types;
mod wire;

pub use parser::{decode_header_text, oversized_path, parse_message, parse_message_at};
pub use protocol::Protocol;
pub use transport::{Folder, MailConnector, MailCredentials, MailStore, MessageHandle, MessageId};
pub use types::{
    Attachment, AttachmentPolicy, HeaderField, OversizedAttachment, ParsedMessage, Sender,
};
