//! Wire types exchanged with the case service.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::mail::{Attachment, HeaderField, ParsedMessage};

/// One inbound email as submitted for case creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    pub headers: Vec<HeaderField>,
    pub attachments: Vec<RecordAttachment>,
}

/// Attachment payload, base64 on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAttachment {
    pub file_name: String,
    pub content_type: String,
    #[serde(serialize_with = "encode_body", deserialize_with = "decode_body")]
    pub body: Vec<u8>,
}

impl From<&Attachment> for RecordAttachment {
    fn from(a: &Attachment) -> Self {
        Self {
            file_name: a.filename.clone(),
            content_type: a.content_type.clone(),
            body: a.body.clone(),
        }
    }
}

impl From<&ParsedMessage> for CaseRecord {
    fn from(msg: &ParsedMessage) -> Self {
        let sender = msg.from.first();
        Self {
            subject: msg.subject.clone(),
            text_body: msg.text_body.clone(),
            html_body: msg.html_body.clone(),
            from_address: sender.map(|s| s.address.clone()),
            from_name: sender.and_then(|s| s.name.clone()),
            message_id: msg.header("Message-ID").map(str::to_string),
            in_reply_to: msg.header("In-Reply-To").map(str::to_string),
            headers: msg.headers.clone(),
            attachments: msg.attachments.iter().map(RecordAttachment::from).collect(),
        }
    }
}

fn encode_body<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(body))
}

fn decode_body<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// Body of a batch submission.
#[derive(Debug, Serialize)]
pub struct SubmitRequest<'a> {
    pub records: &'a [CaseRecord],
    pub use_default_assignment_rule: bool,
}

/// Per-record outcome, positionally aligned with the submitted records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub success: bool,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub errors: Vec<RecordError>,
}

impl SubmissionResult {
    pub fn created(id: impl Into<String>) -> Self {
        Self {
            success: true,
            id: Some(id.into()),
            errors: Vec::new(),
        }
    }

    pub fn failed(status_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            errors: vec![RecordError {
                status_code: status_code.into(),
                message: message.into(),
            }],
        }
    }

    pub fn first_error(&self) -> Option<&RecordError> {
        self.errors.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub status_code: String,
    pub message: String,
}
