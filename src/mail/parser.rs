//! Raw message → [`ParsedMessage`].
//!
//! The MIME tree is flattened depth first. Text and HTML leaves build the
//! bodies, everything else becomes an attachment. Attachments at or above
//! the policy's size limit are staged for external storage and replaced by
//! a small HTML page linking to where they will live.

use chrono::{DateTime, Local};
use mail_parser::{Address, Header, Message, MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::{debug, warn};

use super::text::{
    clean_xml, remove_whitespace, replace_bad_filename_chars, subject_to_filename,
    truncate_filename,
};
use super::types::{
    Attachment, AttachmentPolicy, HeaderField, OversizedAttachment, ParsedMessage, Sender,
};

/// Name used when nothing in the part names it.
pub const PLACEHOLDER_NAME: &str = "-";

const PROXY_EXT: &str = ".html";
const PROXY_CONTENT_TYPE: &str = "text/html";
const PROXY_TEMPLATE: &str = "<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 4.01//EN\"><html><head><title>@@URL@@</title></head><body><a href=\"@@URL@@\">@@URL@@</a></body></html>";

/// Content types that, without a file name, are unpacked as a message.
/// Multipart parts never get here; [`PartWalker::walk`] descends into them.
const EMBEDDED_MESSAGE_TYPES: &[&str] = &[
    "message/rfc822",
    "message/partial",
    "message/external-body",
    "message/news",
    "message/http",
];

/// Parse one raw message. Never fails: unparseable input becomes the text
/// body of an otherwise empty message.
pub fn parse_message(raw: &[u8], policy: &AttachmentPolicy) -> ParsedMessage {
    parse_message_at(raw, policy, Local::now())
}

/// Same as [`parse_message`] with a fixed clock for oversized paths.
pub fn parse_message_at(raw: &[u8], policy: &AttachmentPolicy, now: DateTime<Local>) -> ParsedMessage {
    match MessageParser::default().parse(raw) {
        Some(message) => from_message(&message, policy, now),
        None => {
            debug!(bytes = raw.len(), "Unparseable message, keeping raw text");
            ParsedMessage {
                text_body: clean_xml(String::from_utf8_lossy(raw).trim()),
                ..Default::default()
            }
        }
    }
}

fn from_message(message: &Message<'_>, policy: &AttachmentPolicy, now: DateTime<Local>) -> ParsedMessage {
    let mut walker = PartWalker::new(policy, now);
    walker.walk(message, 0);

    ParsedMessage {
        headers: decode_headers(message),
        from: senders(message),
        subject: subject(message),
        text_body: clean_xml(walker.text.trim()),
        html_body: clean_xml(walker.html.trim()),
        attachments: walker.attachments,
        oversized: walker.oversized,
    }
}

// ── MIME walk ───────────────────────────────────────────────────────

struct PartWalker<'p> {
    policy: &'p AttachmentPolicy,
    now: DateTime<Local>,
    text: String,
    html: String,
    attachments: Vec<Attachment>,
    oversized: Vec<OversizedAttachment>,
}

impl<'p> PartWalker<'p> {
    fn new(policy: &'p AttachmentPolicy, now: DateTime<Local>) -> Self {
        Self {
            policy,
            now,
            text: String::new(),
            html: String::new(),
            attachments: Vec::new(),
            oversized: Vec::new(),
        }
    }

    fn walk(&mut self, message: &Message<'_>, part_id: usize) {
        let Some(part) = message.parts.get(part_id) else {
            warn!(part_id, "Missing MIME part");
            return;
        };
        match &part.body {
            PartType::Multipart(children) => {
                for child in children {
                    self.walk(message, *child as usize);
                }
            }
            _ => self.leaf(message, part),
        }
    }

    fn leaf(&mut self, message: &Message<'_>, part: &MessagePart<'_>) {
        let content_type = content_type_of(message.raw_message(), part);
        let is_attachment = part
            .content_disposition()
            .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"));

        if !is_attachment {
            match content_type.as_str() {
                "text/plain" => {
                    self.text.push_str(&part_text(part));
                    self.text.push_str("\n\n");
                    return;
                }
                "text/html" => {
                    self.html.push_str(&part_text(part));
                    self.html.push_str("\n\n");
                    return;
                }
                _ => {}
            }
        }

        self.attachment(part, content_type);
    }

    fn attachment(&mut self, part: &MessagePart<'_>, content_type: String) {
        let filename = part.attachment_name().map(|name| {
            if name.contains("=?") {
                decode_header_text(name)
            } else {
                name.to_string()
            }
        });

        if filename.is_none() && EMBEDDED_MESSAGE_TYPES.contains(&content_type.as_str()) {
            match embedded_message(part, self.policy, self.now) {
                Some((name, content_type, body)) => {
                    self.add(name, content_type, body);
                    return;
                }
                None => debug!(content_type, "Embedded message unreadable, keeping raw part"),
            }
        }

        let name = filename
            .or_else(|| part.content_description().map(str::to_string))
            .or_else(|| part.content_id().map(str::to_string))
            .unwrap_or_else(|| PLACEHOLDER_NAME.to_string());

        self.add(name, content_type, part.contents().to_vec());
    }

    fn add(&mut self, name: String, content_type: String, body: Vec<u8>) {
        let mut filename = truncate_filename(clean_xml(&name).trim());
        if filename.is_empty() {
            filename = PLACEHOLDER_NAME.to_string();
        }

        if body.is_empty() {
            warn!(filename, "Dropping zero-length attachment");
            return;
        }

        if self.policy.is_oversized(body.len()) {
            let relative_path = oversized_path(&filename, self.now);
            let url = format!("{}{}", self.policy.url_prefix, relative_path);
            debug!(filename, size = body.len(), path = %relative_path, "Externalizing oversized attachment");
            self.attachments.push(proxy_stub(&filename, &url));
            self.oversized.push(OversizedAttachment {
                relative_path,
                content_type,
                body,
            });
            return;
        }

        self.attachments.push(Attachment {
            filename,
            content_type,
            body,
        });
    }
}

/// Unpack an attached message into (file name, content type, body).
///
/// HTML wins over text when the embedded message has both.
fn embedded_message(
    part: &MessagePart<'_>,
    policy: &AttachmentPolicy,
    now: DateTime<Local>,
) -> Option<(String, String, Vec<u8>)> {
    let inner = match &part.body {
        PartType::Message(inner) => from_message(inner, policy, now),
        _ => {
            let inner = MessageParser::default().parse(part.contents())?;
            from_message(&inner, policy, now)
        }
    };

    let stem = subject_to_filename(&inner.subject);
    if inner.html_body.is_empty() {
        Some((
            format!("{stem}.txt"),
            "text/plain".to_string(),
            format!("{}\n\n", inner.text_body).into_bytes(),
        ))
    } else {
        Some((
            format!("{stem}.html"),
            "text/html".to_string(),
            inner.html_body.into_bytes(),
        ))
    }
}

fn part_text(part: &MessagePart<'_>) -> String {
    match part.text_contents() {
        Some(text) => text.to_string(),
        None => String::from_utf8_lossy(part.contents()).into_owned(),
    }
}

/// Lower-cased `type/subtype` of a leaf.
///
/// When the library could not read the header, the raw value is decoded
/// and its parameters dropped. Parts without the header are plain text.
fn content_type_of(raw: &[u8], part: &MessagePart<'_>) -> String {
    if let Some(ct) = part.content_type() {
        let full = match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        };
        return full.to_ascii_lowercase();
    }

    match raw_header(raw, &part.headers, "Content-Type") {
        Some(value) => decode_header_text(&value)
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase(),
        None => "text/plain".to_string(),
    }
}

// ── Oversized attachments ───────────────────────────────────────────

/// `yyyyMMdd/yyyyMMdd_HHmmssSSS_<name>` with the name made path safe.
pub fn oversized_path(filename: &str, now: DateTime<Local>) -> String {
    format!(
        "{}/{}_{}",
        now.format("%Y%m%d"),
        now.format("%Y%m%d_%H%M%S%3f"),
        replace_bad_filename_chars(&remove_whitespace(filename))
    )
}

fn proxy_stub(filename: &str, url: &str) -> Attachment {
    Attachment {
        filename: truncate_filename(&format!("{filename}{PROXY_EXT}")),
        content_type: PROXY_CONTENT_TYPE.to_string(),
        body: PROXY_TEMPLATE.replace("@@URL@@", url).into_bytes(),
    }
}

// ── Headers ─────────────────────────────────────────────────────────

fn decode_headers(message: &Message<'_>) -> Vec<HeaderField> {
    let raw = message.raw_message();
    message
        .headers()
        .iter()
        .map(|header| HeaderField {
            name: header.name().to_string(),
            value: clean_xml(&decode_header_text(&raw_value(raw, header).unwrap_or_default())),
        })
        .collect()
}

fn subject(message: &Message<'_>) -> String {
    let subject = match message.subject() {
        Some(s) => s.to_string(),
        None => raw_header(message.raw_message(), message.headers(), "Subject")
            .map(|v| decode_header_text(&v))
            .unwrap_or_default(),
    };
    clean_xml(subject.trim())
}

fn senders(message: &Message<'_>) -> Vec<Sender> {
    let parsed = collect_senders(message.from());
    if !parsed.is_empty() {
        return parsed;
    }

    // The library could not read the From header; decode it ourselves.
    let Some(raw) = raw_header(message.raw_message(), message.headers(), "From") else {
        return Vec::new();
    };
    let decoded = decode_header_text(&raw);
    let synthetic = format!("From: {decoded}\r\n\r\n");
    let reparsed = MessageParser::default()
        .parse(synthetic.as_bytes())
        .map(|m| collect_senders(m.from()))
        .unwrap_or_default();
    if !reparsed.is_empty() {
        return reparsed;
    }

    let address = clean_xml(decoded.trim());
    if address.is_empty() {
        Vec::new()
    } else {
        vec![Sender {
            name: None,
            address,
        }]
    }
}

fn collect_senders(addr: Option<&Address<'_>>) -> Vec<Sender> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    let list: Vec<&mail_parser::Addr<'_>> = match addr {
        Address::List(addrs) => addrs.iter().collect(),
        Address::Group(groups) => groups.iter().flat_map(|g| g.addresses.iter()).collect(),
    };
    list.into_iter()
        .filter_map(|a| {
            let address = clean_xml(a.address.as_deref()?.trim());
            if address.is_empty() {
                return None;
            }
            let name = a
                .name
                .as_deref()
                .map(|n| clean_xml(n.trim()))
                .filter(|n| !n.is_empty());
            Some(Sender { name, address })
        })
        .collect()
}

fn raw_header(raw: &[u8], headers: &[Header<'_>], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name().eq_ignore_ascii_case(name))
        .and_then(|h| raw_value(raw, h))
}

fn raw_value(raw: &[u8], header: &Header<'_>) -> Option<String> {
    let bytes = raw.get(header.offset_start as usize..header.offset_end as usize)?;
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Unfold a raw header value and decode RFC 2047 encoded words.
pub fn decode_header_text(raw: &str) -> String {
    let unfolded: String = raw.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    let unfolded = unfolded.trim();
    if !unfolded.contains("=?") {
        return unfolded.to_string();
    }
    let synthetic = format!("Subject: {unfolded}\r\n\r\n");
    MessageParser::default()
        .parse(synthetic.as_bytes())
        .and_then(|m| m.subject().map(str::to_string))
        .unwrap_or_else(|| unfolded.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap()
    }

    fn parse(raw: &str) -> ParsedMessage {
        parse_message_at(raw.as_bytes(), &AttachmentPolicy::unlimited(), fixed_now())
    }

    const MIXED: &str = concat!(
        "From: \"Jane Doe\" <jane@example.com>\r\n",
        "To: support@example.com\r\n",
        "Subject: Printer on fire\r\n",
        "Message-ID: <abc@example.com>\r\n",
        "MIME-Version: 1.0\r\n",
        "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
        "\r\n",
        "--outer\r\n",
        "Content-Type: multipart/alternative; boundary=\"inner\"\r\n",
        "\r\n",
        "--inner\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "\r\n",
        "It is on fire.\r\n",
        "--inner\r\n",
        "Content-Type: text/html; charset=utf-8\r\n",
        "\r\n",
        "<p>It is on fire.</p>\r\n",
        "--inner--\r\n",
        "--outer\r\n",
        "Content-Type: application/pdf; name=\"manual.pdf\"\r\n",
        "Content-Disposition: attachment; filename=\"manual.pdf\"\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "JVBERi0xLjQK\r\n",
        "--outer--\r\n",
    );

    #[test]
    fn flattens_nested_multipart() {
        let msg = parse(MIXED);
        assert_eq!(msg.subject, "Printer on fire");
        assert_eq!(msg.text_body, "It is on fire.");
        assert_eq!(msg.html_body, "<p>It is on fire.</p>");
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "manual.pdf");
        assert_eq!(msg.attachments[0].content_type, "application/pdf");
        assert_eq!(msg.attachments[0].body, b"%PDF-1.4\n");
        assert!(msg.oversized.is_empty());
    }

    #[test]
    fn sender_and_headers_are_decoded() {
        let msg = parse(MIXED);
        assert_eq!(
            msg.from,
            vec![Sender {
                name: Some("Jane Doe".into()),
                address: "jane@example.com".into(),
            }]
        );
        assert_eq!(msg.header("message-id"), Some("<abc@example.com>"));
        assert_eq!(msg.header("To"), Some("support@example.com"));
    }

    #[test]
    fn encoded_subject_is_decoded() {
        let msg = parse("Subject: =?UTF-8?B?SGVsbG8gV29ybGQ=?=\r\n\r\nbody\r\n");
        assert_eq!(msg.subject, "Hello World");
        assert_eq!(msg.header("subject"), Some("Hello World"));
        assert_eq!(msg.text_body, "body");
    }

    #[test]
    fn control_characters_are_stripped() {
        let msg = parse("Subject: bell\u{7}ring\r\n\r\nline\u{1}one\r\n");
        assert_eq!(msg.subject, "bellring");
        assert_eq!(msg.text_body, "lineone");
    }

    #[test]
    fn unparseable_input_becomes_text() {
        let msg = parse_message_at(b"", &AttachmentPolicy::unlimited(), fixed_now());
        assert!(msg.text_body.is_empty());
        assert!(msg.html_body.is_empty());

        let garbage = [0xffu8, 0xfe, b'\n', b'x'];
        let msg = parse_message_at(&garbage, &AttachmentPolicy::unlimited(), fixed_now());
        assert!(msg.html_body.is_empty());
    }

    #[test]
    fn zero_length_attachment_is_dropped() {
        let raw = concat!(
            "Subject: empty\r\n",
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "hi\r\n",
            "--b\r\n",
            "Content-Type: application/octet-stream\r\n",
            "Content-Disposition: attachment; filename=\"nothing.bin\"\r\n",
            "\r\n",
            "\r\n",
            "--b--\r\n",
        );
        let policy = AttachmentPolicy {
            max_size: Some(0),
            url_prefix: "https://files.example.com/".into(),
            directory: None,
        };
        let msg = parse_message_at(raw.as_bytes(), &policy, fixed_now());
        assert!(msg.attachments.is_empty());
        assert!(msg.oversized.is_empty());
    }

    #[test]
    fn oversized_attachment_gets_proxy_stub() {
        let raw = concat!(
            "Subject: big\r\n",
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: image/png\r\n",
            "Content-Disposition: attachment; filename=\"site photo.png\"\r\n",
            "\r\n",
            "0123456789abcdef\r\n",
            "--b--\r\n",
        );
        let policy = AttachmentPolicy {
            max_size: Some(8),
            url_prefix: "https://files.example.com/large/".into(),
            directory: None,
        };
        let msg = parse_message_at(raw.as_bytes(), &policy, fixed_now());

        assert_eq!(msg.oversized.len(), 1);
        let staged = &msg.oversized[0];
        assert_eq!(staged.relative_path, "20240307/20240307_090501000_sitephoto.png");
        assert_eq!(staged.content_type, "image/png");
        assert_eq!(staged.body, b"0123456789abcdef");

        assert_eq!(msg.attachments.len(), 1);
        let stub = &msg.attachments[0];
        assert_eq!(stub.filename, "site photo.png.html");
        assert_eq!(stub.content_type, "text/html");
        let html = String::from_utf8(stub.body.clone()).unwrap();
        assert!(html.starts_with("<!DOCTYPE HTML PUBLIC"));
        assert!(html.contains(
            "<a href=\"https://files.example.com/large/20240307/20240307_090501000_sitephoto.png\">"
        ));
    }

    #[test]
    fn unnamed_attachment_uses_description_then_placeholder() {
        let raw = concat!(
            "Subject: names\r\n",
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: application/octet-stream\r\n",
            "Content-Description: quarterly numbers\r\n",
            "\r\n",
            "data\r\n",
            "--b\r\n",
            "Content-Type: application/octet-stream\r\n",
            "\r\n",
            "more\r\n",
            "--b--\r\n",
        );
        let msg = parse(raw);
        let names: Vec<_> = msg.attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["quarterly numbers", PLACEHOLDER_NAME]);
    }

    #[test]
    fn long_attachment_name_is_capped() {
        let long = format!("{}.docx", "n".repeat(120));
        let raw = format!(
            concat!(
                "Subject: long\r\n",
                "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
                "\r\n",
                "--b\r\n",
                "Content-Type: application/octet-stream\r\n",
                "Content-Disposition: attachment; filename=\"{}\"\r\n",
                "\r\n",
                "data\r\n",
                "--b--\r\n",
            ),
            long
        );
        let msg = parse(&raw);
        let name = &msg.attachments[0].filename;
        assert_eq!(name.chars().count(), 80);
        assert!(name.ends_with(".docx"));
    }

    #[test]
    fn embedded_message_becomes_named_attachment() {
        let raw = concat!(
            "Subject: Fwd: original\r\n",
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "see attached\r\n",
            "--b\r\n",
            "Content-Type: message/rfc822\r\n",
            "\r\n",
            "Subject: Re: Order #77\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Where is my order?\r\n",
            "--b--\r\n",
        );
        let msg = parse(raw);
        assert_eq!(msg.text_body, "see attached");
        assert_eq!(msg.attachments.len(), 1);
        let embedded = &msg.attachments[0];
        assert_eq!(embedded.filename, "Re_Order#77.txt");
        assert_eq!(embedded.content_type, "text/plain");
        assert_eq!(embedded.body, b"Where is my order?\n\n");
    }

    #[test]
    fn attachment_disposition_wins_over_text_type() {
        let raw = concat!(
            "Subject: log\r\n",
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "body\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "Content-Disposition: attachment; filename=\"server.log\"\r\n",
            "\r\n",
            "boom\r\n",
            "--b--\r\n",
        );
        let msg = parse(raw);
        assert_eq!(msg.text_body, "body");
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "server.log");
    }

    #[test]
    fn missing_content_type_is_plain_text() {
        let msg = parse("Subject: bare\r\n\r\nJust text.\r\n");
        assert_eq!(msg.text_body, "Just text.");
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn decode_header_text_unfolds() {
        assert_eq!(decode_header_text(" first\r\n second"), "first second");
        assert_eq!(decode_header_text("=?ISO-8859-1?Q?caf=E9?="), "café");
    }
}
