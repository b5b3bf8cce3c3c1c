use chrono::{DateTime, Utc};
use mail_parser::{Address, MessageParser, MimeHeaders, PartType};

use super::types::{AttachmentInfo, MessageRecord, RawMessage};
use crate::error::SyncError;

/// Turn a fetched message into a structured record.
///
/// A failure here only ever affects this one message.
pub fn parse_message(raw: &RawMessage) -> Result<MessageRecord, SyncError> {
    let parse_error = |reason: &str| SyncError::Parse {
        uid: raw.uid,
        reason: reason.to_string(),
    };

    if raw.bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(parse_error("empty message"));
    }

    let message = MessageParser::default()
        .parse(&raw.bytes)
        .ok_or_else(|| parse_error("not an RFC 5322 message"))?;

    if message.headers().is_empty() {
        return Err(parse_error("message has no headers"));
    }

    let sender = message
        .from()
        .and_then(|from| from.first())
        .map(|addr| match (addr.name(), addr.address()) {
            (Some(name), Some(address)) => format!("{} <{}>", name, address),
            (None, Some(address)) => address.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => String::new(),
        })
        .unwrap_or_default();

    let mut recipients = collect_addresses(message.to());
    recipients.extend(collect_addresses(message.cc()));

    // Messages without a usable Date header are stamped with the fetch time
    let timestamp = message
        .date()
        .and_then(|date| DateTime::<Utc>::from_timestamp(date.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    let html_body = extract_html_body(&message);
    let body = match extract_text_body(&message) {
        Some(text) => text,
        None => html_body.as_deref().map(html_to_text).unwrap_or_default(),
    };

    let attachments = message
        .attachments()
        .map(|part| AttachmentInfo {
            filename: part
                .attachment_name()
                .unwrap_or("unnamed")
                .to_string(),
            mime_type: part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size: part.contents().len(),
        })
        .collect();

    let in_reply_to = message
        .in_reply_to()
        .as_text_list()
        .and_then(|ids| ids.first().map(|s| s.to_string()));

    Ok(MessageRecord {
        uid: raw.uid,
        message_id: message.message_id().map(|s| s.to_string()),
        subject: message.subject().map(|s| s.to_string()).unwrap_or_default(),
        sender,
        recipients,
        timestamp,
        body,
        html_body,
        attachments,
        in_reply_to,
    })
}

fn collect_addresses(addresses: Option<&Address<'_>>) -> Vec<String> {
    addresses
        .map(|addrs| {
            addrs
                .iter()
                .filter_map(|addr| addr.address())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn extract_text_body(message: &mail_parser::Message) -> Option<String> {
    for part in message.text_bodies() {
        if let PartType::Text(text) = &part.body {
            return Some(text.to_string());
        }
    }
    None
}

fn extract_html_body(message: &mail_parser::Message) -> Option<String> {
    for part in message.html_bodies() {
        if let PartType::Html(html) = &part.body {
            return Some(html.to_string());
        }
    }
    None
}

/// Readable plain text for HTML-only messages
fn html_to_text(html: &str) -> String {
    html2text::config::plain()
        .string_from_read(html.as_bytes(), 80)
        .unwrap_or_else(|_| html.to_string())
        .trim()
        .to_string()
}
