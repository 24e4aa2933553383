//! Wire email assembly

use crate::messenger::MessengerError;
use crate::smtp::Envelope;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lettre::message::header::ContentType as MimeType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::Address;
use tracing::warn;
use txmail_common::types::HEADER_RETURN_PATH;
use txmail_common::{Attachment, ContentType, Headers, Message};
use uuid::Uuid;

/// Headers produced by the builder; custom values for these are dropped
const RESERVED_HEADERS: &[&str] = &[
    "From",
    "To",
    "Subject",
    "Date",
    "Message-ID",
    "MIME-Version",
    "Content-Type",
    "Content-Transfer-Encoding",
    "Bcc",
];

enum Body {
    Single(SinglePart),
    Multi(MultiPart),
}

/// Build the envelope and RFC 5322 content for `message`.
///
/// `server_headers` come first, message headers are added after them. A
/// `Return-Path` header is removed and becomes the envelope sender.
pub fn assemble(message: &Message, server_headers: &Headers) -> Result<Envelope, MessengerError> {
    let from: Mailbox = message
        .from
        .trim()
        .parse()
        .map_err(|_| MessengerError::InvalidFromAddress(message.from.clone()))?;

    let mut headers = server_headers.clone();
    headers.extend_from(&message.headers);

    let envelope_from = match return_path(&mut headers)? {
        Some(address) => address.to_string(),
        None => from.email.to_string(),
    };

    let mut builder = lettre::Message::builder()
        .message_id(Some(format!("<{}@{}>", Uuid::new_v4(), from.email.domain())))
        .from(from)
        .subject(message.subject.as_str());

    let mut recipients = Vec::with_capacity(message.to.len());
    for to in &message.to {
        let mailbox: Mailbox = to
            .trim()
            .parse()
            .map_err(|e| MessengerError::Assembly(format!("invalid recipient '{}': {}", to, e)))?;
        recipients.push(mailbox.email.to_string());
        builder = builder.to(mailbox);
    }
    if recipients.is_empty() {
        return Err(MessengerError::Assembly("message has no recipients".to_string()));
    }

    let body = match message.content_type {
        ContentType::Plain => Body::Single(SinglePart::plain(message.body.clone())),
        ContentType::Html => match message.alt_body.as_deref().filter(|alt| !alt.is_empty()) {
            Some(alt) => Body::Multi(MultiPart::alternative_plain_html(
                alt.to_string(),
                message.body.clone(),
            )),
            None => Body::Single(SinglePart::html(message.body.clone())),
        },
    };

    let built = if message.attachments.is_empty() {
        match body {
            Body::Single(part) => builder.singlepart(part),
            Body::Multi(part) => builder.multipart(part),
        }
    } else {
        let mut mixed = match body {
            Body::Single(part) => MultiPart::mixed().singlepart(part),
            Body::Multi(part) => MultiPart::mixed().multipart(part),
        };
        for attachment in &message.attachments {
            mixed = mixed.singlepart(attachment_part(attachment)?);
        }
        builder.multipart(mixed)
    };
    let built = built.map_err(|e| MessengerError::Assembly(e.to_string()))?;

    let mut data = custom_header_block(&headers);
    data.extend_from_slice(&built.formatted());

    Ok(Envelope {
        from: envelope_from,
        recipients,
        data,
    })
}

/// Remove `Return-Path` and parse its last value, so a message-level
/// value overrides the server's
fn return_path(headers: &mut Headers) -> Result<Option<Address>, MessengerError> {
    let Some(values) = headers.remove(HEADER_RETURN_PATH) else {
        return Ok(None);
    };

    let raw = values.into_iter().last().unwrap_or_default();
    let bare = raw
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim();
    if bare.is_empty() {
        return Ok(None);
    }

    bare.parse::<Address>()
        .map(Some)
        .map_err(|e| MessengerError::Assembly(format!("invalid Return-Path '{}': {}", raw, e)))
}

fn attachment_part(attachment: &Attachment) -> Result<SinglePart, MessengerError> {
    let mime = attachment
        .content_type()
        .unwrap_or("application/octet-stream");
    let content_type = MimeType::parse(mime).map_err(|e| {
        MessengerError::Assembly(format!(
            "invalid content type '{}' for attachment {}: {}",
            mime, attachment.name, e
        ))
    })?;

    Ok(MimeAttachment::new(attachment.name.clone()).body(attachment.content.clone(), content_type))
}

fn custom_header_block(headers: &Headers) -> Vec<u8> {
    let mut block = Vec::new();

    for (name, value) in headers.iter() {
        if RESERVED_HEADERS
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(name))
        {
            continue;
        }
        if !is_valid_header_name(name) {
            warn!("Skipping header with invalid name {:?}", name);
            continue;
        }
        block.extend_from_slice(name.as_bytes());
        block.extend_from_slice(b": ");
        block.extend_from_slice(encode_header_value(value).as_bytes());
        block.extend_from_slice(b"\r\n");
    }

    block
}

fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (33..=126).contains(&b) && b != b':')
}

/// Strip line breaks; RFC 2047 encode non-ASCII values
fn encode_header_value(value: &str) -> String {
    let flat: String = value.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    if flat.is_ascii() {
        flat
    } else {
        format!("=?utf-8?b?{}?=", BASE64.encode(flat.as_bytes()))
    }
}
