// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire-to-canonical message normalization.
//!
//! Both transports produce [`NormalizedMessage`] from their own payload
//! shapes. Unknown message types degrade to `text` with whatever body can
//! be salvaged; structurally malformed payloads return `None` and the
//! caller drops them with a warning instead of poisoning the pipeline.

use serde_json::Value;
use tracing::debug;
use waflow_core::types::{DeliveryStatus, MessageKind, NormalizedMessage};

use crate::wire::WireMessage;

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Normalize a socket wire message. The content object carries exactly one
/// type-discriminating key.
pub fn normalize_socket(msg: &WireMessage) -> Option<NormalizedMessage> {
    let content = msg.content.as_object()?;

    let base = |kind: MessageKind, body: String| NormalizedMessage {
        external_id: msg.id.clone(),
        kind,
        body,
        caption: None,
        media_type: None,
        media_ref: None,
        timestamp: msg.timestamp,
        sender_phone: msg.sender_phone.clone(),
        chat_id: msg.chat_id.clone(),
        sender_name: msg.push_name.clone(),
        from_me: msg.from_me,
    };

    let media = |kind: MessageKind, inner: &Value| {
        let caption = str_field(inner, "caption").map(str::to_string);
        let mut out = base(kind, caption.clone().unwrap_or_default());
        out.caption = caption;
        out.media_type = str_field(inner, "mimetype").map(str::to_string);
        out.media_ref = str_field(inner, "url").map(str::to_string);
        out
    };

    if let Some(text) = str_field(&msg.content, "conversation") {
        return Some(base(MessageKind::Text, text.to_string()));
    }
    if let Some(ext) = msg.content.get("extendedTextMessage") {
        let text = str_field(ext, "text")?.to_string();
        return Some(base(MessageKind::Text, text));
    }
    if let Some(inner) = msg.content.get("imageMessage") {
        return Some(media(MessageKind::Image, inner));
    }
    if let Some(inner) = msg.content.get("videoMessage") {
        return Some(media(MessageKind::Video, inner));
    }
    if let Some(inner) = msg.content.get("audioMessage") {
        return Some(media(MessageKind::Audio, inner));
    }
    if let Some(inner) = msg.content.get("stickerMessage") {
        return Some(media(MessageKind::Sticker, inner));
    }
    if let Some(inner) = msg.content.get("documentMessage") {
        let mut out = media(MessageKind::Document, inner);
        if out.body.is_empty() {
            if let Some(name) = str_field(inner, "fileName") {
                out.body = name.to_string();
            }
        }
        return Some(out);
    }
    if let Some(inner) = msg.content.get("locationMessage") {
        let lat = inner.get("degreesLatitude").and_then(Value::as_f64)?;
        let lng = inner.get("degreesLongitude").and_then(Value::as_f64)?;
        return Some(base(MessageKind::Location, format!("{lat},{lng}")));
    }
    if let Some(inner) = msg.content.get("contactMessage") {
        let name = str_field(inner, "displayName").unwrap_or_default();
        let mut out = base(MessageKind::Contact, name.to_string());
        out.media_ref = str_field(inner, "vcard").map(str::to_string);
        return Some(out);
    }
    if let Some(inner) = msg.content.get("reactionMessage") {
        let emoji = str_field(inner, "text").unwrap_or_default();
        return Some(base(MessageKind::Reaction, emoji.to_string()));
    }

    if content.is_empty() {
        return None;
    }
    debug!(message_id = %msg.id, "unrecognized socket message type, treating as text");
    Some(base(MessageKind::Text, String::new()))
}

/// Normalize one entry from a cloud-api webhook `messages` array.
/// `profile_name` comes from the webhook's sibling `contacts` array.
pub fn normalize_cloud(message: &Value, profile_name: Option<&str>) -> Option<NormalizedMessage> {
    let id = str_field(message, "id")?.to_string();
    let from = str_field(message, "from")?.to_string();
    let timestamp = str_field(message, "timestamp")
        .and_then(|t| t.parse::<i64>().ok())
        .unwrap_or(0);
    let kind_tag = str_field(message, "type").unwrap_or("unknown");

    let mut out = NormalizedMessage {
        external_id: id,
        kind: MessageKind::Text,
        body: String::new(),
        caption: None,
        media_type: None,
        media_ref: None,
        timestamp,
        sender_phone: from.clone(),
        chat_id: from,
        sender_name: profile_name.map(str::to_string),
        from_me: false,
    };

    match kind_tag {
        "text" => {
            out.body = message
                .get("text")
                .and_then(|t| str_field(t, "body"))?
                .to_string();
        }
        "image" | "video" | "audio" | "sticker" | "document" => {
            out.kind = match kind_tag {
                "image" => MessageKind::Image,
                "video" => MessageKind::Video,
                "audio" => MessageKind::Audio,
                "sticker" => MessageKind::Sticker,
                _ => MessageKind::Document,
            };
            let inner = message.get(kind_tag)?;
            out.caption = str_field(inner, "caption").map(str::to_string);
            out.body = out.caption.clone().unwrap_or_default();
            out.media_type = str_field(inner, "mime_type").map(str::to_string);
            // Cloud media is referenced by provider id, fetched on demand.
            out.media_ref = str_field(inner, "id").map(str::to_string);
            if out.kind == MessageKind::Document && out.body.is_empty() {
                if let Some(name) = str_field(inner, "filename") {
                    out.body = name.to_string();
                }
            }
        }
        "location" => {
            out.kind = MessageKind::Location;
            let inner = message.get("location")?;
            let lat = inner.get("latitude").and_then(Value::as_f64)?;
            let lng = inner.get("longitude").and_then(Value::as_f64)?;
            out.body = format!("{lat},{lng}");
        }
        "contacts" => {
            out.kind = MessageKind::Contact;
            let first = message.get("contacts").and_then(|c| c.get(0))?;
            out.body = first
                .get("name")
                .and_then(|n| str_field(n, "formatted_name"))
                .unwrap_or_default()
                .to_string();
        }
        "interactive" => {
            out.kind = MessageKind::Interactive;
            let inner = message.get("interactive")?;
            out.body = inner
                .get("button_reply")
                .or_else(|| inner.get("list_reply"))
                .and_then(|r| str_field(r, "title"))
                .unwrap_or_default()
                .to_string();
        }
        "reaction" => {
            out.kind = MessageKind::Reaction;
            out.body = message
                .get("reaction")
                .and_then(|r| str_field(r, "emoji"))
                .unwrap_or_default()
                .to_string();
        }
        other => {
            debug!(kind = other, "unrecognized cloud message type, treating as text");
        }
    }
    Some(out)
}

/// Map a cloud webhook status string onto a delivery status.
pub fn cloud_status(status: &str) -> Option<DeliveryStatus> {
    match status {
        "sent" => Some(DeliveryStatus::Sent),
        "delivered" => Some(DeliveryStatus::Delivered),
        "read" => Some(DeliveryStatus::Read),
        "failed" => Some(DeliveryStatus::Failed),
        _ => None,
    }
}
