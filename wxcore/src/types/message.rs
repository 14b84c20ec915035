use crate::types::contact::is_group_id;
use chrono::{DateTime, Utc};
use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;

pub const MSG_TYPE_TEXT: i32 = 1;
pub const MSG_TYPE_IMAGE: i32 = 3;
pub const MSG_TYPE_VOICE: i32 = 34;
pub const MSG_TYPE_VIDEO: i32 = 43;
pub const MSG_TYPE_EMOTICON: i32 = 47;
pub const MSG_TYPE_APP: i32 = 49;
pub const MSG_TYPE_STATUS_NOTIFY: i32 = 51;
pub const MSG_TYPE_MICRO_VIDEO: i32 = 62;
pub const MSG_TYPE_SYS: i32 = 10000;
pub const MSG_TYPE_RECALLED: i32 = 10002;

/// `AppMsgType` of an attachment inside an app message.
pub const APP_MSG_TYPE_ATTACHMENT: i32 = 6;

/// A message entry of `AddMsgList`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawMessage {
    pub msg_id: String,
    pub new_msg_id: u64,
    pub from_user_name: String,
    pub to_user_name: String,
    pub msg_type: i32,
    pub content: String,
    pub create_time: i64,
    pub app_msg_type: i32,
    pub status: i32,
    pub file_name: String,
    pub file_size: String,
    pub media_id: String,
    pub url: String,
    pub status_notify_code: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Video,
    File,
    SystemNotice,
    Unknown(i32),
}

impl MessageKind {
    pub fn from_codes(msg_type: i32, app_msg_type: i32) -> Self {
        match msg_type {
            MSG_TYPE_TEXT => Self::Text,
            MSG_TYPE_IMAGE | MSG_TYPE_EMOTICON => Self::Image,
            MSG_TYPE_VOICE => Self::Voice,
            MSG_TYPE_VIDEO | MSG_TYPE_MICRO_VIDEO => Self::Video,
            MSG_TYPE_APP if app_msg_type == APP_MSG_TYPE_ATTACHMENT => Self::File,
            MSG_TYPE_SYS | MSG_TYPE_RECALLED | MSG_TYPE_STATUS_NOTIFY => Self::SystemNotice,
            other => Self::Unknown(other),
        }
    }
}

/// A received message, classified and normalised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    pub from: String,
    pub to: String,
    /// Member who spoke, when the conversation is a group.
    pub group_sender: Option<String>,
    /// Text with HTML entities decoded, `<br/>` turned into newlines and the
    /// group sender prefix removed.
    pub content: String,
    pub raw: Arc<RawMessage>,
    /// Server sequence number (`NewMsgId`).
    pub seq: u64,
    /// Position of the message in the order this client received it.
    pub received: u64,
    pub create_time: Option<DateTime<Utc>>,
}

impl Message {
    /// The conversation this message belongs to, seen from the logged-in
    /// account: the sender, unless we sent it ourselves.
    pub fn chat(&self, self_user_name: &str) -> &str {
        if self.from == self_user_name {
            &self.to
        } else {
            &self.from
        }
    }

    pub fn is_group(&self) -> bool {
        is_group_id(&self.from) || is_group_id(&self.to)
    }

    pub fn text(&self) -> Option<&str> {
        (self.kind == MessageKind::Text).then_some(self.content.as_str())
    }
}

/// Turns a raw payload into a [`Message`]. Pure: the result depends only on
/// the arguments.
pub fn classify(raw: RawMessage, self_user_name: &str, received: u64) -> Message {
    let kind = MessageKind::from_codes(raw.msg_type, raw.app_msg_type);
    let peer = if raw.from_user_name == self_user_name {
        raw.to_user_name.as_str()
    } else {
        raw.from_user_name.as_str()
    };

    let (group_sender, body) = if is_group_id(peer) {
        match split_group_sender(&raw.content) {
            Some((sender, body)) => (Some(sender.to_string()), body),
            // Our own messages into a group carry no prefix.
            None if raw.from_user_name == self_user_name => {
                (Some(self_user_name.to_string()), raw.content.as_str())
            }
            None => (None, raw.content.as_str()),
        }
    } else {
        (None, raw.content.as_str())
    };

    Message {
        id: raw.msg_id.clone(),
        kind,
        from: raw.from_user_name.clone(),
        to: raw.to_user_name.clone(),
        group_sender,
        content: unescape_content(body),
        create_time: DateTime::from_timestamp(raw.create_time, 0),
        seq: raw.new_msg_id,
        received,
        raw: Arc::new(raw),
    }
}

/// Splits `@sender:<br/>body` into its parts.
fn split_group_sender(content: &str) -> Option<(&str, &str)> {
    if !content.starts_with('@') {
        return None;
    }
    let (sender, body) = content.split_once(":<br/>")?;
    if sender.len() < 2 || sender.contains(char::is_whitespace) {
        return None;
    }
    Some((sender, body))
}

/// Decodes entities after turning `<br/>` into newlines. `&nbsp;` is the one
/// HTML entity the web host emits beyond the XML set. Text with a malformed
/// entity is kept as it came.
fn unescape_content(content: &str) -> String {
    let text = content.replace("<br/>", "\n");
    let decoded = unescape_with(&text, |entity| match entity {
        "nbsp" => Some(" "),
        other => resolve_predefined_entity(other),
    })
    .map(Cow::into_owned);
    decoded.unwrap_or(text)
}
