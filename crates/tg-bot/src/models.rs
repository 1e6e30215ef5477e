//! Bot API objects, restricted to the fields this crate uses.

use serde::Deserialize;

use crate::error::BotError;

/// The envelope every Bot API method answers with.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request succeeded.
    pub ok: bool,
    /// The payload, present when `ok` is true.
    pub result: Option<T>,
    /// Error code, present when `ok` is false.
    pub error_code: Option<i64>,
    /// Error description, present when `ok` is false.
    pub description: Option<String>,
    /// Extra error details.
    pub parameters: Option<ResponseParameters>,
}

impl<T> ApiResponse<T> {
    /// Turn the envelope into the payload or a [`BotError::Api`].
    pub fn into_result(self) -> Result<T, BotError> {
        if self.ok {
            return self.result.ok_or(BotError::MissingResult);
        }
        Err(BotError::Api {
            code: self.error_code.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            retry_after: self.parameters.and_then(|p| p.retry_after),
        })
    }
}

/// Details attached to some errors.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseParameters {
    /// Flood control: seconds to wait before retrying.
    pub retry_after: Option<u64>,
    /// The group was upgraded to a supergroup with this id.
    pub migrate_to_chat_id: Option<i64>,
}

/// A Telegram user or bot.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    /// Unique identifier.
    pub id: i64,
    /// Whether this user is a bot.
    pub is_bot: bool,
    /// First name (for bots, the display name).
    pub first_name: String,
    /// Username without the leading `@`.
    pub username: Option<String>,
}

/// Kind of chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    /// One-to-one chat.
    Private,
    /// Basic group.
    Group,
    /// Supergroup.
    Supergroup,
    /// Broadcast channel.
    Channel,
}

/// A chat, as embedded in messages and returned by `getChat`.
#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    /// Unique identifier.
    pub id: i64,
    /// Kind of chat.
    #[serde(rename = "type")]
    pub kind: ChatType,
    /// Title, for groups and channels.
    pub title: Option<String>,
    /// Username, if public.
    pub username: Option<String>,
}

/// A message. Only the parts needed for documents are decoded.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    /// Identifier unique within its chat.
    pub message_id: i64,
    /// Unix time the message was sent.
    pub date: i64,
    /// Unix time the message was last edited.
    pub edit_date: Option<i64>,
    /// The chat the message belongs to.
    pub chat: Chat,
    /// Text, for text messages.
    pub text: Option<String>,
    /// Attached general file.
    pub document: Option<Document>,
}

/// A general file attached to a message.
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    /// Identifier used to download or resend the file.
    pub file_id: String,
    /// Identifier stable across bots; cannot be used to download.
    pub file_unique_id: String,
    /// Original file name as set by the sender.
    pub file_name: Option<String>,
    /// MIME type as set by the sender.
    pub mime_type: Option<String>,
    /// Size in bytes.
    pub file_size: Option<u64>,
}

/// A file ready to be downloaded, as returned by `getFile`.
#[derive(Debug, Clone, Deserialize)]
pub struct File {
    /// Identifier used to download or resend the file.
    pub file_id: String,
    /// Identifier stable across bots.
    pub file_unique_id: String,
    /// Size in bytes.
    pub file_size: Option<u64>,
    /// Path to pass to the file endpoint.
    pub file_path: Option<String>,
}

/// An incoming update from `getUpdates`.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    /// Monotonic update identifier.
    pub update_id: i64,
    /// New message in a private chat or group.
    pub message: Option<Message>,
    /// New post in a channel.
    pub channel_post: Option<Message>,
    /// Edited post in a channel.
    pub edited_channel_post: Option<Message>,
}

impl Update {
    /// The channel post carried by this update, new or edited.
    #[must_use]
    pub fn channel_message(&self) -> Option<&Message> {
        self.channel_post
            .as_ref()
            .or(self.edited_channel_post.as_ref())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn decodes_successful_envelope() {
        let body = r#"{"ok":true,"result":{"id":42,"is_bot":true,"first_name":"store","username":"store_bot"}}"#;
        let resp: ApiResponse<User> = serde_json::from_str(body).unwrap();
        let user = resp.into_result().unwrap();
        assert_eq!(user.id, 42);
        assert!(user.is_bot);
        assert_eq!(user.username.as_deref(), Some("store_bot"));
    }

    #[test]
    fn error_envelope_becomes_api_error() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 7","parameters":{"retry_after":7}}"#;
        let resp: ApiResponse<bool> = serde_json::from_str(body).unwrap();
        match resp.into_result() {
            Err(BotError::Api {
                code,
                retry_after,
                ..
            }) => {
                assert_eq!(code, 429);
                assert_eq!(retry_after, Some(7));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ok_without_result_is_an_error() {
        let resp: ApiResponse<bool> = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert!(matches!(resp.into_result(), Err(BotError::MissingResult)));
    }

    #[test]
    fn decodes_channel_post_with_document() {
        let body = r#"{
            "update_id": 900,
            "channel_post": {
                "message_id": 17,
                "date": 1700000000,
                "chat": {"id": -1001234, "type": "channel", "title": "files"},
                "document": {
                    "file_id": "BQACAgIAAx0",
                    "file_unique_id": "AgAD",
                    "file_name": "notes.txt",
                    "mime_type": "text/plain",
                    "file_size": 12
                }
            }
        }"#;
        let update: Update = serde_json::from_str(body).unwrap();
        let msg = update.channel_message().unwrap();
        assert_eq!(msg.message_id, 17);
        assert_eq!(msg.chat.kind, ChatType::Channel);
        let doc = msg.document.as_ref().unwrap();
        assert_eq!(doc.file_name.as_deref(), Some("notes.txt"));
        assert_eq!(doc.file_size, Some(12));
    }

    #[test]
    fn edited_post_is_a_channel_message() {
        let body = r#"{
            "update_id": 901,
            "edited_channel_post": {
                "message_id": 3,
                "date": 1,
                "edit_date": 2,
                "chat": {"id": -1, "type": "channel"},
                "text": "hi"
            }
        }"#;
        let update: Update = serde_json::from_str(body).unwrap();
        let msg = update.channel_message().unwrap();
        assert_eq!(msg.edit_date, Some(2));
        assert!(msg.document.is_none());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let body = r#"{"id":-100,"type":"supergroup","title":"t","has_visible_history":true}"#;
        let chat: Chat = serde_json::from_str(body).unwrap();
        assert_eq!(chat.kind, ChatType::Supergroup);
    }
}
