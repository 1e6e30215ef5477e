//! The Bot API client.

use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::BotError;
use crate::models::{ApiResponse, Chat, File, Message, Update, User};

/// Public Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Parameters for [`Bot::get_updates`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct GetUpdatesParams {
    /// First update to return; acknowledges everything before it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Maximum number of updates, 1-100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Long-polling timeout in seconds. Zero means short polling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    /// Update kinds to receive.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_updates: Vec<String>,
}

/// A bot, identified by its token.
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Clone)]
pub struct Bot {
    http: reqwest::Client,
    token: SecretString,
    api_base: String,
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ChatParams {
    chat_id: i64,
}

#[derive(Serialize)]
struct SendMessageParams<'a> {
    chat_id: i64,
    text: &'a str,
    disable_notification: bool,
}

#[derive(Serialize)]
struct DeleteMessageParams {
    chat_id: i64,
    message_id: i64,
}

#[derive(Serialize)]
struct GetFileParams<'a> {
    file_id: &'a str,
}

impl Bot {
    /// Client for the public Bot API with a default request timeout.
    pub fn new(token: SecretString) -> Result<Self, BotError> {
        Self::with_api_base(token, DEFAULT_API_BASE, Duration::from_secs(60))
    }

    /// Client for a self-hosted Bot API server.
    pub fn with_api_base(
        token: SecretString,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BotError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let mut api_base = api_base.into();
        while api_base.ends_with('/') {
            api_base.pop();
        }
        Ok(Self {
            http,
            token,
            api_base,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.token.expose_secret()
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{file_path}",
            self.api_base,
            self.token.expose_secret()
        )
    }

    // Request URLs carry the token, so every transport error is stripped of its URL.
    async fn call<P, T>(&self, method: &str, params: &P) -> Result<T, BotError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.method_url(method))
            .json(params)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let body = response.bytes().await.map_err(reqwest::Error::without_url)?;
        decode(&body)
    }

    /// `getMe`: the bot's own account.
    pub async fn get_me(&self) -> Result<User, BotError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// `getChat`: information about a chat the bot can see.
    pub async fn get_chat(&self, chat_id: i64) -> Result<Chat, BotError> {
        self.call("getChat", &ChatParams { chat_id }).await
    }

    /// `sendMessage` without notification.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message, BotError> {
        self.call(
            "sendMessage",
            &SendMessageParams {
                chat_id,
                text,
                disable_notification: true,
            },
        )
        .await
    }

    /// `deleteMessage`.
    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), BotError> {
        let deleted: bool = self
            .call(
                "deleteMessage",
                &DeleteMessageParams {
                    chat_id,
                    message_id,
                },
            )
            .await?;
        if deleted {
            Ok(())
        } else {
            Err(BotError::Api {
                code: 0,
                description: format!("message {message_id} was not deleted"),
                retry_after: None,
            })
        }
    }

    /// `sendDocument`: upload `content` as a file called `file_name`.
    pub async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        content: Bytes,
    ) -> Result<Message, BotError> {
        let len = content.len() as u64;
        let part = Part::stream_with_length(content, len).file_name(file_name.to_owned());
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("disable_notification", "true")
            .part("document", part);
        let response = self
            .http
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let body = response.bytes().await.map_err(reqwest::Error::without_url)?;
        decode(&body)
    }

    /// `getFile`: resolve a file id to a downloadable path.
    pub async fn get_file(&self, file_id: &str) -> Result<File, BotError> {
        self.call("getFile", &GetFileParams { file_id }).await
    }

    /// Download the bytes of a file previously resolved with [`Self::get_file`].
    pub async fn download_file(&self, file: &File) -> Result<Bytes, BotError> {
        let path = file.file_path.as_deref().ok_or_else(|| BotError::NoFilePath {
            file_id: file.file_id.clone(),
        })?;
        let response = self
            .http
            .get(self.file_url(path))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(reqwest::Error::without_url)?;
        Ok(response.bytes().await.map_err(reqwest::Error::without_url)?)
    }

    /// `getUpdates`: poll for updates.
    pub async fn get_updates(&self, params: &GetUpdatesParams) -> Result<Vec<Update>, BotError> {
        self.call("getUpdates", params).await
    }
}

/// Decode a Bot API response body.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, BotError> {
    serde_json::from_slice::<ApiResponse<T>>(body)?.into_result()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn bot(base: &str) -> Bot {
        Bot::with_api_base(
            SecretString::from("123:abc"),
            base,
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn urls_embed_the_token() {
        let bot = bot("https://example.test/");
        assert_eq!(
            bot.method_url("getMe"),
            "https://example.test/bot123:abc/getMe"
        );
        assert_eq!(
            bot.file_url("documents/file_1.txt"),
            "https://example.test/file/bot123:abc/documents/file_1.txt"
        );
    }

    #[test]
    fn debug_does_not_leak_the_token() {
        let rendered = format!("{:?}", bot(DEFAULT_API_BASE));
        assert!(!rendered.contains("123:abc"));
    }

    #[test]
    fn update_params_skip_unset_fields() {
        let params = GetUpdatesParams {
            offset: Some(5),
            ..GetUpdatesParams::default()
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json, serde_json::json!({ "offset": 5 }));
    }

    #[test]
    fn decode_surfaces_api_errors() {
        let err = decode::<bool>(br#"{"ok":false,"error_code":400,"description":"Bad Request"}"#)
            .unwrap_err();
        assert!(err.is_api());
    }
}
