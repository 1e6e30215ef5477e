//! Error types for the Bot API client.

/// Errors returned by [`Bot`](crate::Bot) calls.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// The request never got a usable HTTP response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not the JSON we expected.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Telegram answered with `ok: false`.
    #[error("telegram error {code}: {description}")]
    Api {
        /// The `error_code` field.
        code: i64,
        /// The human readable `description` field.
        description: String,
        /// Seconds to wait before retrying, for flood-control errors.
        retry_after: Option<u64>,
    },

    /// Telegram answered `ok: true` without a `result`.
    #[error("response has no result")]
    MissingResult,

    /// A file has no download path (it is too big for the Bot API or already expired).
    #[error("file {file_id} has no download path")]
    NoFilePath {
        /// The file that could not be fetched.
        file_id: String,
    },
}

impl BotError {
    /// Whether this is Telegram refusing the request, as opposed to a transport failure.
    #[must_use]
    pub fn is_api(&self) -> bool {
        matches!(self, Self::Api { .. })
    }
}
