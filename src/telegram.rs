//! [`RemoteStore`] over a Telegram channel, through the Bot API.
//!
//! Bots cannot read channel history, so listing works from a journal: every channel post the bot
//! has been shown through `getUpdates`, plus everything it uploaded itself, minus everything it
//! deleted. Documents posted before the bot joined, or deleted by someone else, are invisible.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tg_bot::models::{ChatType, Message};
use tg_bot::{Bot, BotError, GetUpdatesParams};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use tgfs::remote::{
    MessageId, ObjectId, RemoteDocument, RemoteError, RemoteLink, RemoteStore,
};

/// Updates requested per `getUpdates` call; the Bot API maximum.
const UPDATE_BATCH: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("could not reach Telegram: {0}")]
    Bot(#[from] BotError),

    #[error("chat {chat_id} is a {kind:?}, expected a channel")]
    NotAChannel { chat_id: i64, kind: ChatType },
}

fn remote_error(err: BotError) -> RemoteError {
    match err {
        BotError::Api { description, .. } => RemoteError::Rejected {
            reason: description,
        },
        other => RemoteError::unavailable(other),
    }
}

#[derive(Debug, Default)]
struct Journal {
    next_update: Option<i64>,
    documents: BTreeMap<MessageId, RemoteDocument>,
}

impl Journal {
    fn record(&mut self, msg: &Message) {
        let id = MessageId(msg.message_id);
        match document_of(msg) {
            Some(doc) => {
                self.documents.insert(id, doc);
            }
            None => {
                // An edit can strip the attachment.
                self.documents.remove(&id);
            }
        }
    }
}

fn unix_time(secs: i64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(u64::try_from(secs).unwrap_or_default())
}

/// The file name a document is exposed under.
fn document_name(file_name: Option<&str>, file_id: &str) -> String {
    match file_name {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => format!("doc_{}", file_id.chars().take(10).collect::<String>()),
    }
}

fn document_of(msg: &Message) -> Option<RemoteDocument> {
    let doc = msg.document.as_ref()?;
    Some(RemoteDocument {
        link: RemoteLink {
            message_id: MessageId(msg.message_id),
            object_id: ObjectId(doc.file_id.clone()),
        },
        name: document_name(doc.file_name.as_deref(), &doc.file_id),
        size: doc.file_size.unwrap_or_default(),
        modified_at: unix_time(msg.edit_date.unwrap_or(msg.date)),
    })
}

/// A channel used as a flat document store.
#[derive(Debug)]
pub struct TelegramStore {
    bot: Bot,
    chat_id: i64,
    journal: Mutex<Journal>,
}

impl TelegramStore {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self {
            bot,
            chat_id,
            journal: Mutex::new(Journal::default()),
        }
    }

    /// Fail unless the bound chat exists, is visible to the bot, and is a channel.
    pub async fn verify_channel(&self) -> Result<(), TelegramError> {
        let me = self.bot.get_me().await?;
        debug!(bot = ?me.username, "authenticated");
        let chat = self.bot.get_chat(self.chat_id).await?;
        if chat.kind != ChatType::Channel {
            return Err(TelegramError::NotAChannel {
                chat_id: self.chat_id,
                kind: chat.kind,
            });
        }
        debug!(chat_id = self.chat_id, title = ?chat.title, "channel found");
        Ok(())
    }

    /// Drain pending updates into the journal.
    async fn poll(&self, journal: &mut Journal) -> Result<(), BotError> {
        loop {
            let params = GetUpdatesParams {
                offset: journal.next_update,
                limit: Some(UPDATE_BATCH),
                timeout: Some(0),
                allowed_updates: vec![
                    "channel_post".to_owned(),
                    "edited_channel_post".to_owned(),
                ],
            };
            let updates = self.bot.get_updates(&params).await?;
            let drained = updates.len() < UPDATE_BATCH as usize;
            for update in &updates {
                journal.next_update = Some(update.update_id + 1);
                if let Some(msg) = update.channel_message()
                    && msg.chat.id == self.chat_id
                {
                    journal.record(msg);
                }
            }
            if drained {
                return Ok(());
            }
        }
    }
}

impl RemoteStore for TelegramStore {
    #[instrument(name = "TelegramStore::list_documents", skip(self))]
    async fn list_documents(&self) -> Result<Vec<RemoteDocument>, RemoteError> {
        let mut journal = self.journal.lock().await;
        self.poll(&mut journal).await.map_err(remote_error)?;
        Ok(journal.documents.values().cloned().collect())
    }

    #[instrument(name = "TelegramStore::download", skip(self))]
    async fn download(&self, object: &ObjectId) -> Result<Bytes, RemoteError> {
        let file = self.bot.get_file(&object.0).await.map_err(remote_error)?;
        self.bot.download_file(&file).await.map_err(remote_error)
    }

    #[instrument(name = "TelegramStore::upload", skip(self, content), fields(len = content.len()))]
    async fn upload(&self, name: &str, content: Bytes) -> Result<RemoteLink, RemoteError> {
        let msg = self
            .bot
            .send_document(self.chat_id, name, content)
            .await
            .map_err(remote_error)?;
        let doc = document_of(&msg).ok_or_else(|| RemoteError::Rejected {
            reason: "sent message carries no document".to_owned(),
        })?;
        let link = doc.link.clone();
        self.journal.lock().await.documents.insert(link.message_id, doc);
        Ok(link)
    }

    #[instrument(name = "TelegramStore::delete", skip(self))]
    async fn delete(&self, message: MessageId) -> Result<(), RemoteError> {
        match self.bot.delete_message(self.chat_id, message.0).await {
            Ok(()) => {}
            Err(BotError::Api { description, .. })
                if description.contains("message to delete not found") =>
            {
                debug!(%message, "message already gone");
            }
            Err(e) => return Err(remote_error(e)),
        }
        self.journal.lock().await.documents.remove(&message);
        Ok(())
    }

    async fn check_write_access(&self) -> bool {
        let probe = match self.bot.send_message(self.chat_id, "tgfs write check").await {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "cannot post to channel");
                return false;
            }
        };
        if let Err(e) = self.bot.delete_message(self.chat_id, probe.message_id).await {
            warn!(error = %e, message_id = probe.message_id, "could not remove write probe");
        }
        true
    }
}
