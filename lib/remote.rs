//! The remote document store the filesystem is backed by.
//!
//! The store is an append-mostly container of immutable, named binary documents. It has no update
//! primitive, so every content change becomes "delete the old message, upload a new one". The core
//! only talks to the store through [`RemoteStore`]; transport, authentication and listing strategy
//! are the implementation's business.

use std::fmt;
use std::future::Future;
use std::time::SystemTime;

use bytes::Bytes;

/// Identity of a message in the remote container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque handle needed to download the bytes of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId(pub String);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The remote message currently backing a file.
///
/// Both identifiers always travel together: a file is either backed by one specific message or it
/// is purely local.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteLink {
    /// The message holding the document.
    pub message_id: MessageId,
    /// The handle used to download the document.
    pub object_id: ObjectId,
}

/// One document as reported by [`RemoteStore::list_documents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocument {
    /// Where the document lives.
    pub link: RemoteLink,
    /// The file name the document was uploaded under.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// When the message was posted.
    pub modified_at: SystemTime,
}

/// Failure talking to the remote store.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The request never produced an answer (network, timeout, decoding).
    #[error("remote store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The store answered but refused the request.
    #[error("remote store rejected the request: {reason}")]
    Rejected {
        /// Human readable reason reported by the store.
        reason: String,
    },
}

impl RemoteError {
    /// Wrap any transport-level error.
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Box::new(err))
    }
}

/// Client for the remote container backing the filesystem.
///
/// Implementations must be callable concurrently from foreground operations, the reconciliation
/// loop and background uploads. All returned futures must be `Send` because they are driven from
/// spawned tasks.
pub trait RemoteStore: Send + Sync + 'static {
    /// Return a complete snapshot of every document currently in the container.
    fn list_documents(
        &self,
    ) -> impl Future<Output = Result<Vec<RemoteDocument>, RemoteError>> + Send;

    /// Fetch the full content of a document.
    fn download(&self, object: &ObjectId) -> impl Future<Output = Result<Bytes, RemoteError>> + Send;

    /// Post a new document under `name`.
    fn upload(
        &self,
        name: &str,
        content: Bytes,
    ) -> impl Future<Output = Result<RemoteLink, RemoteError>> + Send;

    /// Delete a message. Callers treat failure as non-fatal.
    fn delete(&self, message: MessageId) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Whether this client may post to the container. Consulted once at startup.
    fn check_write_access(&self) -> impl Future<Output = bool> + Send;
}
