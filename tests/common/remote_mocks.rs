//! An in-memory [`RemoteStore`] that records every call.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use tokio::sync::Semaphore;

use tgfs::remote::{MessageId, ObjectId, RemoteDocument, RemoteError, RemoteLink, RemoteStore};

/// Knobs tests flip to make the next calls fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct Failures {
    pub list: bool,
    pub download: bool,
    pub upload: bool,
    pub delete: bool,
}

#[derive(Debug)]
struct Stored {
    doc: RemoteDocument,
    content: Bytes,
}

#[derive(Debug, Default)]
struct MockRemoteState {
    documents: BTreeMap<MessageId, Stored>,
    next_message: i64,
    uploads: Vec<(String, Bytes)>,
    deletes: Vec<MessageId>,
    failures: Failures,
}

/// A channel kept in memory.
///
/// Message ids are handed out in increasing order starting at 100. When built with
/// [`MockRemote::gated`], every upload blocks until the test calls [`MockRemote::release_upload`].
#[derive(Debug)]
pub struct MockRemote {
    state: Mutex<MockRemoteState>,
    writable: bool,
    gate: Option<Semaphore>,
    uploads_started: AtomicUsize,
    downloads: AtomicUsize,
    lists: AtomicUsize,
}

fn unavailable(what: &str) -> RemoteError {
    RemoteError::unavailable(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        format!("{what} failed"),
    ))
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockRemoteState {
                next_message: 100,
                ..MockRemoteState::default()
            }),
            writable: true,
            gate: None,
            uploads_started: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        }
    }

    /// A channel the client may not post to.
    pub fn read_only() -> Self {
        Self {
            writable: false,
            ..Self::new()
        }
    }

    /// Uploads wait for [`Self::release_upload`].
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    /// Post a document as if someone else had sent it.
    pub fn seed(&self, name: &str, content: &[u8]) -> MessageId {
        let mut state = self.state.lock().unwrap();
        Self::store(&mut state, name, Bytes::copy_from_slice(content)).message_id
    }

    /// Delete a message as if someone else had removed it.
    pub fn remove_externally(&self, message: MessageId) {
        self.state.lock().unwrap().documents.remove(&message);
    }

    pub fn set_failures(&self, failures: Failures) {
        self.state.lock().unwrap().failures = failures;
    }

    /// Let one blocked upload finish.
    pub fn release_upload(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Yield until `count` uploads have started.
    pub async fn wait_uploads_started(&self, count: usize) {
        for _ in 0..10_000 {
            if self.uploads_started.load(Ordering::SeqCst) >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("upload {count} never started");
    }

    /// Every successful upload, in order.
    pub fn uploads(&self) -> Vec<(String, Bytes)> {
        self.state.lock().unwrap().uploads.clone()
    }

    /// Every delete request, successful or not, in order.
    pub fn deletes(&self) -> Vec<MessageId> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    /// Names of the documents currently in the channel, in message order.
    pub fn names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .documents
            .values()
            .map(|s| s.doc.name.clone())
            .collect()
    }

    /// Content of the newest document called `name`.
    pub fn content_of(&self, name: &str) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .documents
            .values()
            .rev()
            .find(|s| s.doc.name == name)
            .map(|s| s.content.clone())
    }

    pub fn contains(&self, message: MessageId) -> bool {
        self.state.lock().unwrap().documents.contains_key(&message)
    }

    fn store(state: &mut MockRemoteState, name: &str, content: Bytes) -> RemoteLink {
        let message_id = MessageId(state.next_message);
        state.next_message += 1;
        let link = RemoteLink {
            message_id,
            object_id: ObjectId(format!("obj-{}", message_id.0)),
        };
        state.documents.insert(
            message_id,
            Stored {
                doc: RemoteDocument {
                    link: link.clone(),
                    name: name.to_owned(),
                    size: content.len() as u64,
                    modified_at: SystemTime::now(),
                },
                content,
            },
        );
        link
    }
}

impl RemoteStore for MockRemote {
    async fn list_documents(&self) -> Result<Vec<RemoteDocument>, RemoteError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.failures.list {
            return Err(unavailable("listing"));
        }
        Ok(state.documents.values().map(|s| s.doc.clone()).collect())
    }

    async fn download(&self, object: &ObjectId) -> Result<Bytes, RemoteError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.failures.download {
            return Err(unavailable("download"));
        }
        state
            .documents
            .values()
            .find(|s| &s.doc.link.object_id == object)
            .map(|s| s.content.clone())
            .ok_or_else(|| RemoteError::Rejected {
                reason: format!("no object {object}"),
            })
    }

    async fn upload(&self, name: &str, content: Bytes) -> Result<RemoteLink, RemoteError> {
        self.uploads_started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let mut state = self.state.lock().unwrap();
        if state.failures.upload {
            return Err(unavailable("upload"));
        }
        state.uploads.push((name.to_owned(), content.clone()));
        Ok(Self::store(&mut state, name, content))
    }

    async fn delete(&self, message: MessageId) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push(message);
        if state.failures.delete {
            return Err(unavailable("delete"));
        }
        state.documents.remove(&message);
        Ok(())
    }

    async fn check_write_access(&self) -> bool {
        self.writable
    }
}
