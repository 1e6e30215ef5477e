//! Write-back: what happens when the last reference to a file goes away.
//!
//! Files that already have a remote message are re-uploaded right away. Files that were never
//! uploaded wait for [`FsOptions::upload_delay`](super::FsOptions::upload_delay) so that a burst of
//! create/write/close cycles turns into a single upload. At most one delayed upload exists per
//! inode; scheduling another one aborts the previous task first.

use std::time::SystemTime;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::channel::ChannelFs;
use super::InodeAddr;
use crate::remote::{MessageId, RemoteError, RemoteLink, RemoteStore};

/// A scheduled upload in the pending registry.
pub(super) struct PendingUpload {
    generation: u64,
    task: JoinHandle<()>,
}

impl PendingUpload {
    /// Abort the task. Must be called with the entry already out of the registry.
    pub(super) fn cancel(self) {
        self.task.abort();
    }
}

/// What the last release of an inode has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    /// Nothing to persist.
    Idle,
    /// Never uploaded: wait, then upload.
    Debounce,
    /// Already backed by a message: replace it now.
    UploadNow,
}

/// What [`ChannelFs::flush`] does after committing an upload.
enum Commit {
    /// Committed, failed, or superseded with nobody left to re-upload.
    Done,
    /// Superseded while nobody holds the file open: upload the newer content.
    Again,
    /// The record was unlinked mid-upload; the fresh message has no owner.
    Orphaned(MessageId),
}

/// A snapshot taken under the lock, uploaded outside it.
struct Upload {
    name: String,
    content: Bytes,
    revision: u64,
    superseded: Vec<MessageId>,
}

impl<R: RemoteStore> ChannelFs<R> {
    /// Give back one reference on `ino` and, on the last one, run the write-back decision.
    pub(super) async fn drop_ref(&self, ino: InodeAddr) {
        let action = {
            let mut state = self.state();
            let opts = &self.shared.options;
            let Some(rec) = state.table.get_mut(ino) else {
                return;
            };
            rec.open_count = rec.open_count.saturating_sub(1);
            if rec.open_count > 0 {
                return;
            }

            if !rec.dirty {
                if !opts.cache_enabled && !rec.uploading {
                    rec.data = Vec::new();
                }
                Release::Idle
            } else if opts.read_only {
                if !opts.cache_enabled {
                    rec.data = Vec::new();
                    rec.dirty = false;
                }
                Release::Idle
            } else if rec.uploading {
                // The in-flight commit sees the newer revision and supersedes itself.
                Release::Idle
            } else if rec.link().is_none() {
                Release::Debounce
            } else {
                Release::UploadNow
            }
        };

        debug!(ino, ?action, "last reference released");
        match action {
            Release::Idle => {}
            Release::Debounce => self.schedule_upload(ino),
            Release::UploadNow => {
                self.cancel_pending(ino);
                self.flush(ino).await;
            }
        }
    }

    /// Schedule a delayed upload of `ino`, replacing any earlier one.
    pub(super) fn schedule_upload(&self, ino: InodeAddr) {
        let delay = self.shared.options.upload_delay;
        let mut state = self.state();
        if let Some(previous) = state.pending.remove(&ino) {
            debug!(ino, "rescheduling delayed upload");
            previous.cancel();
        }
        state.next_generation += 1;
        let generation = state.next_generation;

        let fs = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fs.run_delayed(ino, generation).await;
        });
        state.pending.insert(ino, PendingUpload { generation, task });
        debug!(ino, ?delay, "delayed upload scheduled");
    }

    fn cancel_pending(&self, ino: InodeAddr) {
        if let Some(pending) = self.state().pending.remove(&ino) {
            pending.cancel();
        }
    }

    async fn run_delayed(&self, ino: InodeAddr, generation: u64) {
        {
            let mut state = self.state();
            match state.pending.get(&ino) {
                Some(p) if p.generation == generation => {
                    state.pending.remove(&ino);
                }
                _ => return,
            }
            let Some(rec) = state.table.get(ino) else {
                return;
            };
            if !rec.dirty || rec.link().is_some() || rec.uploading {
                debug!(ino, "delayed upload no longer needed");
                return;
            }
        }
        self.flush(ino).await;
    }

    /// Run every scheduled upload now instead of waiting for its timer.
    pub async fn flush_pending(&self) {
        let inodes: Vec<InodeAddr> = {
            let mut state = self.state();
            state
                .pending
                .drain()
                .map(|(ino, pending)| {
                    pending.cancel();
                    ino
                })
                .collect()
        };
        if !inodes.is_empty() {
            info!(count = inodes.len(), "flushing scheduled uploads");
        }
        for ino in inodes {
            self.flush(ino).await;
        }
    }

    /// Persist the content of `ino`: delete superseded messages, upload, commit.
    ///
    /// Loops while the record was rewritten during an upload and nobody holds it open. Failures are
    /// logged and leave the record dirty without a link.
    #[instrument(name = "ChannelFs::flush", skip(self))]
    pub(super) async fn flush(&self, ino: InodeAddr) {
        loop {
            let Some(upload) = self.prepare_upload(ino) else {
                return;
            };

            for msg_id in &upload.superseded {
                self.delete_remote(*msg_id).await;
            }

            if upload.content.is_empty() {
                let mut state = self.state();
                state.remote_finished();
                let Some(rec) = state.table.get_mut(ino) else {
                    return;
                };
                rec.uploading = false;
                if rec.revision == upload.revision {
                    rec.dirty = false;
                    rec.size = 0;
                    debug!(ino, "empty content, nothing to upload");
                    return;
                }
                if rec.dirty && rec.open_count == 0 {
                    continue;
                }
                return;
            }

            let len = upload.content.len();
            let result = self.shared.remote.upload(&upload.name, upload.content).await;

            let outcome = self.commit_upload(ino, upload.revision, len, result);
            match outcome {
                Commit::Done => return,
                Commit::Again => {}
                Commit::Orphaned(msg_id) => {
                    debug!(ino, %msg_id, "unlinked during upload, deleting");
                    self.delete_remote(msg_id).await;
                    return;
                }
            }
        }
    }

    /// Record the result of an upload of `revision`. Runs entirely under the lock.
    fn commit_upload(
        &self,
        ino: InodeAddr,
        revision: u64,
        len: usize,
        result: Result<RemoteLink, RemoteError>,
    ) -> Commit {
        let mut state = self.state();
        state.remote_finished();
        let Some(rec) = state.table.get_mut(ino) else {
            return match result {
                Ok(link) => Commit::Orphaned(link.message_id),
                Err(_) => Commit::Done,
            };
        };
        rec.uploading = false;

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                error!(ino, error = %e, "upload failed");
                return Commit::Done;
            }
        };

        let current = rec.revision == revision;
        let msg_id = link.message_id;
        if current {
            rec.dirty = false;
            rec.size = len as u64;
            rec.modified_at = SystemTime::now();
            if rec.open_count == 0 && !self.shared.options.cache_enabled {
                rec.data = Vec::new();
            }
        }
        let again = !current && rec.dirty && rec.open_count == 0;
        state.table.set_link(ino, link);
        if current {
            info!(ino, %msg_id, bytes = len, "uploaded");
            return Commit::Done;
        }

        // Rewritten while uploading: what we just posted is already stale.
        state.table.retire_link(ino);
        debug!(ino, %msg_id, again, "upload superseded");
        if again { Commit::Again } else { Commit::Done }
    }

    fn prepare_upload(&self, ino: InodeAddr) -> Option<Upload> {
        let mut state = self.state();
        let rec = state.table.get_mut(ino)?;
        if !rec.dirty || rec.uploading {
            return None;
        }
        rec.uploading = true;
        let name = rec.name().to_string_lossy().into_owned();
        let content = Bytes::copy_from_slice(&rec.data);
        let revision = rec.revision;

        state.table.retire_link(ino);
        let superseded = state.table.retired_of(ino);
        state.remote_started();
        Some(Upload {
            name,
            content,
            revision,
            superseded,
        })
    }

    /// Best-effort delete of a message. Success also drops it from the retired index.
    pub(super) async fn delete_remote(&self, msg_id: MessageId) {
        self.state().remote_started();
        let result = self.shared.remote.delete(msg_id).await;

        let mut state = self.state();
        state.remote_finished();
        match result {
            Ok(()) => {
                state.table.forget_message(msg_id);
                debug!(%msg_id, "deleted remote message");
            }
            Err(e) => warn!(%msg_id, error = %e, "deleting remote message failed"),
        }
    }
}
