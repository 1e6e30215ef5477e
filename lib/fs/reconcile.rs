//! Keeping the table in step with the remote container.
//!
//! The remote listing is the source of truth for which messages exist. Messages we know about but
//! the listing no longer reports are dropped (unless the file is open); messages the listing
//! reports that we do not know become new files. Messages present on both sides are never diffed
//! further: remote documents are immutable, so a change always shows up as a different id.

use std::ffi::OsStr;
use std::time::Duration;

use rustc_hash::FxHashSet;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::channel::ChannelFs;
use super::InodeAddr;
use crate::remote::{MessageId, RemoteDocument, RemoteError, RemoteStore};

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Files created for newly listed documents.
    pub added: usize,
    /// Files dropped because their message disappeared.
    pub removed: usize,
    /// Files whose message disappeared but which were kept because they are open.
    pub skipped_open: usize,
    /// The pass was abandoned because our own uploads or deletes raced with the listing.
    pub deferred: bool,
}

impl<R: RemoteStore> ChannelFs<R> {
    /// Fetch the remote listing once and apply the difference to the table.
    ///
    /// Only the listing call suspends; the diff is applied under a single lock acquisition.
    pub async fn reconcile(&self) -> Result<ReconcileReport, RemoteError> {
        let epoch = {
            let state = self.state();
            if state.remote_in_flight > 0 {
                debug!("remote mutation in flight, deferring reconciliation");
                return Ok(ReconcileReport {
                    deferred: true,
                    ..ReconcileReport::default()
                });
            }
            state.remote_epoch
        };

        let mut documents = self.shared.remote.list_documents().await?;
        documents.sort_by_key(|doc| doc.link.message_id);

        let mut state = self.state();
        if state.remote_epoch != epoch || state.remote_in_flight > 0 {
            debug!("remote changed under the listing, deferring reconciliation");
            return Ok(ReconcileReport {
                deferred: true,
                ..ReconcileReport::default()
            });
        }

        let listed: FxHashSet<MessageId> = documents.iter().map(|d| d.link.message_id).collect();
        let mut report = ReconcileReport::default();

        let vanished: Vec<(MessageId, InodeAddr)> = state
            .table
            .messages()
            .filter(|(msg, _)| !listed.contains(msg))
            .collect();
        for (msg_id, ino) in vanished {
            let Some(rec) = state.table.get(ino) else {
                continue;
            };
            if rec.retired().contains(&msg_id) {
                state.table.forget_message(msg_id);
                continue;
            }
            if rec.open_count > 0 || rec.dirty {
                debug!(ino, %msg_id, "message gone but file in use, keeping it");
                report.skipped_open += 1;
                continue;
            }
            if let Some(pending) = state.pending.remove(&ino) {
                pending.cancel();
            }
            if let Some(rec) = state.table.remove(ino) {
                info!(ino, %msg_id, name = ?rec.name(), "document removed remotely");
                report.removed += 1;
            }
        }

        for RemoteDocument {
            link,
            name,
            size,
            modified_at,
        } in documents
        {
            if state.table.resolve_remote(link.message_id).is_some() {
                continue;
            }
            let msg_id = link.message_id;
            let ino = state
                .table
                .allocate(OsStr::new(&name), Some(link), size, modified_at);
            info!(ino, %msg_id, name = %name, "new document");
            report.added += 1;
        }

        debug!(?report, files = state.table.len(), "reconciled");
        Ok(report)
    }

    /// Reconcile every `interval` until the returned handle is stopped.
    ///
    /// The first pass runs one full interval from now; the mount-time pass is the caller's job.
    #[must_use]
    pub fn spawn_reconciler(&self, interval: Duration) -> Reconciler {
        let (shutdown, mut stopped) = watch::channel(false);
        let fs = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = stopped.changed() => break,
                    result = fs.reconcile() => {
                        if let Err(e) = result {
                            warn!(error = %e, "listing failed, retrying next interval");
                        }
                    }
                }
            }
            debug!("reconciler stopped");
        });

        Reconciler { shutdown, task }
    }
}

/// Handle to the periodic reconciliation task.
#[derive(Debug)]
pub struct Reconciler {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Reconciler {
    /// Stop the loop, abandoning a pass that is waiting on the listing, and wait for it to exit.
    pub async fn stop(self) {
        // The receiver is gone only if the task already exited.
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "reconciler task ended abnormally");
        }
    }
}
