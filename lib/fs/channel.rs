//! The operation handler behind every kernel request.

use std::ffi::OsStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use rustc_hash::FxHashMap;
use tracing::{debug, instrument, warn};

use super::table::FileTable;
use super::writeback::PendingUpload;
use super::{
    DirEntry, FileAttrs, FileHandle, FileKind, FsError, FsStats, InodeAddr, MAX_FILE_SIZE,
    OpenFlags, ROOT_INO,
};
use crate::remote::{RemoteLink, RemoteStore};

/// Mount-wide settings, fixed for the lifetime of a [`ChannelFs`].
#[derive(Debug, Clone)]
pub struct FsOptions {
    /// Reject every mutation. Decided once at startup from the remote's write access.
    pub read_only: bool,
    /// Keep content buffers resident after the last handle closes.
    pub cache_enabled: bool,
    /// How long a freshly created file waits before its first upload.
    pub upload_delay: Duration,
    /// Owner reported for every entry.
    pub uid: u32,
    /// Group reported for every entry.
    pub gid: u32,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            cache_enabled: false,
            upload_delay: Duration::from_secs(5),
            uid: 0,
            gid: 0,
        }
    }
}

/// Everything guarded by the single state lock.
pub(super) struct FsState {
    pub(super) table: FileTable,
    handles: FxHashMap<FileHandle, InodeAddr>,
    next_fh: FileHandle,
    pub(super) pending: FxHashMap<InodeAddr, PendingUpload>,
    pub(super) next_generation: u64,
    /// Bumped whenever a remote mutation starts or finishes.
    pub(super) remote_epoch: u64,
    /// Remote uploads and deletes currently between start and finish.
    pub(super) remote_in_flight: usize,
}

impl FsState {
    fn new() -> Self {
        Self {
            table: FileTable::new(),
            handles: FxHashMap::default(),
            next_fh: 1,
            pending: FxHashMap::default(),
            next_generation: 0,
            remote_epoch: 0,
            remote_in_flight: 0,
        }
    }

    fn allocate_fh(&mut self, ino: InodeAddr) -> FileHandle {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, ino);
        fh
    }

    fn handle(&self, fh: FileHandle) -> Result<InodeAddr, FsError> {
        self.handles.get(&fh).copied().ok_or(FsError::BadHandle)
    }

    pub(super) fn remote_started(&mut self) {
        self.remote_epoch += 1;
        self.remote_in_flight += 1;
    }

    pub(super) fn remote_finished(&mut self) {
        self.remote_epoch += 1;
        self.remote_in_flight = self.remote_in_flight.saturating_sub(1);
    }
}

pub(super) struct Shared<R> {
    pub(super) remote: R,
    pub(super) options: FsOptions,
    state: Mutex<FsState>,
}

/// A flat filesystem whose files are documents in a remote container.
///
/// Cloning is cheap; every clone operates on the same table.
pub struct ChannelFs<R: RemoteStore> {
    pub(super) shared: Arc<Shared<R>>,
}

impl<R: RemoteStore> Clone for ChannelFs<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: RemoteStore> ChannelFs<R> {
    /// An empty filesystem. Call [`Self::reconcile`] to populate it before mounting.
    pub fn new(remote: R, options: FsOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                remote,
                options,
                state: Mutex::new(FsState::new()),
            }),
        }
    }

    /// The mount-wide settings.
    #[must_use]
    pub fn options(&self) -> &FsOptions {
        &self.shared.options
    }

    /// The remote store backing this filesystem.
    #[must_use]
    pub fn remote(&self) -> &R {
        &self.shared.remote
    }

    pub(super) fn state(&self) -> MutexGuard<'_, FsState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of files currently known.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.state().table.len()
    }

    /// Whether `ino` currently holds its content in memory.
    #[must_use]
    pub fn is_resident(&self, ino: InodeAddr) -> bool {
        self.state()
            .table
            .get(ino)
            .is_some_and(|rec| !rec.data.is_empty())
    }

    /// Whether a debounced upload is scheduled for `ino`.
    #[must_use]
    pub fn has_pending_upload(&self, ino: InodeAddr) -> bool {
        self.state().pending.contains_key(&ino)
    }

    fn root_attrs(&self) -> FileAttrs {
        FileAttrs {
            ino: ROOT_INO,
            kind: FileKind::Directory,
            size: 0,
            perm: 0o755,
            nlink: 2,
            uid: self.shared.options.uid,
            gid: self.shared.options.gid,
            modified_at: SystemTime::now(),
        }
    }

    fn attrs_in(&self, state: &FsState, ino: InodeAddr) -> Result<FileAttrs, FsError> {
        let opts = &self.shared.options;
        state
            .table
            .get(ino)
            .map(|rec| rec.attrs(ino, opts.read_only, opts.uid, opts.gid))
            .ok_or(FsError::NotFound)
    }

    /// Resolve `name` inside `parent`.
    #[instrument(name = "ChannelFs::lookup", skip(self))]
    pub fn lookup(&self, parent: InodeAddr, name: &OsStr) -> Result<FileAttrs, FsError> {
        if parent != ROOT_INO {
            return Err(FsError::NotFound);
        }
        let state = self.state();
        let ino = state.table.resolve_name(name).ok_or(FsError::NotFound)?;
        self.attrs_in(&state, ino)
    }

    /// Attributes of `ino`.
    pub fn getattr(&self, ino: InodeAddr) -> Result<FileAttrs, FsError> {
        if ino == ROOT_INO {
            return Ok(self.root_attrs());
        }
        self.attrs_in(&self.state(), ino)
    }

    /// Only the root can be opened as a directory.
    pub fn opendir(&self, ino: InodeAddr) -> Result<(), FsError> {
        if ino == ROOT_INO {
            Ok(())
        } else {
            Err(FsError::NotADirectory)
        }
    }

    /// List the root starting at the first inode `>= offset`.
    ///
    /// Each entry carries the cursor that resumes right after it.
    pub fn readdir(&self, ino: InodeAddr, offset: u64) -> Result<Vec<DirEntry>, FsError> {
        self.opendir(ino)?;
        let opts = &self.shared.options;
        let state = self.state();
        Ok(state
            .table
            .range_from(offset)
            .map(|(ino, rec)| DirEntry {
                name: rec.name().to_os_string(),
                attrs: rec.attrs(ino, opts.read_only, opts.uid, opts.gid),
                next_offset: ino + 1,
            })
            .collect())
    }

    /// Create an empty local file and open it.
    ///
    /// If `name` is taken the new file gets a suffixed name instead.
    #[instrument(name = "ChannelFs::create", skip(self))]
    pub fn create(
        &self,
        parent: InodeAddr,
        name: &OsStr,
    ) -> Result<(FileHandle, FileAttrs), FsError> {
        if self.shared.options.read_only {
            return Err(FsError::ReadOnly);
        }
        if parent != ROOT_INO {
            return Err(FsError::PermissionDenied);
        }

        let mut state = self.state();
        let ino = state.table.allocate(name, None, 0, SystemTime::now());
        if let Some(rec) = state.table.get_mut(ino) {
            rec.open_count = 1;
        }
        let fh = state.allocate_fh(ino);
        let attrs = self.attrs_in(&state, ino)?;
        debug!(ino, fh, "created file");
        Ok((fh, attrs))
    }

    /// Open `ino`, hydrating its content if needed.
    #[instrument(name = "ChannelFs::open", skip(self))]
    pub async fn open(&self, ino: InodeAddr, flags: OpenFlags) -> Result<FileHandle, FsError> {
        let read_only = self.shared.options.read_only;
        {
            let mut state = self.state();
            let rec = state.table.get_mut(ino).ok_or(FsError::NotFound)?;
            if read_only && flags.wants_write() {
                return Err(FsError::ReadOnly);
            }
            if flags.contains(OpenFlags::TRUNC) && !read_only {
                rec.data.clear();
                rec.size = 0;
                rec.dirty = false;
                rec.revision += 1;
                rec.modified_at = SystemTime::now();
                if let Some(msg_id) = state.table.retire_link(ino) {
                    debug!(ino, %msg_id, "truncated, remote message retired");
                }
            }
        }

        self.pin_and_hydrate(ino).await?;

        let mut state = self.state();
        if state.table.get(ino).is_none() {
            return Err(FsError::NotFound);
        }
        Ok(state.allocate_fh(ino))
    }

    /// Take a reference on `ino` and make sure its content is resident.
    ///
    /// On failure the reference is given back.
    async fn pin_and_hydrate(&self, ino: InodeAddr) -> Result<(), FsError> {
        let link: Option<RemoteLink> = {
            let mut state = self.state();
            let rec = state.table.get_mut(ino).ok_or(FsError::NotFound)?;
            rec.open_count += 1;
            rec.needs_hydration().then(|| rec.link().cloned()).flatten()
        };
        let Some(link) = link else {
            return Ok(());
        };

        debug!(ino, object_id = %link.object_id, "hydrating");
        match self.shared.remote.download(&link.object_id).await {
            Ok(bytes) => {
                let mut state = self.state();
                if let Some(rec) = state.table.get_mut(ino)
                    && rec.data.is_empty()
                    && !rec.dirty
                    && rec.link() == Some(&link)
                {
                    rec.data = bytes.to_vec();
                    rec.size = rec.data.len() as u64;
                    debug!(ino, bytes = rec.size, "hydrated");
                }
                Ok(())
            }
            Err(e) => {
                warn!(ino, error = %e, "hydration failed");
                self.drop_ref(ino).await;
                Err(e.into())
            }
        }
    }

    /// Bytes of the file behind `fh` in `[offset, offset + size)`, clamped to its length.
    pub fn read(&self, fh: FileHandle, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        let state = self.state();
        let ino = state.handle(fh)?;
        let rec = state.table.get(ino).ok_or(FsError::NotFound)?;
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(rec.read_at(offset, size as usize).to_vec())
    }

    /// Overwrite bytes at `offset`, extending with zeros if it lies past the end.
    pub fn write(&self, fh: FileHandle, offset: u64, data: &[u8]) -> Result<u32, FsError> {
        if self.shared.options.read_only {
            return Err(FsError::ReadOnly);
        }
        let mut state = self.state();
        let ino = state.handle(fh)?;
        let rec = state.table.get_mut(ino).ok_or(FsError::NotFound)?;
        rec.write_at(offset, data)?;
        Ok(u32::try_from(data.len()).unwrap_or(u32::MAX))
    }

    /// Close `fh`. The last close of an inode decides whether and when to upload.
    #[instrument(name = "ChannelFs::release", skip(self))]
    pub async fn release(&self, fh: FileHandle) -> Result<(), FsError> {
        let ino = {
            let mut state = self.state();
            state.handles.remove(&fh).ok_or(FsError::BadHandle)?
        };
        self.drop_ref(ino).await;
        Ok(())
    }

    /// Truncate or extend `ino` to `size` bytes.
    #[instrument(name = "ChannelFs::set_len", skip(self))]
    pub async fn set_len(&self, ino: InodeAddr, size: u64) -> Result<FileAttrs, FsError> {
        if ino == ROOT_INO {
            return Ok(self.root_attrs());
        }
        if self.shared.options.read_only {
            return Err(FsError::ReadOnly);
        }
        if size > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge);
        }

        self.pin_and_hydrate(ino).await?;
        let attrs = {
            let mut state = self.state();
            let resized = state
                .table
                .get_mut(ino)
                .map_or(Ok(()), |rec| rec.set_len(size));
            resized.and_then(|()| self.attrs_in(&state, ino))
        };
        self.drop_ref(ino).await;
        attrs
    }

    /// Remove `name` locally, then delete its remote messages.
    ///
    /// Remote deletion is best-effort: the local record is gone either way.
    #[instrument(name = "ChannelFs::unlink", skip(self))]
    pub async fn unlink(&self, parent: InodeAddr, name: &OsStr) -> Result<(), FsError> {
        if self.shared.options.read_only {
            return Err(FsError::ReadOnly);
        }
        if parent != ROOT_INO {
            return Err(FsError::NotADirectory);
        }

        let messages = {
            let mut state = self.state();
            let ino = state.table.resolve_name(name).ok_or(FsError::NotFound)?;
            if let Some(pending) = state.pending.remove(&ino) {
                debug!(ino, "cancelling scheduled upload");
                pending.cancel();
            }
            let Some(rec) = state.table.remove(ino) else {
                return Err(FsError::NotFound);
            };
            let mut messages = rec.retired().to_vec();
            messages.extend(rec.link().map(|link| link.message_id));
            debug!(ino, ?messages, "unlinked");
            messages
        };

        for msg_id in messages {
            self.delete_remote(msg_id).await;
        }
        Ok(())
    }

    /// Fixed capacity figures.
    #[must_use]
    pub fn statfs(&self) -> FsStats {
        FsStats::FIXED
    }
}
