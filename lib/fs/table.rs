//! The file record table and the two indices layered over it.
//!
//! Every mutation that can touch an index goes through [`FileTable`], so a record can never exist
//! without exactly one name entry, and a message id can only ever point at the record that owns it.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::time::SystemTime;

use rustc_hash::FxHashMap;

use super::{FileAttrs, FileKind, FsError, InodeAddr, MAX_FILE_SIZE, ROOT_INO};
use crate::remote::{MessageId, RemoteLink};

/// One known file.
#[derive(Debug)]
pub struct FileRecord {
    name: OsString,
    link: Option<RemoteLink>,
    retired: Vec<MessageId>,

    /// Byte length. Tracks `data.len()` whenever the content is resident.
    pub size: u64,
    /// Used for atime, mtime and ctime.
    pub modified_at: SystemTime,
    /// Content buffer. Empty until hydrated.
    pub data: Vec<u8>,
    /// `data` diverges from what the remote store holds.
    pub dirty: bool,
    /// Number of live references: open handles plus transient pins.
    pub open_count: u32,
    /// Bumped on every content mutation, so a commit can tell whether what it uploaded is still
    /// current.
    pub revision: u64,
    /// An upload for this record is between snapshot and commit.
    pub uploading: bool,
}

impl FileRecord {
    /// The directory-entry name.
    #[must_use]
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    /// The remote message currently backing this file, if any.
    #[must_use]
    pub fn link(&self) -> Option<&RemoteLink> {
        self.link.as_ref()
    }

    /// Superseded messages awaiting deletion.
    #[must_use]
    pub fn retired(&self) -> &[MessageId] {
        &self.retired
    }

    /// Whether the content has to be fetched before it can be served.
    #[must_use]
    pub fn needs_hydration(&self) -> bool {
        self.data.is_empty() && !self.dirty && self.link.is_some() && self.size > 0
    }

    /// Resize the content buffer, zero-filling when growing, and mark the record dirty.
    pub fn set_len(&mut self, len: u64) -> Result<(), FsError> {
        let len = Self::checked_len(len)?;
        if len > self.data.len() {
            self.grow_to(len)?;
        } else {
            self.data.truncate(len);
        }
        self.touch();
        Ok(())
    }

    /// Write `bytes` at `offset`, zero-filling any gap past the current end.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), FsError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let end = offset
            .checked_add(bytes.len() as u64)
            .ok_or(FsError::FileTooLarge)?;
        let end = Self::checked_len(end)?;
        let start = end - bytes.len();
        if self.data.len() < end {
            self.grow_to(end)?;
        }
        self.data[start..end].copy_from_slice(bytes);
        self.touch();
        Ok(())
    }

    fn checked_len(len: u64) -> Result<usize, FsError> {
        if len > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge);
        }
        usize::try_from(len).map_err(|_| FsError::FileTooLarge)
    }

    /// Zero-extend to `len` bytes. Allocation failure leaves the buffer untouched.
    fn grow_to(&mut self, len: usize) -> Result<(), FsError> {
        self.data
            .try_reserve_exact(len - self.data.len())
            .map_err(|_| FsError::FileTooLarge)?;
        self.data.resize(len, 0);
        Ok(())
    }

    /// Bytes in `[offset, offset + len)`, clamped to the buffer.
    #[must_use]
    pub fn read_at(&self, offset: usize, len: usize) -> &[u8] {
        let start = offset.min(self.data.len());
        let end = offset.saturating_add(len).min(self.data.len());
        &self.data[start..end]
    }

    fn touch(&mut self) {
        self.size = self.data.len() as u64;
        self.modified_at = SystemTime::now();
        self.dirty = true;
        self.revision += 1;
    }

    /// Attributes as seen by the kernel.
    #[must_use]
    pub fn attrs(&self, ino: InodeAddr, read_only: bool, uid: u32, gid: u32) -> FileAttrs {
        FileAttrs {
            ino,
            kind: FileKind::File,
            size: self.size,
            perm: if read_only { 0o444 } else { 0o644 },
            nlink: 1,
            uid,
            gid,
            modified_at: self.modified_at,
        }
    }
}

/// File records keyed by inode, plus the name and message-id indices.
///
/// Records are kept ordered by inode so directory listings are stable and resumable.
#[derive(Debug)]
pub struct FileTable {
    records: BTreeMap<InodeAddr, FileRecord>,
    by_name: FxHashMap<OsString, InodeAddr>,
    by_message: FxHashMap<MessageId, InodeAddr>,
    next_ino: InodeAddr,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    /// An empty table. The first allocated inode is the one after the root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            by_name: FxHashMap::default(),
            by_message: FxHashMap::default(),
            next_ino: ROOT_INO + 1,
        }
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `name` if it is free, else the first free `name_2`, `name_3`, ...
    #[must_use]
    pub fn unique_name(&self, name: &OsStr) -> OsString {
        if !self.by_name.contains_key(name) {
            return name.to_os_string();
        }
        (2u64..)
            .map(|idx| {
                let mut candidate = name.to_os_string();
                candidate.push(format!("_{idx}"));
                candidate
            })
            .find(|candidate| !self.by_name.contains_key(candidate.as_os_str()))
            .unwrap_or_else(|| name.to_os_string())
    }

    /// Create a record under a conflict-free version of `name` and index it.
    pub fn allocate(
        &mut self,
        name: &OsStr,
        link: Option<RemoteLink>,
        size: u64,
        modified_at: SystemTime,
    ) -> InodeAddr {
        let ino = self.next_ino;
        self.next_ino += 1;

        let name = self.unique_name(name);
        self.by_name.insert(name.clone(), ino);
        if let Some(link) = &link {
            self.by_message.insert(link.message_id, ino);
        }
        self.records.insert(
            ino,
            FileRecord {
                name,
                link,
                retired: Vec::new(),
                size,
                modified_at,
                data: Vec::new(),
                dirty: false,
                open_count: 0,
                revision: 0,
                uploading: false,
            },
        );
        ino
    }

    /// Inode currently registered under `name`.
    #[must_use]
    pub fn resolve_name(&self, name: &OsStr) -> Option<InodeAddr> {
        self.by_name.get(name).copied()
    }

    /// Inode owning `message`, either as its current link or as a retired message.
    #[must_use]
    pub fn resolve_remote(&self, message: MessageId) -> Option<InodeAddr> {
        self.by_message.get(&message).copied()
    }

    /// Every indexed message id with its owning inode.
    pub fn messages(&self) -> impl Iterator<Item = (MessageId, InodeAddr)> + '_ {
        self.by_message.iter().map(|(&msg, &ino)| (msg, ino))
    }

    /// Look up a record.
    #[must_use]
    pub fn get(&self, ino: InodeAddr) -> Option<&FileRecord> {
        self.records.get(&ino)
    }

    /// Look up a record for mutation. Name and link can only change through the table.
    pub fn get_mut(&mut self, ino: InodeAddr) -> Option<&mut FileRecord> {
        self.records.get_mut(&ino)
    }

    /// Records with inode `>= start`, in ascending inode order.
    pub fn range_from(
        &self,
        start: InodeAddr,
    ) -> impl Iterator<Item = (InodeAddr, &FileRecord)> + '_ {
        self.records.range(start..).map(|(&ino, rec)| (ino, rec))
    }

    /// Drop a record and every index entry pointing at it.
    pub fn remove(&mut self, ino: InodeAddr) -> Option<FileRecord> {
        let record = self.records.remove(&ino)?;
        self.by_name.remove(&record.name);
        if let Some(link) = &record.link {
            self.by_message.remove(&link.message_id);
        }
        for msg in &record.retired {
            self.by_message.remove(msg);
        }
        Some(record)
    }

    /// Install a fresh link on `ino`. The previous link, if any, must have been retired.
    pub fn set_link(&mut self, ino: InodeAddr, link: RemoteLink) {
        let Some(record) = self.records.get_mut(&ino) else {
            return;
        };
        debug_assert!(record.link.is_none(), "overwriting a live link");
        self.by_message.insert(link.message_id, ino);
        record.link = Some(link);
    }

    /// Detach the current link, keeping its message id indexed as retired.
    ///
    /// Returns the retired message id, if there was a link.
    pub fn retire_link(&mut self, ino: InodeAddr) -> Option<MessageId> {
        let record = self.records.get_mut(&ino)?;
        let link = record.link.take()?;
        record.retired.push(link.message_id);
        Some(link.message_id)
    }

    /// Retired messages of `ino`. They stay indexed until [`Self::forget_message`].
    #[must_use]
    pub fn retired_of(&self, ino: InodeAddr) -> Vec<MessageId> {
        self.records
            .get(&ino)
            .map(|r| r.retired.clone())
            .unwrap_or_default()
    }

    /// Stop tracking a retired message id.
    ///
    /// Current links are left alone; they only go away with their record.
    pub fn forget_message(&mut self, message: MessageId) {
        let Some(&ino) = self.by_message.get(&message) else {
            return;
        };
        let Some(record) = self.records.get_mut(&ino) else {
            self.by_message.remove(&message);
            return;
        };
        if let Some(pos) = record.retired.iter().position(|m| *m == message) {
            record.retired.swap_remove(pos);
            self.by_message.remove(&message);
        }
    }
}
