//! A flat, single-directory filesystem over a [`RemoteStore`](crate::remote::RemoteStore).
/// The operation handler every kernel request ends up in.
pub mod channel;
/// Error taxonomy shared by every operation.
pub mod error;
/// FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`channel::ChannelFs`].
pub mod fuser;
/// Periodic diff-and-apply against the remote listing.
pub mod reconcile;
/// File records and the name / remote-id indices over them.
pub mod table;
/// Release-time upload decisions and debounced upload tasks.
pub mod writeback;

pub use channel::{ChannelFs, FsOptions};
pub use error::FsError;
pub use reconcile::{ReconcileReport, Reconciler};

use std::ffi::OsString;
use std::time::SystemTime;

use bitflags::bitflags;

/// Type representing an inode identifier.
pub type InodeAddr = u64;

/// Type representing a file handle.
pub type FileHandle = u64;

/// The single directory every file lives in.
pub const ROOT_INO: InodeAddr = 1;

/// Largest file the filesystem will hold. Matches the biggest document Telegram accepts.
pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

bitflags! {
    /// Flags for opening a file, similar to Unix open(2) flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: i32 {
        /// Open for reading only.
        const RDONLY = libc::O_RDONLY;
        /// Open for writing only.
        const WRONLY = libc::O_WRONLY;
        /// Open for reading and writing.
        const RDWR = libc::O_RDWR;

        /// Append on each write.
        const APPEND = libc::O_APPEND;
        /// Truncate to zero length.
        const TRUNC = libc::O_TRUNC;
        /// Create file if it does not exist.
        const CREAT = libc::O_CREAT;
        /// Error if file already exists (with `CREAT`).
        const EXCL = libc::O_EXCL;
    }
}

impl OpenFlags {
    /// Whether the access mode asks for write access (`O_WRONLY` or `O_RDWR`).
    #[must_use]
    pub fn wants_write(self) -> bool {
        let mode = self.bits() & libc::O_ACCMODE;
        mode == libc::O_WRONLY || mode == libc::O_RDWR
    }
}

/// The kind of an entry. Only the root is a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// A regular file backed by (at most) one remote message.
    File,
    /// The root directory.
    Directory,
}

/// Attributes reported to the kernel for an inode.
///
/// This filesystem does not distinguish access, modification and change times; all three are
/// `modified_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileAttrs {
    /// The inode address.
    pub ino: InodeAddr,
    /// File or directory.
    pub kind: FileKind,
    /// Size in bytes.
    pub size: u64,
    /// Permission bits.
    pub perm: u16,
    /// Link count.
    pub nlink: u32,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Timestamp used for atime, mtime and ctime.
    pub modified_at: SystemTime,
}

/// A directory entry yielded by [`ChannelFs::readdir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// The name of this entry within the root directory.
    pub name: OsString,
    /// The full attributes of this entry.
    pub attrs: FileAttrs,
    /// Cursor to pass back to resume listing right after this entry.
    pub next_offset: u64,
}

/// Filesystem statistics returned by [`ChannelFs::statfs`].
///
/// The remote store has no quota we could query, so these are fixed figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsStats {
    /// Filesystem block size (bytes).
    pub block_size: u32,
    /// Total number of data blocks.
    pub total_blocks: u64,
    /// Number of free blocks.
    pub free_blocks: u64,
    /// Number of blocks available to unprivileged users.
    pub available_blocks: u64,
    /// Total number of file nodes (inodes).
    pub total_inodes: u64,
    /// Number of free file nodes.
    pub free_inodes: u64,
    /// Maximum filename length (bytes).
    pub max_filename_length: u32,
}

impl FsStats {
    /// The figures every `statfs` call reports.
    pub const FIXED: Self = Self {
        block_size: 4096,
        total_blocks: 1_000_000,
        free_blocks: 500_000,
        available_blocks: 500_000,
        total_inodes: 10_000,
        free_inodes: 9_000,
        max_filename_length: 255,
    };
}
