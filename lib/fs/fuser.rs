//! FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`ChannelFs`].

use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};

use super::{ChannelFs, FileAttrs, FileKind, FsError, OpenFlags, Reconciler};
use crate::remote::RemoteStore;

/// Trait abstracting the `.error(errno)` method common to all fuser reply types.
trait FuseReply {
    fn error(self, errno: i32);
}

macro_rules! impl_fuse_reply {
    ($($ty:ty),* $(,)?) => {
        $(impl FuseReply for $ty {
            fn error(self, errno: i32) {
                // Calls the inherent fuser method (not this trait method).
                self.error(errno);
            }
        })*
    };
}

impl_fuse_reply!(
    fuser::ReplyEntry,
    fuser::ReplyAttr,
    fuser::ReplyDirectory,
    fuser::ReplyOpen,
    fuser::ReplyData,
    fuser::ReplyCreate,
    fuser::ReplyWrite,
    fuser::ReplyEmpty,
    fuser::ReplyIoctl,
);

/// Extension trait on `Result<T, FsError>` for FUSE reply handling.
///
/// Centralizes the error-logging + errno-reply path so each FUSE callback
/// only has to express its success path.
trait FuseResultExt<T> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R));
}

impl<T> FuseResultExt<T> for Result<T, FsError> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R)) {
        match self {
            Ok(val) => on_ok(val, reply),
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.errno());
            }
        }
    }
}

const BLOCK_SIZE: u32 = 4096;

/// FOPEN_* bits for open and create replies. The kernel keeps its default page-cache behavior.
const OPEN_REPLY_FLAGS: u32 = 0;

fn to_fuser_attr(attrs: &FileAttrs) -> fuser::FileAttr {
    fuser::FileAttr {
        ino: attrs.ino,
        size: attrs.size,
        blocks: attrs.size.div_ceil(512),
        atime: attrs.modified_at,
        mtime: attrs.modified_at,
        ctime: attrs.modified_at,
        crtime: attrs.modified_at,
        kind: match attrs.kind {
            FileKind::File => fuser::FileType::RegularFile,
            FileKind::Directory => fuser::FileType::Directory,
        },
        perm: attrs.perm,
        nlink: attrs.nlink,
        uid: attrs.uid,
        gid: attrs.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// Bridges a [`ChannelFs`] to the [`fuser::Filesystem`] trait.
///
/// Every callback blocks the FUSE session thread on the tokio runtime for the duration of the
/// operation. The adapter also owns the periodic reconciler so that unmounting stops it.
pub struct FuserAdapter<R: RemoteStore> {
    fs: ChannelFs<R>,
    reconciler: Option<Reconciler>,
    runtime: tokio::runtime::Handle,
}

impl<R: RemoteStore> FuserAdapter<R> {
    // Reconciliation can add or drop entries at any time, so the kernel must not trust its caches
    // for long.
    const TTL: Duration = Duration::from_secs(1);

    /// Create a new adapter over an already populated filesystem.
    pub fn new(
        fs: ChannelFs<R>,
        reconciler: Option<Reconciler>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            fs,
            reconciler,
            runtime,
        }
    }
}

impl<R: RemoteStore> fuser::Filesystem for FuserAdapter<R> {
    fn init(
        &mut self,
        _req: &fuser::Request<'_>,
        config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        // Truncating opens must reach `open` with O_TRUNC instead of a separate setattr.
        if let Err(unsupported) = config.add_capabilities(fuser::consts::FUSE_ATOMIC_O_TRUNC) {
            warn!(unsupported, "kernel does not support atomic O_TRUNC");
        }
        Ok(())
    }

    fn destroy(&mut self) {
        if let Some(reconciler) = self.reconciler.take() {
            self.runtime.block_on(reconciler.stop());
        }
        debug!("filesystem destroyed");
    }

    #[instrument(name = "FuserAdapter::lookup", skip(self, _req, reply))]
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        self.fs.lookup(parent, name).fuse_reply(reply, |attrs, reply| {
            reply.entry(&Self::TTL, &to_fuser_attr(&attrs), 0);
        });
    }

    #[instrument(name = "FuserAdapter::getattr", skip(self, _req, _fh, reply))]
    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        self.fs.getattr(ino).fuse_reply(reply, |attrs, reply| {
            reply.attr(&Self::TTL, &to_fuser_attr(&attrs));
        });
    }

    #[instrument(
        name = "FuserAdapter::setattr",
        skip(
            self, _req, _mode, _uid, _gid, _atime, _mtime, _ctime, _fh, _crtime, _chgtime,
            _bkuptime, _flags, reply
        )
    )]
    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        let result = match size {
            Some(size) => self.runtime.block_on(self.fs.set_len(ino, size)),
            // Timestamps and modes come from the remote store; accept and ignore.
            None => self.fs.getattr(ino),
        };
        result.fuse_reply(reply, |attrs, reply| {
            reply.attr(&Self::TTL, &to_fuser_attr(&attrs));
        });
    }

    fn opendir(&mut self, _req: &fuser::Request<'_>, ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        self.fs.opendir(ino).fuse_reply(reply, |(), reply| {
            reply.opened(0, 0);
        });
    }

    #[instrument(name = "FuserAdapter::readdir", skip(self, _req, _fh, reply))]
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let entries = match self.fs.readdir(ino, offset.cast_unsigned()) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.errno());
                return;
            }
        };

        for entry in &entries {
            let Ok(next) = i64::try_from(entry.next_offset) else {
                error!(next_offset = entry.next_offset, "directory cursor too large for fuser");
                reply.error(libc::EIO);
                return;
            };
            let kind = to_fuser_attr(&entry.attrs).kind;
            if reply.add(entry.attrs.ino, next, kind, &entry.name) {
                debug!("buffer full for now, stopping readdir");
                break;
            }
        }
        reply.ok();
    }

    #[instrument(name = "FuserAdapter::create", skip(self, _req, _mode, _umask, _flags, reply))]
    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        self.fs
            .create(parent, name)
            .fuse_reply(reply, |(fh, attrs), reply| {
                debug!(fh, ino = attrs.ino, "replying...");
                reply.created(&Self::TTL, &to_fuser_attr(&attrs), 0, fh, OPEN_REPLY_FLAGS);
            });
    }

    #[instrument(name = "FuserAdapter::open", skip(self, _req, reply))]
    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        let flags = OpenFlags::from_bits_retain(flags);
        self.runtime
            .block_on(self.fs.open(ino, flags))
            .fuse_reply(reply, |fh, reply| {
                debug!(handle = fh, "replying...");
                reply.opened(fh, OPEN_REPLY_FLAGS);
            });
    }

    #[instrument(
        name = "FuserAdapter::read",
        skip(self, _req, _ino, _flags, _lock_owner, reply)
    )]
    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        self.fs
            .read(fh, offset.cast_unsigned(), size)
            .fuse_reply(reply, |data, reply| {
                debug!(read_bytes = data.len(), "replying...");
                reply.data(&data);
            });
    }

    #[instrument(
        name = "FuserAdapter::write",
        skip(self, _req, _ino, data, _write_flags, _flags, _lock_owner, reply),
        fields(len = data.len())
    )]
    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        self.fs
            .write(fh, offset.cast_unsigned(), data)
            .fuse_reply(reply, |written, reply| reply.written(written));
    }

    #[instrument(
        name = "FuserAdapter::release",
        skip(self, _req, _ino, _flags, _lock_owner, _flush, reply)
    )]
    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        self.runtime
            .block_on(self.fs.release(fh))
            .fuse_reply(reply, |(), reply| reply.ok());
    }

    #[instrument(name = "FuserAdapter::unlink", skip(self, _req, reply))]
    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        self.runtime
            .block_on(self.fs.unlink(parent, name))
            .fuse_reply(reply, |(), reply| reply.ok());
    }

    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        reply.error(FsError::NotADirectory.errno());
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        reply.error(FsError::NotADirectory.errno());
    }

    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        reply.error(FsError::Unsupported.errno());
    }

    fn link(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        reply.error(FsError::Unsupported.errno());
    }

    fn symlink(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _link_name: &OsStr,
        _target: &Path,
        reply: fuser::ReplyEntry,
    ) {
        reply.error(FsError::Unsupported.errno());
    }

    fn mknod(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        reply.error(FsError::Unsupported.errno());
    }

    fn flush(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: fuser::ReplyEmpty,
    ) {
        reply.ok();
    }

    fn fsync(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _datasync: bool,
        reply: fuser::ReplyEmpty,
    ) {
        // Uploads happen on the last release, not on sync.
        reply.ok();
    }

    fn fsyncdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _datasync: bool,
        reply: fuser::ReplyEmpty,
    ) {
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: fuser::ReplyEmpty,
    ) {
        reply.ok();
    }

    fn forget(&mut self, _req: &fuser::Request<'_>, _ino: u64, _nlookup: u64) {}

    fn ioctl(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: u32,
        _cmd: u32,
        _in_data: &[u8],
        _out_size: u32,
        reply: fuser::ReplyIoctl,
    ) {
        reply.error(FsError::NotATty.errno());
    }

    fn copy_file_range(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino_in: u64,
        _fh_in: u64,
        _offset_in: i64,
        _ino_out: u64,
        _fh_out: u64,
        _offset_out: i64,
        _len: u64,
        _flags: u32,
        reply: fuser::ReplyWrite,
    ) {
        reply.error(FsError::OperationNotSupported.errno());
    }

    #[instrument(name = "FuserAdapter::statfs", skip(self, _req, _ino, reply))]
    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let stats = self.fs.statfs();
        debug!(?stats, "replying...");
        reply.statfs(
            stats.total_blocks,
            stats.free_blocks,
            stats.available_blocks,
            stats.total_inodes,
            stats.free_inodes,
            stats.block_size,
            stats.max_filename_length,
            stats.block_size,
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::fs::ROOT_INO;

    #[test]
    fn root_is_reported_as_directory() {
        let attrs = FileAttrs {
            ino: ROOT_INO,
            kind: FileKind::Directory,
            size: 0,
            perm: 0o755,
            nlink: 2,
            uid: 1000,
            gid: 1000,
            modified_at: SystemTime::UNIX_EPOCH,
        };
        let fattr = to_fuser_attr(&attrs);
        assert_eq!(fattr.kind, fuser::FileType::Directory);
        assert_eq!(fattr.perm, 0o755);
        assert_eq!(fattr.nlink, 2);
    }

    #[test]
    fn timestamps_all_come_from_modified_at() {
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let attrs = FileAttrs {
            ino: 7,
            kind: FileKind::File,
            size: 1025,
            perm: 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            modified_at: at,
        };
        let fattr = to_fuser_attr(&attrs);
        assert_eq!(fattr.atime, at);
        assert_eq!(fattr.mtime, at);
        assert_eq!(fattr.ctime, at);
        assert_eq!(fattr.blocks, 3);
        assert_eq!(fattr.kind, fuser::FileType::RegularFile);
    }

    #[test]
    fn open_replies_leave_caching_to_the_kernel() {
        let caching = [fuser::consts::FOPEN_DIRECT_IO, fuser::consts::FOPEN_KEEP_CACHE];
        for bit in caching {
            assert_eq!(OPEN_REPLY_FLAGS & bit, 0);
        }
        // Caller flags such as O_WRONLY would otherwise land in these bits.
        assert!(caching.contains(&libc::O_WRONLY.cast_unsigned()));
    }
}
