#![allow(dead_code, missing_docs, clippy::unwrap_used)]

pub mod remote_mocks;

use std::ffi::OsStr;
use std::time::Duration;

use tgfs::fs::{ChannelFs, FsOptions, InodeAddr, OpenFlags, ROOT_INO};

use remote_mocks::MockRemote;

pub const UPLOAD_DELAY: Duration = Duration::from_secs(5);

pub fn options() -> FsOptions {
    FsOptions {
        read_only: false,
        cache_enabled: false,
        upload_delay: UPLOAD_DELAY,
        uid: 1000,
        gid: 1000,
    }
}

/// A writable filesystem over `remote`, populated by one reconciliation.
pub async fn mount(remote: MockRemote) -> ChannelFs<MockRemote> {
    mount_with(remote, options()).await
}

pub async fn mount_with(remote: MockRemote, options: FsOptions) -> ChannelFs<MockRemote> {
    let fs = ChannelFs::new(remote, options);
    fs.reconcile().await.unwrap();
    fs
}

pub fn ino_of(fs: &ChannelFs<MockRemote>, name: &str) -> InodeAddr {
    fs.lookup(ROOT_INO, OsStr::new(name)).unwrap().ino
}

/// Create `name`, write `content` and close it. Returns the new inode.
pub async fn create_file(fs: &ChannelFs<MockRemote>, name: &str, content: &[u8]) -> InodeAddr {
    let (fh, attrs) = fs.create(ROOT_INO, OsStr::new(name)).unwrap();
    fs.write(fh, 0, content).unwrap();
    fs.release(fh).await.unwrap();
    attrs.ino
}

/// Open `ino` for writing, replace its content and close it.
pub async fn rewrite(fs: &ChannelFs<MockRemote>, ino: InodeAddr, content: &[u8]) {
    let fh = fs
        .open(ino, OpenFlags::WRONLY | OpenFlags::TRUNC)
        .await
        .unwrap();
    fs.write(fh, 0, content).unwrap();
    fs.release(fh).await.unwrap();
}

/// Open `ino` read-only and return its whole content.
pub async fn read_all(fs: &ChannelFs<MockRemote>, ino: InodeAddr) -> Vec<u8> {
    let fh = fs.open(ino, OpenFlags::RDONLY).await.unwrap();
    let data = fs.read(fh, 0, u32::MAX).unwrap();
    fs.release(fh).await.unwrap();
    data
}

/// Let spawned tasks run to their next suspension point.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
