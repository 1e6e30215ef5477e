#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use std::ffi::OsStr;

use tgfs::fs::{ChannelFs, FsError, FsOptions, OpenFlags, ROOT_INO};
use tgfs::remote::RemoteStore as _;

use common::remote_mocks::MockRemote;
use common::{ino_of, mount_with, options, read_all};

async fn read_only_mount() -> ChannelFs<MockRemote> {
    let remote = MockRemote::read_only();
    remote.seed("doc.pdf", b"%PDF-1.7");
    let read_only = !remote.check_write_access().await;
    assert!(read_only);
    mount_with(
        remote,
        FsOptions {
            read_only,
            ..options()
        },
    )
    .await
}

#[tokio::test]
async fn documents_are_readable_with_read_only_permissions() {
    let fs = read_only_mount().await;
    let ino = ino_of(&fs, "doc.pdf");

    assert_eq!(fs.getattr(ino).unwrap().perm, 0o444);
    assert_eq!(read_all(&fs, ino).await, b"%PDF-1.7");
}

#[tokio::test]
async fn every_mutation_is_refused_with_erofs() {
    let fs = read_only_mount().await;
    let ino = ino_of(&fs, "doc.pdf");

    let err = fs.create(ROOT_INO, OsStr::new("new")).unwrap_err();
    assert_eq!(err.errno(), libc::EROFS);
    assert!(matches!(
        fs.open(ino, OpenFlags::WRONLY).await,
        Err(FsError::ReadOnly)
    ));
    assert!(matches!(
        fs.open(ino, OpenFlags::RDWR).await,
        Err(FsError::ReadOnly)
    ));
    assert!(matches!(fs.set_len(ino, 0).await, Err(FsError::ReadOnly)));
    assert!(matches!(
        fs.unlink(ROOT_INO, OsStr::new("doc.pdf")).await,
        Err(FsError::ReadOnly)
    ));

    let fh = fs.open(ino, OpenFlags::RDONLY).await.unwrap();
    assert!(matches!(fs.write(fh, 0, b"x"), Err(FsError::ReadOnly)));
    fs.release(fh).await.unwrap();

    assert!(fs.remote().uploads().is_empty());
    assert!(fs.remote().deletes().is_empty());
    assert_eq!(fs.file_count(), 1);
}

#[tokio::test]
async fn truncate_flag_is_ignored_on_read_only_opens() {
    let fs = read_only_mount().await;
    let ino = ino_of(&fs, "doc.pdf");

    let fh = fs
        .open(ino, OpenFlags::RDONLY | OpenFlags::TRUNC)
        .await
        .unwrap();
    assert_eq!(fs.read(fh, 0, 64).unwrap(), b"%PDF-1.7");
    fs.release(fh).await.unwrap();
}

#[tokio::test]
async fn unknown_inode_is_not_found_before_read_only() {
    let fs = read_only_mount().await;
    assert!(matches!(
        fs.open(999, OpenFlags::WRONLY).await,
        Err(FsError::NotFound)
    ));
}

#[tokio::test]
async fn reconciliation_still_tracks_the_channel() {
    let fs = read_only_mount().await;
    fs.remote().seed("later.txt", b"x");

    let report = fs.reconcile().await.unwrap();

    assert_eq!(report.added, 1);
    assert_eq!(fs.file_count(), 2);
}
