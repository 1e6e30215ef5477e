#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use std::ffi::OsStr;
use std::time::Duration;

use tgfs::fs::{ChannelFs, FsError, OpenFlags, ROOT_INO};

use common::remote_mocks::{Failures, MockRemote};
use common::{create_file, ino_of, mount, options, read_all};

fn names(fs: &ChannelFs<MockRemote>) -> Vec<String> {
    fs.readdir(ROOT_INO, 0)
        .unwrap()
        .into_iter()
        .map(|e| e.name.into_string().unwrap())
        .collect()
}

#[tokio::test]
async fn first_pass_imports_every_document_in_message_order() {
    let remote = MockRemote::new();
    remote.seed("b.bin", b"bb");
    remote.seed("a.txt", b"a");
    let fs = ChannelFs::new(remote, options());

    let report = fs.reconcile().await.unwrap();

    assert_eq!(report.added, 2);
    assert!(!report.deferred);
    assert_eq!(names(&fs), ["b.bin", "a.txt"]);
    assert_eq!(fs.getattr(ino_of(&fs, "b.bin")).unwrap().size, 2);
}

#[tokio::test]
async fn duplicate_remote_names_are_suffixed() {
    let remote = MockRemote::new();
    for content in [b"1", b"2", b"3"] {
        remote.seed("a.txt", content);
    }
    let fs = mount(remote).await;

    assert_eq!(names(&fs), ["a.txt", "a.txt_2", "a.txt_3"]);
    assert_eq!(read_all(&fs, ino_of(&fs, "a.txt_3")).await, b"3");
}

#[tokio::test]
async fn new_documents_are_added_and_known_ones_left_alone() {
    let remote = MockRemote::new();
    remote.seed("old", b"x");
    let fs = mount(remote).await;
    let old = ino_of(&fs, "old");

    fs.remote().seed("new", b"y");
    let report = fs.reconcile().await.unwrap();

    assert_eq!((report.added, report.removed), (1, 0));
    assert_eq!(ino_of(&fs, "old"), old);
    assert_eq!(names(&fs), ["old", "new"]);
}

#[tokio::test]
async fn vanished_documents_are_removed() {
    let remote = MockRemote::new();
    let msg = remote.seed("gone", b"x");
    let fs = mount(remote).await;

    fs.remote().remove_externally(msg);
    let report = fs.reconcile().await.unwrap();

    assert_eq!(report.removed, 1);
    assert!(matches!(
        fs.lookup(ROOT_INO, OsStr::new("gone")),
        Err(FsError::NotFound)
    ));
}

#[tokio::test]
async fn open_files_survive_remote_removal() {
    let remote = MockRemote::new();
    let msg = remote.seed("held", b"still here");
    let fs = mount(remote).await;
    let ino = ino_of(&fs, "held");

    let fh = fs.open(ino, OpenFlags::RDONLY).await.unwrap();
    fs.remote().remove_externally(msg);

    let report = fs.reconcile().await.unwrap();
    assert_eq!((report.removed, report.skipped_open), (0, 1));
    assert_eq!(fs.read(fh, 0, 64).unwrap(), b"still here");

    fs.release(fh).await.unwrap();
    let report = fs.reconcile().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(fs.file_count(), 0);
}

#[tokio::test]
async fn failed_listing_changes_nothing() {
    let remote = MockRemote::new();
    remote.seed("a", b"x");
    let fs = mount(remote).await;

    fs.remote().set_failures(Failures {
        list: true,
        ..Failures::default()
    });
    fs.remote().seed("b", b"y");
    assert!(fs.reconcile().await.is_err());
    assert_eq!(names(&fs), ["a"]);
}

#[tokio::test]
async fn retired_messages_are_not_imported_again() {
    let remote = MockRemote::new();
    let msg = remote.seed("r.txt", b"abc");
    let fs = mount(remote).await;
    let ino = ino_of(&fs, "r.txt");

    // Truncated and closed without writing: the old message stays in the channel.
    let fh = fs
        .open(ino, OpenFlags::WRONLY | OpenFlags::TRUNC)
        .await
        .unwrap();
    fs.release(fh).await.unwrap();
    assert!(fs.remote().contains(msg));

    let report = fs.reconcile().await.unwrap();
    assert_eq!(report.added, 0);
    assert_eq!(names(&fs), ["r.txt"]);

    // Once the listing drops it, the file keeps living as a local one.
    fs.remote().remove_externally(msg);
    let report = fs.reconcile().await.unwrap();
    assert_eq!(report.removed, 0);
    assert_eq!(fs.getattr(ino).unwrap().size, 0);
}

#[tokio::test]
async fn pass_is_deferred_while_an_upload_is_in_flight() {
    let fs = mount(MockRemote::gated()).await;
    let ino = create_file(&fs, "a", b"data").await;

    let flusher = tokio::spawn({
        let fs = fs.clone();
        async move { fs.flush_pending().await }
    });
    fs.remote().wait_uploads_started(1).await;

    let report = fs.reconcile().await.unwrap();
    assert!(report.deferred);

    fs.remote().release_upload();
    flusher.await.unwrap();

    let report = fs.reconcile().await.unwrap();
    assert!(!report.deferred);
    assert_eq!((report.added, report.removed), (0, 0));
    assert_eq!(ino_of(&fs, "a"), ino);
    assert_eq!(fs.file_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconciler_runs_every_interval_until_stopped() {
    let fs = mount(MockRemote::new()).await;
    let reconciler = fs.spawn_reconciler(Duration::from_secs(10));

    fs.remote().seed("late", b"x");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fs.file_count(), 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(names(&fs), ["late"]);
    assert_eq!(fs.remote().lists(), 2);

    reconciler.stop().await;
    fs.remote().seed("later", b"y");
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fs.remote().lists(), 2);
    assert_eq!(fs.file_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconciler_keeps_going_after_a_failed_listing() {
    let fs = mount(MockRemote::new()).await;
    let reconciler = fs.spawn_reconciler(Duration::from_secs(10));

    fs.remote().set_failures(Failures {
        list: true,
        ..Failures::default()
    });
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(fs.remote().lists(), 2);

    fs.remote().set_failures(Failures::default());
    fs.remote().seed("back", b"x");
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(names(&fs), ["back"]);

    reconciler.stop().await;
}
