//! Behavioural coverage for folder replication over a scripted file
//! transfer, using real local directory trees.

use std::fs::{create_dir_all, write};

use camino::{Utf8Path, Utf8PathBuf};
use sysup::document::CopySpec;
use sysup::replicate::{self, ReplicateError};
use sysup::test_support::{FakeFileTransfer, FakeSession, FakeTransport, TransportEvent};
use sysup::transport::{
    ConnectTarget, FileTransfer, ShellSession, ShellTransport, TransportError,
};
use tempfile::TempDir;

struct Workspace {
    root: Utf8PathBuf,
    _tmp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let tmp = TempDir::new().expect("create workspace temp directory");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .expect("workspace path should be valid UTF-8");
        Self { root, _tmp: tmp }
    }

    fn add_file(&self, relative: &str, contents: &str) {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            create_dir_all(parent).expect("create parent directories");
        }
        write(&path, contents).expect("write fixture file");
    }
}

fn open_transfer(transport: &FakeTransport) -> (FakeSession, FakeFileTransfer) {
    let target = ConnectTarget {
        host: "203.0.113.1".parse().expect("valid address"),
        port: 22,
        username: String::from("ubuntu"),
        private_key: Utf8PathBuf::from("/keys/test.pem"),
    };
    let mut session = transport.connect(&target).expect("fake connect succeeds");
    let transfer = session.open_file_transfer().expect("fake transfer opens");
    (session, transfer)
}

fn spec(source: &Utf8Path, destination: &str, exclude: &[&str]) -> CopySpec {
    CopySpec {
        source: source.to_path_buf(),
        destination: Utf8PathBuf::from(destination),
        exclude: exclude.iter().map(|entry| (*entry).to_owned()).collect(),
    }
}

fn puts(events: &[TransportEvent]) -> Vec<Utf8PathBuf> {
    events
        .iter()
        .filter_map(|event| match event {
            TransportEvent::Put { remote, .. } => Some(remote.clone()),
            _ => None,
        })
        .collect()
}

fn mkdirs(events: &[TransportEvent]) -> Vec<Utf8PathBuf> {
    events
        .iter()
        .filter_map(|event| match event {
            TransportEvent::Mkdir { remote } => Some(remote.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn mirrors_files_to_destination_relative_paths() {
    let workspace = Workspace::new();
    workspace.add_file("a.pub", "key a");
    workspace.add_file("b.pub", "key b");

    let transport = FakeTransport::new();
    let (_session, mut transfer) = open_transfer(&transport);
    // The destination root usually exists already; the failed mkdir must be
    // swallowed.
    transport.push_mkdir_error(TransportError::Transfer {
        path: Utf8PathBuf::from("pubkeys"),
        message: String::from("directory exists"),
    });

    replicate::copy_folders(&mut transfer, &[spec(&workspace.root, "pubkeys", &[])])
        .expect("copy succeeds despite the mkdir failure");

    let events = transport.events();
    assert_eq!(
        puts(&events),
        vec![
            Utf8PathBuf::from("pubkeys/a.pub"),
            Utf8PathBuf::from("pubkeys/b.pub"),
        ]
    );
    assert_eq!(mkdirs(&events), vec![Utf8PathBuf::from("pubkeys")]);
}

#[test]
fn excluded_relative_paths_never_transfer() {
    let workspace = Workspace::new();
    workspace.add_file("keep.txt", "keep");
    workspace.add_file("secrets/token", "hidden");
    workspace.add_file("scratch.tmp", "scratch");

    let transport = FakeTransport::new();
    let (_session, mut transfer) = open_transfer(&transport);

    replicate::copy_folders(
        &mut transfer,
        &[spec(&workspace.root, "remote", &["secrets", "*.tmp"])],
    )
    .expect("copy succeeds");

    assert_eq!(
        puts(&transport.events()),
        vec![Utf8PathBuf::from("remote/keep.txt")]
    );
}

#[test]
fn missing_remote_directory_is_created_once_and_retried_once() {
    let workspace = Workspace::new();
    workspace.add_file("nested/deep.conf", "value");

    let transport = FakeTransport::new();
    let (_session, mut transfer) = open_transfer(&transport);
    transport.push_put_error(TransportError::Missing {
        path: Utf8PathBuf::from("remote/nested/deep.conf"),
    });

    replicate::copy_folders(&mut transfer, &[spec(&workspace.root, "remote", &[])])
        .expect("retry succeeds");

    let events = transport.events();
    assert_eq!(
        puts(&events),
        vec![
            Utf8PathBuf::from("remote/nested/deep.conf"),
            Utf8PathBuf::from("remote/nested/deep.conf"),
        ],
        "exactly one retry"
    );
    assert_eq!(
        mkdirs(&events),
        vec![
            Utf8PathBuf::from("remote"),
            Utf8PathBuf::from("remote/nested"),
        ],
        "the missing directory is created exactly once"
    );
}

#[test]
fn second_transfer_failure_is_fatal() {
    let workspace = Workspace::new();
    workspace.add_file("nested/deep.conf", "value");

    let transport = FakeTransport::new();
    let (_session, mut transfer) = open_transfer(&transport);
    transport.push_put_error(TransportError::Missing {
        path: Utf8PathBuf::from("remote/nested/deep.conf"),
    });
    transport.push_put_error(TransportError::Transfer {
        path: Utf8PathBuf::from("remote/nested/deep.conf"),
        message: String::from("permission denied"),
    });

    let err = replicate::copy_folders(&mut transfer, &[spec(&workspace.root, "remote", &[])])
        .expect_err("second failure is fatal");
    assert!(matches!(err, ReplicateError::Transfer { .. }));
}

#[test]
fn non_missing_failures_are_fatal_without_retry() {
    let workspace = Workspace::new();
    workspace.add_file("a.pub", "key a");

    let transport = FakeTransport::new();
    let (_session, mut transfer) = open_transfer(&transport);
    transport.push_put_error(TransportError::Transfer {
        path: Utf8PathBuf::from("pubkeys/a.pub"),
        message: String::from("quota exceeded"),
    });

    let err = replicate::copy_folders(&mut transfer, &[spec(&workspace.root, "pubkeys", &[])])
        .expect_err("fatal without retry");
    assert!(matches!(err, ReplicateError::Transfer { .. }));

    let put_count = puts(&transport.events()).len();
    assert_eq!(put_count, 1, "no retry for non-missing failures");
}
