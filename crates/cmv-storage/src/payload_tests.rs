// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;

use cmv_core::{Bundle, BundleVersion, CommitChangesOn, Options, VolumeId, VolumeRecord};
use tempfile::tempdir;

use crate::{delete_payload, read_payload, update_payload, FilesystemLayout, PayloadError};

fn layout() -> (tempfile::TempDir, FilesystemLayout) {
    let tmp = tempdir().expect("tempdir");
    let layout = FilesystemLayout::new(tmp.path());
    layout.ensure_dirs().expect("ensure_dirs");
    (tmp, layout)
}

fn record(id: &str, sub_path: Option<&str>) -> VolumeRecord {
    VolumeRecord {
        volume_id: VolumeId::new(id),
        bundle_name: "cfg".into(),
        bundle_namespace: "default".into(),
        workload_name: "pod-a".into(),
        workload_namespace: "default".into(),
        target_path: "/target".into(),
        options: Options {
            sub_path: sub_path.map(str::to_string),
            keep_current_always: true,
            commit_changes_on: CommitChangesOn::Off,
            conflict_policy: None,
            oversize_policy: None,
        },
        remote_version: None,
    }
}

fn bundle(version: &str, text: &[(&str, &str)]) -> Bundle {
    Bundle {
        name: "cfg".into(),
        namespace: "default".into(),
        version: BundleVersion(version.into()),
        text: text.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        binary: BTreeMap::new(),
    }
}

#[test]
fn dir_mode_writes_one_file_per_entry() {
    let (_tmp, layout) = layout();
    let mut rec = record("vol-1", None);
    let b = bundle("v1", &[("a.txt", "hello"), ("b.txt", "world")]);

    let (path, bumped) = update_payload(&layout, &mut rec, &b).expect("update");
    assert!(bumped);
    assert_eq!(std::fs::read_to_string(path.join("a.txt")).unwrap(), "hello");
    assert_eq!(std::fs::read_to_string(path.join("b.txt")).unwrap(), "world");
    assert_eq!(rec.remote_version, Some(BundleVersion("v1".into())));
}

#[test]
fn file_mode_writes_single_sub_path_entry() {
    let (_tmp, layout) = layout();
    let mut rec = record("vol-1", Some("app.conf"));
    let b = bundle("v1", &[("app.conf", "key=value"), ("other.txt", "ignored")]);

    let (path, bumped) = update_payload(&layout, &mut rec, &b).expect("update");
    assert!(bumped);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "key=value");
}

#[test]
fn file_mode_missing_sub_path_is_not_found() {
    let (_tmp, layout) = layout();
    let mut rec = record("vol-1", Some("missing.conf"));
    let b = bundle("v1", &[("present.conf", "x")]);

    let err = update_payload(&layout, &mut rec, &b).unwrap_err();
    assert!(matches!(err, PayloadError::NotFound(ref k) if k == "missing.conf"));
}

#[test]
fn matching_version_is_a_byte_identity_no_op() {
    let (_tmp, layout) = layout();
    let mut rec = record("vol-1", None);
    let b1 = bundle("v1", &[("a.txt", "hello")]);
    update_payload(&layout, &mut rec, &b1).expect("first write");

    // Tamper with the on-disk content, then replay the same version.
    let path = layout.volume_path(&rec.volume_id).join("a.txt");
    std::fs::write(&path, "tampered").unwrap();

    let (_path, bumped) = update_payload(&layout, &mut rec, &b1).expect("no-op update");
    assert!(!bumped);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "tampered");
}

#[test]
fn new_version_overwrites_dir_payload() {
    let (_tmp, layout) = layout();
    let mut rec = record("vol-1", None);
    let b1 = bundle("v1", &[("a.txt", "hello")]);
    update_payload(&layout, &mut rec, &b1).expect("first write");

    let b2 = bundle("v2", &[("a.txt", "updated")]);
    let (path, bumped) = update_payload(&layout, &mut rec, &b2).expect("second write");
    assert!(bumped);
    assert_eq!(std::fs::read_to_string(path.join("a.txt")).unwrap(), "updated");
    assert_eq!(rec.remote_version, Some(BundleVersion("v2".into())));
}

#[test]
fn read_payload_dir_mode_round_trips() {
    let (_tmp, layout) = layout();
    let mut rec = record("vol-1", None);
    let b = bundle("v1", &[("a.txt", "hello"), ("b.txt", "world")]);
    update_payload(&layout, &mut rec, &b).expect("write");

    let read_back = read_payload(&layout, &rec).expect("read").expect("non-empty");
    assert_eq!(read_back.get("a.txt").unwrap(), b"hello");
    assert_eq!(read_back.get("b.txt").unwrap(), b"world");
}

#[test]
fn read_payload_file_mode_round_trips() {
    let (_tmp, layout) = layout();
    let mut rec = record("vol-1", Some("app.conf"));
    let b = bundle("v1", &[("app.conf", "key=value")]);
    update_payload(&layout, &mut rec, &b).expect("write");

    let read_back = read_payload(&layout, &rec).expect("read").expect("non-empty");
    assert_eq!(read_back.len(), 1);
    assert_eq!(read_back.get("app.conf").unwrap(), b"key=value");
}

#[test]
fn read_payload_empty_dir_is_none() {
    let (_tmp, layout) = layout();
    let rec = record("vol-1", None);
    std::fs::create_dir_all(layout.volume_path(&rec.volume_id)).unwrap();

    assert_eq!(read_payload(&layout, &rec).expect("read"), None);
}

#[test]
fn read_payload_missing_payload_is_none() {
    let (_tmp, layout) = layout();
    let rec = record("vol-1", None);
    assert_eq!(read_payload(&layout, &rec).expect("read"), None);
}

#[test]
fn delete_payload_removes_directory_tree() {
    let (_tmp, layout) = layout();
    let mut rec = record("vol-1", None);
    let b = bundle("v1", &[("a.txt", "hello")]);
    update_payload(&layout, &mut rec, &b).expect("write");

    delete_payload(&layout, &rec.volume_id).expect("delete");
    assert!(!layout.volume_path(&rec.volume_id).exists());
}

#[test]
fn delete_payload_is_idempotent() {
    let (_tmp, layout) = layout();
    let id = VolumeId::new("vol-1");
    delete_payload(&layout, &id).expect("first delete");
    delete_payload(&layout, &id).expect("second delete is a no-op");
}
