use std::num::NonZeroUsize;
use std::path::Path;

use formula_text_store::{
    open_store, BackendKind, DedupIndex, DiskStore, DuplicatePolicy, StoreConfig, StoreError,
    StoreKind,
};
use pretty_assertions::assert_eq;

fn all_kinds() -> Vec<BackendKind> {
    vec![
        BackendKind::Map,
        BackendKind::Disk { encrypt: false },
        BackendKind::Disk { encrypt: true },
        BackendKind::Cache {
            capacity: NonZeroUsize::new(2).expect("non-zero"),
        },
    ]
}

fn collect_in_order(index: &DedupIndex) -> Vec<(u32, String)> {
    let mut out = Vec::new();
    index
        .visit_in_order(&mut |idx, record| {
            out.push((idx, record.to_string()));
            Ok(())
        })
        .expect("visit records");
    out
}

fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).expect("read dir").count()
}

#[test]
fn every_backend_keeps_insertion_order_and_counts() {
    for kind in all_kinds() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = StoreConfig::seeded(kind, 42).with_temp_dir(dir.path());
        let index = DedupIndex::new(open_store(&config).expect("open store"));

        let inputs = ["<t>a</t>", "<t>b</t>", "<t>a</t>", "<t>c</t>"];
        for input in inputs {
            index
                .intern(input, DuplicatePolicy::Keep)
                .expect("intern record");
        }

        assert_eq!(index.count(), 4, "{kind:?}");
        assert_eq!(index.unique_count(), 4, "{kind:?}");
        assert_eq!(index.lookup(2).expect("lookup"), "<t>a</t>", "{kind:?}");
        let expected: Vec<(u32, String)> = inputs
            .iter()
            .enumerate()
            .map(|(i, s)| (i as u32, s.to_string()))
            .collect();
        assert_eq!(collect_in_order(&index), expected, "{kind:?}");
        assert!(matches!(index.lookup(4), Err(StoreError::NotFound(4))));
    }
}

#[test]
fn reuse_policy_depends_on_key_support() {
    for kind in all_kinds() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = StoreConfig::seeded(kind, 7).with_temp_dir(dir.path());
        let index = DedupIndex::new(open_store(&config).expect("open store"));

        for s in ["a", "b", "a", "c", "b", "a"] {
            index.intern(s, DuplicatePolicy::Reuse).expect("intern");
        }
        assert_eq!(index.count(), 6, "{kind:?}");

        if index.store_kind() == StoreKind::Cache {
            // No key map: every insert is a new entry and key lookups are refused.
            assert_eq!(index.unique_count(), 6);
            assert!(matches!(index.index_of("a"), Err(StoreError::Unsupported(_))));
        } else {
            assert_eq!(index.unique_count(), 3, "{kind:?}");
            assert_eq!(index.index_of("c").expect("index_of"), Some(2), "{kind:?}");
            assert_eq!(index.index_of("zzz").expect("index_of"), None, "{kind:?}");
        }
    }
}

#[test]
fn close_removes_backing_files() {
    for kind in all_kinds() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = StoreConfig::seeded(kind, 3).with_temp_dir(dir.path());
        let mut store = open_store(&config).expect("open store");
        store.put(0, "payload").expect("put");

        let expected_files = usize::from(kind != BackendKind::Map);
        assert_eq!(dir_entries(dir.path()), expected_files, "{kind:?}");

        store.close().expect("close");
        store.close().expect("close twice");
        assert_eq!(dir_entries(dir.path()), 0, "{kind:?}");
    }
}

#[test]
fn dropping_a_store_removes_its_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config =
        StoreConfig::seeded(BackendKind::cache(), 1).with_temp_dir(dir.path());
    let store = open_store(&config).expect("open store");
    assert_eq!(dir_entries(dir.path()), 1);
    drop(store);
    assert_eq!(dir_entries(dir.path()), 0);
}

#[test]
fn backing_file_creation_failure_leaves_nothing_behind() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("does-not-exist");

    for kind in [BackendKind::Disk { encrypt: true }, BackendKind::cache()] {
        let config = StoreConfig::seeded(kind, 9).with_temp_dir(&missing);
        let err = open_store(&config).expect_err("temp dir is missing");
        assert!(matches!(err, StoreError::ResourceInit { .. }), "{err:?}");
        assert!(!missing.exists());
        assert_eq!(dir_entries(dir.path()), 0, "{kind:?}");
    }
}

#[test]
fn encrypted_disk_store_does_not_leak_plaintext() {
    let marker = "very-secret-shared-string-marker";
    let dir = tempfile::tempdir().expect("temp dir");

    let plain = DiskStore::create(
        &StoreConfig::seeded(BackendKind::Disk { encrypt: false }, 5).with_temp_dir(dir.path()),
        false,
    )
    .expect("plain store");
    let sealed = DiskStore::create(
        &StoreConfig::seeded(BackendKind::Disk { encrypt: true }, 5).with_temp_dir(dir.path()),
        true,
    )
    .expect("encrypted store");

    let plain_index = DedupIndex::new(Box::new(plain));
    let sealed_index = DedupIndex::new(Box::new(sealed));
    for index in [&plain_index, &sealed_index] {
        index.intern(marker, DuplicatePolicy::Reuse).expect("intern");
        assert_eq!(index.lookup(0).expect("lookup"), marker);
        assert_eq!(index.index_of(marker).expect("index_of"), Some(0));
    }

    let mut files: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read dir")
        .map(|entry| std::fs::read(entry.expect("entry").path()).expect("read store file"))
        .collect();
    assert_eq!(files.len(), 2);
    files.sort_by_key(|bytes| contains(bytes, marker.as_bytes()));
    assert!(!contains(&files[0], marker.as_bytes()), "encrypted file leaked plaintext");
    assert!(contains(&files[1], marker.as_bytes()), "plain file should hold the text");
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
