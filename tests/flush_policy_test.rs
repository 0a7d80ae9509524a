//! Flush strategy tests
//!
//! Every write goes through a MemoryStorage, which records one session per
//! opened file so the tests can see exactly what each flush wrote.

use mapfile_rs::{
    Archive, ArchiveConfig, CompressedArchive, MemoryStorage, PlainArchive, WriteMode,
};

fn plain(storage: &MemoryStorage, name: &str) -> PlainArchive<MemoryStorage> {
    PlainArchive::with_storage(name, storage.clone(), ArchiveConfig::default())
}

fn compressed(storage: &MemoryStorage, name: &str) -> CompressedArchive<MemoryStorage> {
    CompressedArchive::with_storage(name, storage.clone(), ArchiveConfig::default())
}

#[test]
fn test_plain_double_flush_writes_once() {
    let storage = MemoryStorage::new();
    let mut archive = plain(&storage, "log");
    archive.clear();
    archive.append(b"entry").unwrap();

    archive.flush().unwrap();
    archive.flush().unwrap();
    assert_eq!(storage.write_sessions().len(), 1);
}

#[test]
fn test_compressed_double_flush_writes_once() {
    let storage = MemoryStorage::new();
    let mut archive = compressed(&storage, "log");
    archive.clear();
    archive.append(b"entry").unwrap();

    archive.flush().unwrap();
    archive.flush().unwrap();
    drop(archive);
    assert_eq!(storage.write_sessions().len(), 1);
}

#[test]
fn test_unchanged_archive_never_writes() {
    let storage = MemoryStorage::new();
    storage.insert("log.dat", b"already here".to_vec());

    let mut archive = plain(&storage, "log");
    assert_eq!(archive.data().unwrap(), b"already here");
    assert_eq!(archive.byte_at(3).unwrap(), b'e');
    drop(archive);

    assert!(storage.write_sessions().is_empty());
}

#[test]
fn test_append_only_fast_path() {
    let storage = MemoryStorage::new();
    let existing: Vec<u8> = (0..50_000u32).map(|i| (i % 256) as u8).collect();
    storage.insert("log.dat", existing.clone());

    let mut archive = plain(&storage, "log");
    archive.load_all().unwrap();
    archive.append(b"tail one").unwrap();
    archive.push_byte(b'!').unwrap();
    archive.flush().unwrap();

    let sessions = storage.write_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].mode, WriteMode::Append);
    assert_eq!(sessions[0].offset, existing.len() as u64);
    assert_eq!(sessions[0].len, 9);

    // Further appends keep using the fast path from the new end
    archive.append(b"tail two").unwrap();
    archive.flush().unwrap();

    let sessions = storage.write_sessions();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[1].mode, WriteMode::Append);
    assert_eq!(sessions[1].offset, existing.len() as u64 + 9);

    let mut expected = existing;
    expected.extend_from_slice(b"tail one!tail two");
    assert_eq!(storage.contents("log.dat").unwrap(), expected);
}

#[test]
fn test_append_without_prior_load() {
    let storage = MemoryStorage::new();
    storage.insert("log.dat", b"0123456789".to_vec());

    let mut archive = plain(&storage, "log");
    archive.append(b"ab").unwrap();
    assert_eq!(archive.size().unwrap(), 12);
    archive.flush().unwrap();

    let sessions = storage.write_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].mode, WriteMode::Append);
    assert_eq!(sessions[0].offset, 10);
    assert_eq!(sessions[0].len, 2);
}

#[test]
fn test_mutation_forces_rewrite() {
    let storage = MemoryStorage::new();
    storage.insert("log.dat", b"0123456789".to_vec());

    let mut archive = plain(&storage, "log");
    archive.append(b"ab").unwrap();
    archive.set_byte(0, b'X').unwrap();
    archive.flush().unwrap();

    let sessions = storage.write_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].mode, WriteMode::Truncate);
    assert_eq!(sessions[0].offset, 0);
    assert_eq!(sessions[0].len, 12);
    assert_eq!(storage.contents("log.dat").unwrap(), b"X123456789ab");
}

#[test]
fn test_clear_then_append_rewrites() {
    let storage = MemoryStorage::new();
    storage.insert("log.dat", b"stale content".to_vec());

    let mut archive = plain(&storage, "log");
    archive.clear();
    archive.append(b"fresh").unwrap();
    archive.flush().unwrap();

    let sessions = storage.write_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].mode, WriteMode::Truncate);
    assert_eq!(storage.contents("log.dat").unwrap(), b"fresh");
}

#[test]
fn test_compressed_append_reencodes() {
    let storage = MemoryStorage::new();
    {
        let mut archive = compressed(&storage, "log");
        archive.append(b"first").unwrap();
    }
    storage.clear_sessions();

    let mut archive = compressed(&storage, "log");
    archive.append(b" second").unwrap();
    archive.flush().unwrap();

    let sessions = storage.write_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].mode, WriteMode::Truncate);
    assert_eq!(sessions[0].offset, 0);

    let mut reopened = compressed(&storage, "log");
    assert_eq!(reopened.data().unwrap(), b"first second");
}

#[test]
fn test_failed_flush_is_retried_on_next_flush() {
    for use_plain in [true, false] {
        let storage = MemoryStorage::new();
        let mut archive: Box<dyn Archive> = if use_plain {
            Box::new(plain(&storage, "log"))
        } else {
            Box::new(compressed(&storage, "log"))
        };
        archive.clear();
        archive.append(b"survives").unwrap();

        storage.set_fail_writes(true);
        assert!(archive.flush().is_err());
        assert_eq!(archive.data().unwrap(), b"survives");

        storage.set_fail_writes(false);
        archive.flush().unwrap();
        assert!(!archive.is_dirty());
    }
}
