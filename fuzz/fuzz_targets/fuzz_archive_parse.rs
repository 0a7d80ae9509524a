#![no_main]

use libfuzzer_sys::fuzz_target;
use mapfile_rs::{Archive, ArchiveConfig, CompressedArchive, MemoryStorage, HEADER_SIZE};

fuzz_target!(|data: &[u8]| {
    // Skip inputs shorter than a container header
    if data.len() < HEADER_SIZE {
        return;
    }

    let storage = MemoryStorage::new();
    storage.insert("fuzz.zst", data.to_vec());

    // Header only - should never panic
    let mut archive =
        CompressedArchive::with_storage("fuzz", storage.clone(), ArchiveConfig::default());
    let _ = archive.read_header();
    let _ = archive.size();

    // Lazy probes, then a full decode - should never panic
    let mut archive =
        CompressedArchive::with_storage("fuzz", storage.clone(), ArchiveConfig::default());
    for index in [0usize, 1, 4096, 1 << 20] {
        if archive.can_read_at(index).is_err() {
            return; // Expected for corrupted data
        }
    }
    if let Ok(content) = archive.data() {
        let _ = content.len();
    }

    // Nothing changed, so dropping must not write
    drop(archive);
    assert!(storage.write_sessions().is_empty());
});
