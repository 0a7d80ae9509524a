use crate::archive::base::{flush_on_drop, Archive, ArchiveState};
use crate::config::{ArchiveConfig, GrowthPolicy};
use crate::error::Result;
use crate::storage::{FsStorage, Storage, WriteMode};
use std::io::{Read, Write};
use std::path::Path;

/// Extension of uncompressed archive files
const PLAIN_EXTENSION: &str = "dat";

/// Archive over an uncompressed file whose bytes are the content itself
///
/// Besides the shared bookkeeping it tracks `appended_from`: the offset from
/// which the buffer only grew by appends since it was last known identical
/// to the file. A flush with no other mutation then only writes that tail.
pub struct PlainArchive<S: Storage = FsStorage> {
    state: ArchiveState,
    storage: S,
    growth: GrowthPolicy,
    appended_from: usize,
}

impl PlainArchive<FsStorage> {
    /// Bind to `name` (without extension) on the local filesystem
    ///
    /// Nothing is read until the content is first needed.
    pub fn open<P: AsRef<Path>>(name: P) -> Self {
        Self::with_config(name, ArchiveConfig::default())
    }

    pub fn with_config<P: AsRef<Path>>(name: P, config: ArchiveConfig) -> Self {
        Self::with_storage(name, FsStorage, config)
    }
}

impl<S: Storage> PlainArchive<S> {
    pub fn with_storage<P: AsRef<Path>>(name: P, storage: S, config: ArchiveConfig) -> Self {
        Self {
            state: ArchiveState::new(name.as_ref().to_path_buf()),
            storage,
            growth: config.growth,
            appended_from: 0,
        }
    }

    /// Extension used by this backend, without the dot
    pub fn standard_extension() -> &'static str {
        PLAIN_EXTENSION
    }

    /// Offset from which the buffer holds bytes not yet on disk
    pub fn appended_from(&self) -> usize {
        self.appended_from
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Record the total file length and, once everything on disk is
    /// resident, start tracking appends from the end of it
    fn set_declared_size(&mut self, size: usize) {
        self.state.declared_size = Some(size);
        if self.state.is_fully_loaded() {
            self.appended_from = self.state.buffer.len();
        }
    }
}

fn write_bytes<S: Storage>(storage: &S, path: &Path, mode: WriteMode, bytes: &[u8]) -> Result<()> {
    let mut writer = storage.open_write(path, mode)?;
    writer.write_all(bytes)?;
    writer.flush()?;
    Ok(())
}

impl<S: Storage> Archive for PlainArchive<S> {
    fn extension(&self) -> &'static str {
        PLAIN_EXTENSION
    }

    fn state(&self) -> &ArchiveState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ArchiveState {
        &mut self.state
    }

    fn reset(&mut self) {
        self.state.reset();
        self.appended_from = 0;
    }

    fn size(&mut self) -> Result<usize> {
        if self.state.dirty {
            return Ok(self.state.buffer.len());
        }
        if let Some(size) = self.state.declared_size {
            return Ok(self.state.buffer.len().max(size));
        }

        let path = self.extended_file_name();
        let size = self.storage.size(&path)?.unwrap_or(0) as usize;
        self.set_declared_size(size);
        Ok(self.state.buffer.len().max(size))
    }

    fn load(&mut self, until: Option<usize>) -> Result<()> {
        if self.state.is_fully_loaded() {
            return Ok(());
        }
        if let Some(until) = until {
            if self.state.loaded_until >= until {
                return Ok(());
            }
        }

        let path = self.extended_file_name();
        let offset = self.state.loaded_until;
        debug_assert_eq!(offset, self.state.buffer.len());

        let Some(reader) = self.storage.open_read(&path, offset as u64)? else {
            tracing::debug!("{} does not exist, treating as empty", path.display());
            self.set_declared_size(offset);
            return Ok(());
        };

        // Bytes to request beyond what is resident; None reads to the end
        let limit = until.map(|until| self.growth.stop_at(until) - offset);
        let result = match limit {
            Some(limit) => reader.take(limit as u64).read_to_end(&mut self.state.buffer),
            None => {
                let mut reader = reader;
                reader.read_to_end(&mut self.state.buffer)
            }
        };
        let read = match result {
            Ok(read) => read,
            Err(err) => {
                self.state.buffer.truncate(offset);
                return Err(err.into());
            }
        };
        self.state.loaded_until += read;

        // A short read is the end of the file; only bytes actually read count
        let reached_end = limit.map_or(true, |limit| read < limit);
        if reached_end {
            self.set_declared_size(self.state.loaded_until);
        } else if self.state.is_fully_loaded() {
            self.appended_from = self.state.buffer.len();
        }

        tracing::debug!(
            "Read {} bytes of {} (resident {}, end {})",
            read,
            path.display(),
            self.state.loaded_until,
            if reached_end { "reached" } else { "not reached" }
        );
        Ok(())
    }

    fn flush_to(&mut self, target: &Path) -> Result<()> {
        let path = self.extended_name_of(target);

        if target != self.state.name.as_path() {
            // Saving under another name copies everything and leaves the
            // bound file's pending changes pending
            self.load_all()?;
            write_bytes(&self.storage, &path, WriteMode::Truncate, &self.state.buffer)?;
            tracing::debug!(
                "Copied {} bytes into {}",
                self.state.buffer.len(),
                path.display()
            );
            return Ok(());
        }

        let len = self.state.buffer.len();
        if self.state.dirty {
            write_bytes(&self.storage, &path, WriteMode::Truncate, &self.state.buffer)?;
            tracing::debug!("Rewrote {} with {} bytes", path.display(), len);
        } else if self.appended_from < len
            && self.state.declared_size == Some(self.state.loaded_until)
        {
            let tail = &self.state.buffer[self.appended_from..];
            write_bytes(&self.storage, &path, WriteMode::Append, tail)?;
            tracing::debug!(
                "Appended {} bytes to {} at offset {}",
                tail.len(),
                path.display(),
                self.appended_from
            );
        } else {
            return Ok(());
        }

        self.state.dirty = false;
        self.state.loaded_until = len;
        self.state.declared_size = Some(len);
        self.appended_from = len;
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        // Any untouched on-disk suffix has to be resident before extending
        self.load_all()?;
        self.state.buffer.extend_from_slice(bytes);
        Ok(())
    }
}

impl<S: Storage> Drop for PlainArchive<S> {
    fn drop(&mut self) {
        flush_on_drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MapFileError;
    use crate::storage::{MemoryStorage, WriteSession};
    use std::path::PathBuf;

    fn tiny_growth() -> ArchiveConfig {
        let mut config = ArchiveConfig::default();
        config.growth = GrowthPolicy {
            min_increment: 4,
            max_increment: 4,
            factor: 1.0,
        };
        config
    }

    fn sample() -> Vec<u8> {
        (0..100u8).collect()
    }

    #[test]
    fn test_extended_name() {
        let archive = PlainArchive::with_storage("dir/log", MemoryStorage::new(), tiny_growth());
        assert_eq!(archive.file_name(), Path::new("dir/log"));
        assert_eq!(archive.extended_file_name(), PathBuf::from("dir/log.dat"));
    }

    #[test]
    fn test_partial_load() {
        let storage = MemoryStorage::new();
        storage.insert("log.dat", sample());
        let mut archive = PlainArchive::with_storage("log", storage, tiny_growth());

        assert!(archive.can_read_at(0).unwrap());
        // Request for 1 byte grows to 1 + min_increment
        assert_eq!(archive.loaded_until(), 5);
        assert!(!archive.is_fully_loaded());

        assert_eq!(archive.byte_at(42).unwrap(), 42);
        assert_eq!(archive.loaded_until(), 47);
        assert_eq!(archive.declared_size(), None);
    }

    #[test]
    fn test_end_of_file_discovery() {
        let storage = MemoryStorage::new();
        storage.insert("log.dat", sample());
        let mut archive = PlainArchive::with_storage("log", storage, tiny_growth());

        assert!(archive.can_read_at(99).unwrap());
        assert!(!archive.can_read_at(100).unwrap());
        assert_eq!(archive.declared_size(), Some(100));
        assert_eq!(archive.loaded_until(), 100);
        assert!(archive.is_fully_loaded());
        assert_eq!(archive.appended_from(), 100);
    }

    #[test]
    fn test_size_from_metadata() {
        let storage = MemoryStorage::new();
        storage.insert("log.dat", sample());
        let mut archive = PlainArchive::with_storage("log", storage, tiny_growth());

        assert_eq!(archive.size().unwrap(), 100);
        assert_eq!(archive.loaded_until(), 0);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let storage = MemoryStorage::new();
        let mut archive = PlainArchive::with_storage("none", storage.clone(), tiny_growth());

        assert_eq!(archive.size().unwrap(), 0);
        assert!(archive.data().unwrap().is_empty());
        assert!(!archive.can_read_at(0).unwrap());
        assert!(matches!(archive.byte_at(0), Err(MapFileError::OutOfRange(0))));

        archive.flush().unwrap();
        assert!(storage.write_sessions().is_empty());
    }

    #[test]
    fn test_append_writes_only_tail() {
        let storage = MemoryStorage::new();
        storage.insert("log.dat", sample());
        let mut archive = PlainArchive::with_storage("log", storage.clone(), tiny_growth());

        archive.append(b"xyz").unwrap();
        assert!(!archive.is_dirty());
        assert_eq!(archive.size().unwrap(), 103);

        archive.flush().unwrap();
        assert_eq!(
            storage.write_sessions(),
            vec![WriteSession {
                path: PathBuf::from("log.dat"),
                mode: WriteMode::Append,
                offset: 100,
                len: 3,
            }]
        );

        let mut expected = sample();
        expected.extend_from_slice(b"xyz");
        assert_eq!(storage.contents("log.dat").unwrap(), expected);

        // Nothing new: second flush writes nothing
        archive.flush().unwrap();
        assert_eq!(storage.write_sessions().len(), 1);
    }

    #[test]
    fn test_exact_partial_read_then_append() {
        // A partial load that happens to end exactly at the end of the file
        // does not see the end; size() later learns it from metadata.
        let storage = MemoryStorage::new();
        storage.insert("log.dat", b"abcde".to_vec());
        let mut archive = PlainArchive::with_storage("log", storage.clone(), tiny_growth());

        assert!(archive.can_read_at(0).unwrap());
        assert_eq!(archive.loaded_until(), 5);
        assert_eq!(archive.declared_size(), None);

        assert_eq!(archive.size().unwrap(), 5);
        assert!(archive.is_fully_loaded());

        archive.push_byte(b'f').unwrap();
        archive.flush().unwrap();

        let sessions = storage.write_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].mode, WriteMode::Append);
        assert_eq!(sessions[0].offset, 5);
        assert_eq!(sessions[0].len, 1);
        assert_eq!(storage.contents("log.dat").unwrap(), b"abcdef");
    }

    #[test]
    fn test_mutation_rewrites_everything() {
        let storage = MemoryStorage::new();
        storage.insert("log.dat", sample());
        let mut archive = PlainArchive::with_storage("log", storage.clone(), tiny_growth());

        archive.set_byte(3, 0xAA).unwrap();
        archive.append(b"!").unwrap();
        assert!(archive.is_dirty());
        archive.flush().unwrap();

        let sessions = storage.write_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].mode, WriteMode::Truncate);
        assert_eq!(sessions[0].len, 101);
        assert!(!archive.is_dirty());
        assert_eq!(archive.appended_from(), 101);
    }

    #[test]
    fn test_failed_flush_keeps_changes() {
        let storage = MemoryStorage::new();
        storage.insert("log.dat", b"Hello".to_vec());
        let mut archive = PlainArchive::with_storage("log", storage.clone(), tiny_growth());

        archive.set_byte(0, b'J').unwrap();
        storage.set_fail_writes(true);
        assert!(matches!(archive.flush(), Err(MapFileError::Io(_))));
        assert!(archive.is_dirty());
        assert_eq!(archive.data().unwrap(), b"Jello");

        storage.set_fail_writes(false);
        archive.flush().unwrap();
        assert!(!archive.is_dirty());
        assert_eq!(storage.contents("log.dat").unwrap(), b"Jello");
    }

    #[test]
    fn test_flush_to_other_name_keeps_pending() {
        let storage = MemoryStorage::new();
        storage.insert("a.dat", b"abc".to_vec());
        let mut archive = PlainArchive::with_storage("a", storage.clone(), tiny_growth());

        archive.append(b"def").unwrap();
        archive.flush_to(Path::new("b")).unwrap();
        assert_eq!(storage.contents("b.dat").unwrap(), b"abcdef");
        assert_eq!(storage.contents("a.dat").unwrap(), b"abc");

        archive.flush().unwrap();
        assert_eq!(storage.contents("a.dat").unwrap(), b"abcdef");
    }

    #[test]
    fn test_drop_flushes() {
        let storage = MemoryStorage::new();
        {
            let mut archive = PlainArchive::with_storage("log", storage.clone(), tiny_growth());
            archive.append(b"kept").unwrap();
        }
        assert_eq!(storage.contents("log.dat").unwrap(), b"kept");
    }

    #[test]
    fn test_drop_failure_is_swallowed() {
        let storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        {
            let mut archive = PlainArchive::with_storage("log", storage.clone(), tiny_growth());
            archive.append(b"lost").unwrap();
        }
        assert!(!storage.exists("log.dat"));
    }
}
