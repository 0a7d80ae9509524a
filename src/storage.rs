//! Byte-stream I/O behind the archive backends
//!
//! Backends never touch `std::fs` directly. They go through [`Storage`], which
//! opens a handle for the duration of one load or flush and drops it before
//! returning. [`FsStorage`] is the real filesystem; [`MemoryStorage`] keeps
//! files in memory and records every write session, which is how the flush
//! policy is observed in tests.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How a file is opened for writing. Both modes create a missing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Discard previous contents
    Truncate,
    /// Keep previous contents and write after them
    Append,
}

/// Byte-stream I/O provider
pub trait Storage {
    /// Length of the file in bytes, `None` if it does not exist
    fn size(&self, path: &Path) -> io::Result<Option<u64>>;

    /// Open a file for sequential reading starting at `offset`,
    /// `None` if it does not exist
    fn open_read(&self, path: &Path, offset: u64) -> io::Result<Option<Box<dyn Read>>>;

    /// Open a file for writing
    fn open_write(&self, path: &Path, mode: WriteMode) -> io::Result<Box<dyn Write>>;
}

/// Storage on the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl Storage for FsStorage {
    fn size(&self, path: &Path) -> io::Result<Option<u64>> {
        match std::fs::metadata(path) {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn open_read(&self, path: &Path, offset: u64) -> io::Result<Option<Box<dyn Read>>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(Some(Box::new(BufReader::new(file))))
    }

    fn open_write(&self, path: &Path, mode: WriteMode) -> io::Result<Box<dyn Write>> {
        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            WriteMode::Truncate => options.write(true).truncate(true),
            WriteMode::Append => options.append(true),
        };
        let file = options.open(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// One `open_write` call observed by a [`MemoryStorage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSession {
    pub path: PathBuf,
    pub mode: WriteMode,
    /// File offset of the first byte written in this session
    pub offset: u64,
    /// Total bytes written in this session
    pub len: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<PathBuf, Vec<u8>>,
    sessions: Vec<WriteSession>,
    fail_writes: bool,
}

/// In-memory storage that records every write session
///
/// Clones share the same files, so a test can keep a handle while an archive
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a file, replacing any previous contents
    pub fn insert<P: AsRef<Path>>(&self, path: P, data: Vec<u8>) {
        self.state.lock().files.insert(path.as_ref().to_path_buf(), data);
    }

    /// Current contents of a file
    pub fn contents<P: AsRef<Path>>(&self, path: P) -> Option<Vec<u8>> {
        self.state.lock().files.get(path.as_ref()).cloned()
    }

    pub fn exists<P: AsRef<Path>>(&self, path: P) -> bool {
        self.state.lock().files.contains_key(path.as_ref())
    }

    /// Every write session opened so far, oldest first
    pub fn write_sessions(&self) -> Vec<WriteSession> {
        self.state.lock().sessions.clone()
    }

    pub fn clear_sessions(&self) {
        self.state.lock().sessions.clear();
    }

    /// Make subsequent `open_write` calls fail with `PermissionDenied`
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }
}

impl Storage for MemoryStorage {
    fn size(&self, path: &Path) -> io::Result<Option<u64>> {
        Ok(self
            .state
            .lock()
            .files
            .get(path)
            .map(|data| data.len() as u64))
    }

    fn open_read(&self, path: &Path, offset: u64) -> io::Result<Option<Box<dyn Read>>> {
        let state = self.state.lock();
        let Some(data) = state.files.get(path) else {
            return Ok(None);
        };
        let mut cursor = Cursor::new(data.clone());
        cursor.set_position(offset);
        Ok(Some(Box::new(cursor)))
    }

    fn open_write(&self, path: &Path, mode: WriteMode) -> io::Result<Box<dyn Write>> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("writes disabled for {}", path.display()),
            ));
        }

        let file = state.files.entry(path.to_path_buf()).or_default();
        if mode == WriteMode::Truncate {
            file.clear();
        }
        let offset = file.len() as u64;

        state.sessions.push(WriteSession {
            path: path.to_path_buf(),
            mode,
            offset,
            len: 0,
        });
        let session = state.sessions.len() - 1;

        Ok(Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            path: path.to_path_buf(),
            session,
        }))
    }
}

struct MemoryWriter {
    state: Arc<Mutex<MemoryState>>,
    path: PathBuf,
    session: usize,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("writes disabled for {}", self.path.display()),
            ));
        }
        state
            .files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        if let Some(session) = state.sessions.get_mut(self.session) {
            session.len += buf.len() as u64;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
