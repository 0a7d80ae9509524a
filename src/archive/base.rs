use crate::error::{MapFileError, Result};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Bookkeeping shared by every backend
///
/// `buffer` holds the resident prefix of the file's logical content.
/// `loaded_until` never exceeds `buffer.len()`; bytes past it are either
/// appended in memory or not there yet. While `dirty` is set the buffer is
/// fully loaded.
#[derive(Debug, Clone)]
pub struct ArchiveState {
    pub(crate) name: PathBuf,
    pub(crate) buffer: Vec<u8>,
    pub(crate) loaded_until: usize,
    /// Total logical length if known, `Some(0)` for empty or missing files
    pub(crate) declared_size: Option<usize>,
    pub(crate) dirty: bool,
}

impl ArchiveState {
    pub fn new(name: PathBuf) -> Self {
        Self {
            name,
            buffer: Vec::new(),
            loaded_until: 0,
            declared_size: None,
            dirty: false,
        }
    }

    /// Forget everything about the bound file, keeping the name
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.loaded_until = 0;
        self.declared_size = None;
        self.dirty = false;
    }

    pub fn is_fully_loaded(&self) -> bool {
        match self.declared_size {
            Some(0) => true,
            Some(size) => self.loaded_until >= size,
            None => false,
        }
    }

    /// Truncate to empty. An already empty, fully loaded state stays clean.
    pub fn clear(&mut self) {
        if !self.buffer.is_empty() || !self.is_fully_loaded() {
            self.buffer.clear();
            self.loaded_until = 0;
            self.declared_size = Some(0);
            self.dirty = true;
        }
    }

    pub fn name(&self) -> &Path {
        &self.name
    }

    pub fn loaded_until(&self) -> usize {
        self.loaded_until
    }

    pub fn declared_size(&self) -> Option<usize> {
        self.declared_size
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Byte-addressable, lazily loaded view over one backing file
///
/// Backends supply the format-specific parts (`extension`, `load`,
/// `flush_to`, `size`, `append`); everything else is shared and works on
/// [`ArchiveState`]. Reads may trigger loads, so even read accessors take
/// `&mut self`.
///
/// Dropping a backend flushes it best-effort and logs failures. Call
/// [`Archive::close`] to observe flush errors instead.
pub trait Archive {
    /// File extension of this backend, without the dot
    fn extension(&self) -> &'static str;

    fn state(&self) -> &ArchiveState;

    fn state_mut(&mut self) -> &mut ArchiveState;

    /// Make at least `until` bytes resident, or the whole file for `None`
    ///
    /// Partial loads over-fetch according to the configured growth policy.
    /// A missing file leaves the archive empty instead of failing.
    fn load(&mut self, until: Option<usize>) -> Result<()>;

    /// Persist pending changes into `target` (a logical name, without
    /// extension)
    fn flush_to(&mut self, target: &Path) -> Result<()>;

    /// Current logical length, loading only as much as needed to know it
    fn size(&mut self) -> Result<usize>;

    /// Extend the content at its end
    fn append(&mut self, bytes: &[u8]) -> Result<()>;

    /// Drop all bookkeeping about the bound file
    fn reset(&mut self) {
        self.state_mut().reset();
    }

    fn file_name(&self) -> &Path {
        self.state().name()
    }

    /// `name` with this backend's extension appended
    fn extended_name_of(&self, name: &Path) -> PathBuf {
        let mut extended = name.as_os_str().to_os_string();
        extended.push(".");
        extended.push(self.extension());
        PathBuf::from(extended)
    }

    /// Path of the bound file on disk
    fn extended_file_name(&self) -> PathBuf {
        self.extended_name_of(self.file_name())
    }

    fn load_all(&mut self) -> Result<()> {
        self.load(None)
    }

    /// Flush and detach from the bound file, bind to `name`, then load
    ///
    /// A missing `name` makes the archive empty.
    fn load_from(&mut self, name: &Path, until: Option<usize>) -> Result<()> {
        if name != self.file_name() {
            self.flush()?;
            self.reset();
            tracing::debug!(
                "Rebinding archive {} -> {}",
                self.file_name().display(),
                name.display()
            );
            self.state_mut().name = name.to_path_buf();
        }
        self.load(until)
    }

    /// Persist pending changes into the bound file
    fn flush(&mut self) -> Result<()> {
        let target = self.file_name().to_path_buf();
        self.flush_to(&target)
    }

    /// Flush with errors surfaced, the explicit counterpart of dropping
    fn close(&mut self) -> Result<()> {
        self.flush()
    }

    fn is_fully_loaded(&self) -> bool {
        self.state().is_fully_loaded()
    }

    fn is_dirty(&self) -> bool {
        self.state().is_dirty()
    }

    fn loaded_until(&self) -> usize {
        self.state().loaded_until()
    }

    fn declared_size(&self) -> Option<usize> {
        self.state().declared_size()
    }

    /// Whether byte `index` exists, loading a bounded amount if needed
    fn can_read_at(&mut self, index: usize) -> Result<bool> {
        if index < self.state().buffer.len() {
            return Ok(true);
        }
        if self.is_fully_loaded() {
            return Ok(false);
        }
        self.load(Some(index.saturating_add(1)))?;
        Ok(index < self.state().buffer.len())
    }

    fn byte_at(&mut self, index: usize) -> Result<u8> {
        if !self.can_read_at(index)? {
            return Err(MapFileError::OutOfRange(index));
        }
        Ok(self.state().buffer[index])
    }

    /// Mutable byte access; loads the whole file and marks the archive dirty
    fn byte_at_mut(&mut self, index: usize) -> Result<&mut u8> {
        let end = index
            .checked_add(1)
            .ok_or(MapFileError::OutOfRange(index))?;
        let bytes = self.bytes_mut(index..end)?;
        Ok(&mut bytes[0])
    }

    fn set_byte(&mut self, index: usize, value: u8) -> Result<()> {
        *self.byte_at_mut(index)? = value;
        Ok(())
    }

    /// Read-only window, loading only up to `range.end`
    fn bytes(&mut self, range: Range<usize>) -> Result<&[u8]> {
        if range.end > range.start && !self.can_read_at(range.end - 1)? {
            return Err(MapFileError::OutOfRange(range.end - 1));
        }
        let start = range.start;
        self.state()
            .buffer
            .get(range)
            .ok_or(MapFileError::OutOfRange(start))
    }

    /// Mutable window; loads the whole file and marks the archive dirty
    fn bytes_mut(&mut self, range: Range<usize>) -> Result<&mut [u8]> {
        self.load_all()?;
        let state = self.state_mut();
        if range.start > range.end || range.end > state.buffer.len() {
            return Err(MapFileError::OutOfRange(range.end.saturating_sub(1)));
        }
        state.dirty = true;
        Ok(&mut state.buffer[range])
    }

    fn push_byte(&mut self, byte: u8) -> Result<()> {
        self.append(&[byte])
    }

    fn clear(&mut self) {
        self.state_mut().clear();
    }

    /// Whole content, loading it if necessary
    fn data(&mut self) -> Result<&[u8]> {
        self.load_all()?;
        Ok(&self.state().buffer)
    }

    /// Exchange the content with `other` and mark the archive dirty
    fn swap_contents(&mut self, other: &mut Vec<u8>) -> Result<()> {
        self.load_all()?;
        let state = self.state_mut();
        std::mem::swap(&mut state.buffer, other);
        state.loaded_until = state.buffer.len();
        state.declared_size = Some(state.buffer.len());
        state.dirty = true;
        Ok(())
    }
}

/// Flush performed when a backend is dropped; failures are only logged
pub(crate) fn flush_on_drop<A: Archive + ?Sized>(archive: &mut A) {
    if let Err(err) = archive.flush() {
        tracing::warn!(
            "Failed to flush {} on drop: {}",
            archive.extended_file_name().display(),
            err
        );
    }
}
