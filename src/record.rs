//! Typed overlay presenting an archive as an array of fixed-size records
//!
//! Records are converted explicitly: every [`Record`] writes itself into and
//! reads itself from a `SIZE`-byte window, field by field in little-endian
//! order. Nothing is reinterpreted in place, so alignment and padding never
//! reach the file.
//!
//! A record must be position-independent. Handles, addresses or anything
//! else meaningful only inside one process survive a save/load cycle as
//! garbage; this is not checked.

use crate::archive::{Archive, CompressedArchive, PlainArchive};
use crate::config::ArchiveConfig;
use crate::error::{MapFileError, Result};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

/// Fixed-size value with an explicit byte layout
pub trait Record: Sized {
    /// Encoded size in bytes, must be non-zero
    const SIZE: usize;

    /// Write the value into `out`, which is exactly `SIZE` bytes long
    fn encode(&self, out: &mut [u8]);

    /// Read a value from `bytes`, which is exactly `SIZE` bytes long
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_record_for_number {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Record for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_record_for_number!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl<const N: usize> Record for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self, out: &mut [u8]) {
        out.copy_from_slice(self);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut raw = [0u8; N];
        raw.copy_from_slice(bytes);
        raw
    }
}

/// Mutable access to one record, written back into the archive on drop
pub struct RecordMut<'a, T: Record> {
    slot: &'a mut [u8],
    value: T,
}

impl<T: Record> Deref for RecordMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Record> DerefMut for RecordMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Record> Drop for RecordMut<'_, T> {
    fn drop(&mut self) {
        self.value.encode(self.slot);
    }
}

/// An archive viewed as an array of `T`
///
/// Owns its archive. The length is `archive.size() / T::SIZE`; a trailing
/// partial record is invisible.
pub struct RecordFile<T: Record> {
    archive: Box<dyn Archive>,
    _record: PhantomData<T>,
}

impl<T: Record> RecordFile<T> {
    pub fn new(archive: Box<dyn Archive>) -> Self {
        debug_assert!(T::SIZE > 0, "records must have a non-zero size");
        Self {
            archive,
            _record: PhantomData,
        }
    }

    /// Records in an uncompressed file on the local filesystem
    pub fn plain<P: AsRef<Path>>(name: P) -> Self {
        Self::new(Box::new(PlainArchive::open(name)))
    }

    /// Records in a compressed container on the local filesystem
    pub fn compressed<P: AsRef<Path>>(name: P) -> Self {
        Self::new(Box::new(CompressedArchive::open(name)))
    }

    pub fn compressed_with_config<P: AsRef<Path>>(name: P, config: ArchiveConfig) -> Self {
        Self::new(Box::new(CompressedArchive::with_config(name, config)))
    }

    pub fn archive(&self) -> &dyn Archive {
        self.archive.as_ref()
    }

    pub fn archive_mut(&mut self) -> &mut dyn Archive {
        self.archive.as_mut()
    }

    pub fn into_archive(self) -> Box<dyn Archive> {
        self.archive
    }

    pub fn file_name(&self) -> &Path {
        self.archive.file_name()
    }

    pub fn extended_file_name(&self) -> PathBuf {
        self.archive.extended_file_name()
    }

    /// Byte window of record `index`, checked against the end of the archive
    fn window(&mut self, index: usize) -> Result<std::ops::Range<usize>> {
        let start = index
            .checked_mul(T::SIZE)
            .ok_or(MapFileError::OutOfRange(index))?;
        let end = start
            .checked_add(T::SIZE)
            .ok_or(MapFileError::OutOfRange(index))?;
        if !self.archive.can_read_at(end - 1)? {
            return Err(MapFileError::OutOfRange(index));
        }
        Ok(start..end)
    }

    /// Record at `index`
    pub fn get(&mut self, index: usize) -> Result<T> {
        let window = self.window(index)?;
        Ok(T::decode(self.archive.bytes(window)?))
    }

    /// Mutable record at `index`; loads the whole archive and marks it dirty
    pub fn get_mut(&mut self, index: usize) -> Result<RecordMut<'_, T>> {
        let window = self.window(index)?;
        let slot = self.archive.bytes_mut(window)?;
        let value = T::decode(slot);
        Ok(RecordMut { slot, value })
    }

    pub fn set(&mut self, index: usize, value: &T) -> Result<()> {
        let window = self.window(index)?;
        value.encode(self.archive.bytes_mut(window)?);
        Ok(())
    }

    /// Append one record
    pub fn push(&mut self, value: &T) -> Result<()> {
        let mut bytes = vec![0u8; T::SIZE];
        value.encode(&mut bytes);
        self.archive.append(&bytes)
    }

    /// Number of complete records
    pub fn len(&mut self) -> Result<usize> {
        Ok(self.archive.size()? / T::SIZE)
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Every complete record, loading the whole archive
    pub fn to_vec(&mut self) -> Result<Vec<T>> {
        let data = self.archive.data()?;
        Ok(data.chunks_exact(T::SIZE).map(T::decode).collect())
    }

    pub fn clear(&mut self) {
        self.archive.clear();
    }

    /// Exchange archives with another overlay
    pub fn swap(&mut self, other: &mut RecordFile<T>) {
        std::mem::swap(&mut self.archive, &mut other.archive);
    }

    /// Replace the whole content with `records`
    pub fn replace_with(&mut self, records: &[T]) -> Result<()> {
        let mut bytes = vec![0u8; records.len() * T::SIZE];
        for (record, out) in records.iter().zip(bytes.chunks_exact_mut(T::SIZE)) {
            record.encode(out);
        }
        self.archive.swap_contents(&mut bytes)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.archive.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.archive.close()
    }
}
