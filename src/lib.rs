//! Mapfile-rs: lazily loaded, byte-addressable views over files
//!
//! This library provides:
//! - An [`Archive`] contract: a file's content as a growable byte buffer that
//!   is read on demand and flushed back when changed
//! - [`PlainArchive`]: uncompressed `.dat` files, flushing pure appends by
//!   writing only the new tail
//! - [`CompressedArchive`]: Zstd or LZ4 containers, re-encoded on every flush
//! - [`RecordFile`]: an archive viewed as an array of fixed-size records
//!
//! # Example
//!
//! ```no_run
//! use mapfile_rs::{Archive, PlainArchive, RecordFile};
//!
//! // Byte access
//! let mut archive = PlainArchive::open("greeting");
//! archive.clear();
//! archive.append(b"Hello")?;
//! archive.close()?;
//!
//! let mut archive = PlainArchive::open("greeting");
//! archive.set_byte(0, b'J')?;
//! assert_eq!(archive.data()?, b"Jello");
//!
//! // Record access
//! let mut counters: RecordFile<u16> = RecordFile::compressed("counters");
//! counters.push(&42)?;
//! assert_eq!(counters.get(0)?, 42);
//! # Ok::<(), mapfile_rs::error::MapFileError>(())
//! ```

// Core modules
pub mod archive;
pub mod config;
pub mod error;
pub mod record;
pub mod storage;

// Re-export commonly used types
pub use archive::{
    Archive, ArchiveState, Codec, CompressedArchive, ContainerHeader, PlainArchive, HEADER_SIZE,
    MAGIC_NUMBER, UNKNOWN_SIZE,
};
pub use config::{ArchiveConfig, CompressionConfig, GrowthPolicy};
pub use error::{MapFileError, Result};
pub use record::{Record, RecordFile, RecordMut};
pub use storage::{FsStorage, MemoryStorage, Storage, WriteMode, WriteSession};
