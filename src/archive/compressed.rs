use crate::archive::base::{flush_on_drop, Archive, ArchiveState};
use crate::archive::format::{Codec, ContainerHeader};
use crate::config::ArchiveConfig;
use crate::error::{MapFileError, Result};
use crate::storage::{FsStorage, Storage, WriteMode};
use std::io::{self, Read, Write};
use std::path::Path;

/// Size of the buffer decoded output is pulled through (32KB)
const DECODE_CHUNK_SIZE: usize = 1 << 15;

/// Archive over a compressed container
///
/// Loading decodes the stream from its start and stops once enough bytes are
/// resident. Every flush re-encodes the whole content: the codec streams do
/// not support editing in place.
pub struct CompressedArchive<S: Storage = FsStorage> {
    state: ArchiveState,
    storage: S,
    config: ArchiveConfig,
}

impl CompressedArchive<FsStorage> {
    /// Bind to `name` (without extension) on the local filesystem
    pub fn open<P: AsRef<Path>>(name: P) -> Self {
        Self::with_config(name, ArchiveConfig::default())
    }

    pub fn with_config<P: AsRef<Path>>(name: P, config: ArchiveConfig) -> Self {
        Self::with_storage(name, FsStorage, config)
    }
}

impl<S: Storage> CompressedArchive<S> {
    pub fn with_storage<P: AsRef<Path>>(name: P, storage: S, config: ArchiveConfig) -> Self {
        Self {
            state: ArchiveState::new(name.as_ref().to_path_buf()),
            storage,
            config,
        }
    }

    /// Extension used with the default codec, without the dot
    pub fn standard_extension() -> &'static str {
        Codec::Zstd.extension()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Read only the container header of the bound file
    ///
    /// Learns the declared size without decoding anything. Returns `None`
    /// for a missing file, which also marks the archive empty.
    pub fn read_header(&mut self) -> Result<Option<ContainerHeader>> {
        let path = self.extended_file_name();
        let Some(reader) = self.storage.open_read(&path, 0)? else {
            self.state.declared_size = Some(self.state.loaded_until);
            return Ok(None);
        };

        let header = ContainerHeader::read_from(reader)?;
        if self.state.declared_size.is_none() {
            self.state.declared_size = declared_len(&header)?;
        }
        Ok(Some(header))
    }

    /// Encode the whole buffer into `path`
    fn encode_to(&self, path: &Path) -> Result<()> {
        let compression = &self.config.compression;
        let data = &self.state.buffer;
        let level = match compression.codec {
            Codec::Zstd => compression.level.clamp(i8::MIN as i32, i8::MAX as i32) as i8,
            Codec::Lz4 => 0,
        };
        let header = ContainerHeader::new(
            compression.codec,
            level,
            compression.window_log,
            Some(data.len() as u64),
        );

        let mut writer = self.storage.open_write(path, WriteMode::Truncate)?;
        header.write_to(&mut writer)?;

        let mut writer = match compression.codec {
            Codec::Zstd => {
                let mut encoder = zstd::stream::write::Encoder::new(writer, compression.level)
                    .map_err(|e| {
                        MapFileError::CompressionFailed(format!(
                            "Cannot create Zstd encoder: {}",
                            e
                        ))
                    })?;
                encoder
                    .include_checksum(compression.checksum)
                    .map_err(|e| MapFileError::CompressionFailed(e.to_string()))?;
                if compression.window_log != 0 {
                    encoder
                        .window_log(u32::from(compression.window_log))
                        .map_err(|e| MapFileError::CompressionFailed(e.to_string()))?;
                }
                encoder.write_all(data)?;
                encoder.finish()?
            }
            Codec::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(writer);
                encoder.write_all(data)?;
                encoder.finish().map_err(|e| {
                    MapFileError::CompressionFailed(format!("LZ4 frame encoding failed: {}", e))
                })?
            }
        };
        writer.flush()?;
        Ok(())
    }
}

/// Declared size from a header, checked against the address space
fn declared_len(header: &ContainerHeader) -> Result<Option<usize>> {
    header
        .declared_size
        .map(usize::try_from)
        .transpose()
        .map_err(|_| {
            MapFileError::CorruptHeader(format!(
                "declared size {:?} does not fit in memory",
                header.declared_size
            ))
        })
}

/// Streaming decoder for the codec named in the header
fn decoder_for(header: &ContainerHeader, reader: Box<dyn Read>) -> Result<Box<dyn Read>> {
    match header.codec {
        Codec::Zstd => {
            let mut decoder = zstd::stream::read::Decoder::new(reader).map_err(|e| {
                MapFileError::CorruptStream(format!("Cannot initialise Zstd decoder: {}", e))
            })?;
            if header.window_log != 0 {
                decoder
                    .window_log_max(u32::from(header.window_log))
                    .map_err(|e| MapFileError::CorruptStream(e.to_string()))?;
            }
            Ok(Box::new(decoder))
        }
        Codec::Lz4 => Ok(Box::new(lz4_flex::frame::FrameDecoder::new(reader))),
    }
}

/// How a decode pass stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeEnd {
    /// The stream's end marker was reached
    Finished,
    /// Enough bytes are resident; the rest of the stream was not read
    Stopped,
}

fn read_chunk(decoder: &mut dyn Read, chunk: &mut [u8]) -> Result<usize> {
    loop {
        match decoder.read(chunk) {
            Ok(read) => return Ok(read),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(MapFileError::CorruptStream(format!(
                    "Decompression broke: {}",
                    e
                )))
            }
        }
    }
}

/// Decode into `buffer`, skipping output that is already resident
///
/// Stops at `stop_at` bytes, at `declared` bytes, or at the end of the
/// stream. Reaching the declared size also checks that the stream ends
/// there.
fn decode_into(
    decoder: &mut dyn Read,
    buffer: &mut Vec<u8>,
    declared: Option<usize>,
    stop_at: Option<usize>,
) -> Result<DecodeEnd> {
    let resident = buffer.len();
    let mut skipped = 0usize;
    let mut chunk = vec![0u8; DECODE_CHUNK_SIZE];

    loop {
        let read = read_chunk(decoder, &mut chunk)?;
        if read == 0 {
            if skipped < resident {
                return Err(MapFileError::CorruptStream(format!(
                    "stream ended after {} bytes, {} were loaded before",
                    skipped, resident
                )));
            }
            return Ok(DecodeEnd::Finished);
        }

        let mut produced = &chunk[..read];
        if skipped < resident {
            let skip = (resident - skipped).min(produced.len());
            skipped += skip;
            produced = &produced[skip..];
        }
        buffer.extend_from_slice(produced);

        if let Some(declared) = declared {
            if buffer.len() > declared {
                return Err(MapFileError::CorruptStream(format!(
                    "stream holds more than the declared {} bytes",
                    declared
                )));
            }
            if buffer.len() == declared {
                if read_chunk(decoder, &mut chunk)? != 0 {
                    return Err(MapFileError::CorruptStream(format!(
                        "stream holds more than the declared {} bytes",
                        declared
                    )));
                }
                return Ok(DecodeEnd::Finished);
            }
        }

        if stop_at.map_or(false, |stop_at| buffer.len() >= stop_at) {
            return Ok(DecodeEnd::Stopped);
        }
    }
}

impl<S: Storage> Archive for CompressedArchive<S> {
    fn extension(&self) -> &'static str {
        self.config.compression.codec.extension()
    }

    fn state(&self) -> &ArchiveState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ArchiveState {
        &mut self.state
    }

    fn size(&mut self) -> Result<usize> {
        if self.state.is_fully_loaded() {
            if self.state.dirty {
                return Ok(self.state.buffer.len());
            }
            return Ok(self.state.declared_size.unwrap_or(self.state.buffer.len()));
        }
        if let Some(size) = self.state.declared_size {
            return Ok(size);
        }

        self.read_header()?;
        if let Some(size) = self.state.declared_size {
            return Ok(size);
        }

        // Size left open in the header: only the stream's end tells
        self.load_all()?;
        Ok(self.state.declared_size.unwrap_or(self.state.buffer.len()))
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
        let Some(mut reader) = self.storage.open_read(&path, 0)? else {
            tracing::debug!("{} does not exist, treating as empty", path.display());
            self.state.declared_size = Some(self.state.loaded_until);
            return Ok(());
        };

        let header = ContainerHeader::read_from(&mut reader)?;
        let declared = declared_len(&header)?;
        if declared == Some(0) {
            self.state.declared_size = declared;
            return Ok(());
        }

        let stop_at = until.map(|until| self.config.growth.stop_at(until));
        let mut decoder = decoder_for(&header, reader)?;
        let resident = self.state.buffer.len();
        let end = match decode_into(decoder.as_mut(), &mut self.state.buffer, declared, stop_at) {
            Ok(end) => end,
            Err(err) => {
                self.state.buffer.truncate(resident);
                return Err(err);
            }
        };

        let loaded = self.state.buffer.len();
        if end == DecodeEnd::Finished {
            if let Some(declared) = declared {
                if loaded < declared {
                    self.state.buffer.truncate(resident);
                    return Err(MapFileError::CorruptStream(format!(
                        "stream ended after {} of {} declared bytes",
                        loaded, declared
                    )));
                }
            }
        }

        self.state.loaded_until = loaded;
        self.state.declared_size = match (declared, end) {
            (Some(declared), _) => Some(declared),
            (None, DecodeEnd::Finished) => Some(loaded),
            (None, DecodeEnd::Stopped) => None,
        };

        tracing::debug!(
            "Decoded {} bytes of {} (resident {}, declared {:?})",
            loaded - resident,
            path.display(),
            loaded,
            self.state.declared_size
        );
        Ok(())
    }

    fn flush_to(&mut self, target: &Path) -> Result<()> {
        let same_file = target == self.state.name.as_path();
        if same_file && !self.state.dirty {
            return Ok(());
        }

        self.load_all()?;
        let path = self.extended_name_of(target);
        self.encode_to(&path)?;

        let len = self.state.buffer.len();
        tracing::debug!("Encoded {} bytes into {}", len, path.display());
        if same_file {
            self.state.dirty = false;
            self.state.loaded_until = len;
            self.state.declared_size = Some(len);
        }
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.load_all()?;
        self.state.buffer.extend_from_slice(bytes);
        self.state.dirty = true;
        Ok(())
    }
}

impl<S: Storage> Drop for CompressedArchive<S> {
    fn drop(&mut self) {
        flush_on_drop(self);
    }
}
