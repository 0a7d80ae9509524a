use crate::error::{MapFileError, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Magic number opening every compressed container
pub const MAGIC_NUMBER: [u8; 4] = *b"MAPZ";

/// Current container format version
pub const FORMAT_VERSION: u8 = 1;

/// Size of the codec parameter block in bytes
pub const PARAMS_SIZE: usize = 8;

/// Header size in bytes: parameter block plus the declared size
pub const HEADER_SIZE: usize = PARAMS_SIZE + 8;

/// Declared size value meaning "unknown, decode until the end marker"
pub const UNKNOWN_SIZE: u64 = u64::MAX;

/// Compression codecs a container may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Codec {
    Zstd = 1,
    Lz4 = 2,
}

impl Codec {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Zstd),
            2 => Ok(Self::Lz4),
            _ => Err(MapFileError::InvalidCodec(value)),
        }
    }

    /// File extension used for containers of this codec, without the dot
    pub fn extension(self) -> &'static str {
        match self {
            Self::Zstd => "zst",
            Self::Lz4 => "lz4",
        }
    }
}

/// Fixed header at the beginning of a compressed container
///
/// Structure (16 bytes):
/// - Magic: "MAPZ" (4 bytes)
/// - Format version: uint8
/// - Codec: uint8
/// - Level: int8 (informational, the decoder does not need it)
/// - Window log: uint8 (0 = codec default)
/// - Declared uncompressed size: uint64, all 0xFF if unknown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u8,
    pub codec: Codec,
    pub level: i8,
    pub window_log: u8,
    pub declared_size: Option<u64>,
}

impl ContainerHeader {
    pub fn new(codec: Codec, level: i8, window_log: u8, declared_size: Option<u64>) -> Self {
        Self {
            version: FORMAT_VERSION,
            codec,
            level,
            window_log,
            declared_size,
        }
    }

    /// Write header to a writer
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..4].copy_from_slice(&MAGIC_NUMBER);
        bytes[4] = self.version;
        bytes[5] = self.codec as u8;
        bytes[6] = self.level as u8;
        bytes[7] = self.window_log;
        let size = self.declared_size.unwrap_or(UNKNOWN_SIZE);
        bytes[PARAMS_SIZE..].copy_from_slice(&size.to_le_bytes());
        bytes
    }

    /// Read header from a reader
    ///
    /// A short read is reported as [`MapFileError::CorruptHeader`].
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                MapFileError::CorruptHeader(format!(
                    "expected {} header bytes, file is shorter",
                    HEADER_SIZE
                ))
            } else {
                MapFileError::Io(e)
            }
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        if bytes[..4] != MAGIC_NUMBER {
            return Err(MapFileError::CorruptHeader(
                "invalid magic number".to_string(),
            ));
        }

        let version = bytes[4];
        if version > FORMAT_VERSION {
            return Err(MapFileError::UnsupportedVersion(version));
        }

        let codec = Codec::from_u8(bytes[5])?;
        let level = bytes[6] as i8;
        let window_log = bytes[7];

        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[PARAMS_SIZE..]);
        let size = u64::from_le_bytes(size);
        let declared_size = (size != UNKNOWN_SIZE).then_some(size);

        Ok(Self {
            version,
            codec,
            level,
            window_log,
            declared_size,
        })
    }
}
