mod base;
mod compressed;
mod format;
mod plain;

pub use base::{Archive, ArchiveState};
pub use compressed::CompressedArchive;
pub use format::{
    Codec, ContainerHeader, FORMAT_VERSION, HEADER_SIZE, MAGIC_NUMBER, PARAMS_SIZE, UNKNOWN_SIZE,
};
pub use plain::PlainArchive;
