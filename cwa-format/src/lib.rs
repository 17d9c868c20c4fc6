//! The AX3 `.CWA` on-disk format: a single `MD` header sector followed by
//! a stream of 512-byte `AX` data sectors, little-endian throughout.

pub type CwaResult<M> = std::result::Result<M, CwaError>;

#[derive(thiserror::Error, Debug)]
pub enum CwaError {
    #[error("sector truncated at {0} bytes")]
    TruncatedSector(usize),

    #[error("{0}")]
    InvalidTimestamp(cwa_time::TimeError),

    #[error("{0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for CwaError {
    fn from(orig: std::io::Error) -> CwaError {
        CwaError::Io(orig)
    }
}

impl From<cwa_time::TimeError> for CwaError {
    fn from(orig: cwa_time::TimeError) -> CwaError {
        CwaError::InvalidTimestamp(orig)
    }
}

/// Every CWA sector is exactly this long.
pub const SECTOR_LEN: usize = 512;

/// Offset of the first packed sample within a data sector.
pub const PAYLOAD_OFFSET: usize = 30;

/// Usable payload bytes per data sector; bounds the sample count.
pub const PAYLOAD_LEN: usize = 480;

/// Sector classification from the two-byte tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorKind {
    /// `MD`: the single file header sector.
    Header,
    /// `AX`: a data sector of packed samples.
    Data,
    /// Anything else; skipped by readers.
    Other,
}

pub fn sector_kind(buf: &[u8]) -> SectorKind {
    match buf.get(0..2) {
        Some(tag) if tag == b"MD" => SectorKind::Header,
        Some(tag) if tag == b"AX" => SectorKind::Data,
        _ => SectorKind::Other,
    }
}

mod block;
pub use crate::block::{
    logging_start_time, read_packed_xyz, read_raw_xyz16, DataBlock, SampleEncoding,
};

mod reader;
pub use crate::reader::SectorReader;
