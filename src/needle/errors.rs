//! Needle codec error types.

use thiserror::Error;

/// Result type for needle codec operations
pub type NeedleResult<T> = Result<T, NeedleError>;

/// Errors produced while encoding or decoding a needle record.
///
/// `Truncated`, `BadHeaderMagic` and `InvalidSize` mean the record header
/// itself cannot be trusted: nothing past the failing offset is decodable.
/// `ChecksumMismatch` and `BadFooterMagic` mean the header was sound but the
/// record body is corrupt; the record's on-disk length is still known.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NeedleError {
    #[error("truncated record: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("bad header magic: {0:#010x}")]
    BadHeaderMagic(u32),

    #[error("bad footer magic: {0:#010x}")]
    BadFooterMagic(u32),

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("record size {0} exceeds maximum payload size")]
    InvalidSize(u32),

    #[error("unknown needle flag: {0}")]
    InvalidFlag(u8),
}

impl NeedleError {
    /// Whether the failing record still has a trustworthy on-disk length.
    ///
    /// Compaction replay skips past such records; everything else ends the
    /// scan, since no later offset can be computed.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            NeedleError::ChecksumMismatch { .. } | NeedleError::BadFooterMagic(_)
        )
    }
}
