//! CRC32 checksum for needle records.
//!
//! Every needle carries a checksum over its header body and payload,
//! verified on every read. Corruption is reported, never ignored.

/// Compute the CRC32 checksum of the given bytes.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Incremental CRC32 over multiple byte slices.
///
/// The needle checksum covers the header body followed by the payload;
/// this avoids concatenating them into a scratch buffer first.
pub fn compute_checksum_parts(parts: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}
