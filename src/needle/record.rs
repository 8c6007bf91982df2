//! Needle record types and binary codec.
//!
//! On-disk layout of a single needle record:
//!
//! ```text
//! +------------------+
//! | Header Magic     | (4 bytes)
//! +------------------+
//! | Key              | (u64 LE)
//! +------------------+
//! | Cookie           | (u32 LE)
//! +------------------+
//! | Flag             | (u8: 0 = normal, 1 = deleted)
//! +------------------+
//! | Size             | (u32 LE, payload length)
//! +------------------+
//! | Payload          | (size bytes)
//! +------------------+
//! | Footer Magic     | (4 bytes)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! | Padding          | (zeroes up to an 8-byte boundary)
//! +------------------+
//! ```
//!
//! The checksum covers key, cookie, flag, size and payload. Records are
//! padded so that every offset inside a container is 8-byte aligned.

use super::checksum::compute_checksum_parts;
use super::errors::{NeedleError, NeedleResult};

/// Magic bytes opening every needle record.
pub const HEADER_MAGIC: [u8; 4] = [0x4e, 0x44, 0x4c, 0x31]; // "NDL1"
/// Magic bytes closing every needle record, before the checksum.
pub const FOOTER_MAGIC: [u8; 4] = [0x31, 0x4c, 0x44, 0x4e]; // "1LDN"

/// Header: magic (4) + key (8) + cookie (4) + flag (1) + size (4)
pub const HEADER_SIZE: usize = 21;
/// Footer: magic (4) + checksum (4)
pub const FOOTER_SIZE: usize = 8;
/// Records are zero-padded to this alignment.
pub const PADDING_ALIGN: usize = 8;
/// Upper bound on payload size; a decoded size above this is corruption.
pub const MAX_DATA_SIZE: u32 = 64 * 1024 * 1024;

/// Liveness flag stored inside every needle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// Live record
    Normal,
    /// Tombstone marking the key as deleted
    Deleted,
}

impl Flag {
    pub fn as_byte(self) -> u8 {
        match self {
            Flag::Normal => 0,
            Flag::Deleted => 1,
        }
    }

    pub fn from_byte(b: u8) -> NeedleResult<Self> {
        match b {
            0 => Ok(Flag::Normal),
            1 => Ok(Flag::Deleted),
            other => Err(NeedleError::InvalidFlag(other)),
        }
    }
}

/// One stored object record.
///
/// `key` is the primary identifier, unique within a volume; `cookie` is a
/// caller-chosen secondary value guarding against key enumeration. The
/// buffer in `data` is reused across reads when the needle comes from the
/// pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Needle {
    pub key: u64,
    pub cookie: u32,
    pub flag: Flag,
    pub data: Vec<u8>,
}

impl Default for Needle {
    fn default() -> Self {
        Self {
            key: 0,
            cookie: 0,
            flag: Flag::Normal,
            data: Vec::new(),
        }
    }
}

impl Needle {
    /// Create a live needle with the given key, cookie and payload.
    pub fn new(key: u64, cookie: u32, data: Vec<u8>) -> Self {
        Self {
            key,
            cookie,
            flag: Flag::Normal,
            data,
        }
    }

    /// Create a tombstone record for `key`.
    pub fn tombstone(key: u64) -> Self {
        Self {
            key,
            cookie: 0,
            flag: Flag::Deleted,
            data: Vec::new(),
        }
    }

    /// Payload length in bytes.
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Reset to a zeroed record, keeping the payload buffer's capacity.
    pub fn reset(&mut self) {
        self.key = 0;
        self.cookie = 0;
        self.flag = Flag::Normal;
        self.data.clear();
    }

    /// Total on-disk length of a record carrying `size` payload bytes.
    pub fn encoded_len(size: u32) -> usize {
        let raw = HEADER_SIZE + size as usize + FOOTER_SIZE;
        (raw + PADDING_ALIGN - 1) / PADDING_ALIGN * PADDING_ALIGN
    }

    /// Serialize the record, including checksum and padding.
    pub fn encode(&self) -> Vec<u8> {
        let total = Self::encoded_len(self.size());
        let mut buf = Vec::with_capacity(total);

        buf.extend_from_slice(&HEADER_MAGIC);
        buf.extend_from_slice(&self.key.to_le_bytes());
        buf.extend_from_slice(&self.cookie.to_le_bytes());
        buf.push(self.flag.as_byte());
        buf.extend_from_slice(&self.size().to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&FOOTER_MAGIC);

        // Checksum covers everything between the magics: the header body
        // and the payload.
        let checksum = compute_checksum_parts(&[&buf[4..HEADER_SIZE], &self.data]);
        buf.extend_from_slice(&checksum.to_le_bytes());

        buf.resize(total, 0);
        buf
    }

    /// Decode a record from the front of `buf`, verifying magics and
    /// checksum. Returns the record and the number of bytes consumed
    /// (including padding).
    pub fn decode(buf: &[u8]) -> NeedleResult<(Self, usize)> {
        let mut needle = Needle::default();
        let consumed = needle.decode_into(buf)?;
        Ok((needle, consumed))
    }

    /// Decode into an existing record, reusing its payload buffer.
    ///
    /// The header fields are validated before the size is trusted: a record
    /// with a corrupt length never causes a read past the real record.
    pub fn decode_into(&mut self, buf: &[u8]) -> NeedleResult<usize> {
        let total = Self::frame_len(buf)?;
        if buf.len() < total {
            return Err(NeedleError::Truncated {
                need: total,
                have: buf.len(),
            });
        }

        let size = u32::from_le_bytes([buf[17], buf[18], buf[19], buf[20]]) as usize;
        let data = &buf[HEADER_SIZE..HEADER_SIZE + size];
        let footer = &buf[HEADER_SIZE + size..HEADER_SIZE + size + FOOTER_SIZE];

        if footer[..4] != FOOTER_MAGIC {
            return Err(NeedleError::BadFooterMagic(u32::from_le_bytes([
                footer[0], footer[1], footer[2], footer[3],
            ])));
        }

        let stored = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]);
        let computed = compute_checksum_parts(&[&buf[4..HEADER_SIZE], data]);
        if stored != computed {
            return Err(NeedleError::ChecksumMismatch { stored, computed });
        }

        self.key = u64::from_le_bytes([
            buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
        ]);
        self.cookie = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        self.flag = Flag::from_byte(buf[16])?;
        self.data.clear();
        self.data.extend_from_slice(data);

        Ok(total)
    }

    /// Parse only the record header and return the full frame length.
    ///
    /// Used by compaction replay to skip past a record whose body failed
    /// verification but whose header is sound.
    pub fn frame_len(buf: &[u8]) -> NeedleResult<usize> {
        if buf.len() < HEADER_SIZE {
            return Err(NeedleError::Truncated {
                need: HEADER_SIZE,
                have: buf.len(),
            });
        }
        if buf[..4] != HEADER_MAGIC {
            return Err(NeedleError::BadHeaderMagic(u32::from_le_bytes([
                buf[0], buf[1], buf[2], buf[3],
            ])));
        }
        let size = u32::from_le_bytes([buf[17], buf[18], buf[19], buf[20]]);
        if size > MAX_DATA_SIZE {
            return Err(NeedleError::InvalidSize(size));
        }
        Ok(Self::encoded_len(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_needle() -> Needle {
        Needle::new(1001, 0xdead_beef, b"hello".to_vec())
    }

    #[test]
    fn test_roundtrip() {
        let needle = sample_needle();
        let encoded = needle.encode();
        let (decoded, consumed) = Needle::decode(&encoded).unwrap();

        assert_eq!(decoded, needle);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_encoded_len_is_aligned() {
        for size in [0u32, 1, 7, 8, 100, 4096] {
            assert_eq!(Needle::encoded_len(size) % PADDING_ALIGN, 0);
        }
    }

    #[test]
    fn test_tombstone_roundtrip() {
        let needle = Needle::tombstone(42);
        let encoded = needle.encode();
        let (decoded, _) = Needle::decode(&encoded).unwrap();

        assert_eq!(decoded.flag, Flag::Deleted);
        assert_eq!(decoded.key, 42);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn test_every_payload_byte_is_covered() {
        let needle = sample_needle();
        let encoded = needle.encode();

        for i in HEADER_SIZE..HEADER_SIZE + needle.data.len() {
            let mut corrupt = encoded.clone();
            corrupt[i] ^= 0xff;
            let err = Needle::decode(&corrupt).unwrap_err();
            assert!(
                matches!(err, NeedleError::ChecksumMismatch { .. }),
                "byte {} not covered: {:?}",
                i,
                err
            );
        }
    }

    #[test]
    fn test_header_fields_are_covered() {
        let needle = sample_needle();
        let encoded = needle.encode();

        // Flip one bit of the key; corrupting the size field instead would
        // surface as a truncated or misaligned frame, which is also an error.
        let mut corrupt = encoded.clone();
        corrupt[4] ^= 0x01;
        assert!(Needle::decode(&corrupt).is_err());
    }

    #[test]
    fn test_truncated_record() {
        let encoded = sample_needle().encode();
        let err = Needle::decode(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(matches!(err, NeedleError::Truncated { .. }));

        let err = Needle::decode(&encoded[..HEADER_SIZE - 1]).unwrap_err();
        assert!(matches!(err, NeedleError::Truncated { .. }));
    }

    #[test]
    fn test_bad_header_magic() {
        let mut encoded = sample_needle().encode();
        encoded[0] = 0;
        let err = Needle::decode(&encoded).unwrap_err();
        assert!(matches!(err, NeedleError::BadHeaderMagic(_)));
    }

    #[test]
    fn test_corrupt_size_is_not_trusted() {
        let mut encoded = sample_needle().encode();
        // Blow the size field past MAX_DATA_SIZE.
        encoded[17..21].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = Needle::decode(&encoded).unwrap_err();
        assert_eq!(err, NeedleError::InvalidSize(u32::MAX));
    }

    #[test]
    fn test_decode_into_reuses_buffer() {
        let first = Needle::new(1, 1, vec![0xaa; 256]);
        let second = Needle::new(2, 2, b"tiny".to_vec());

        let mut target = Needle::default();
        target.decode_into(&first.encode()).unwrap();
        let cap = target.data.capacity();
        target.decode_into(&second.encode()).unwrap();

        assert_eq!(target, second);
        assert!(target.data.capacity() >= cap);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let needle = sample_needle();
        let mut encoded = needle.encode();
        let frame = encoded.len();
        encoded.extend_from_slice(&[0xcc; 64]);

        let (decoded, consumed) = Needle::decode(&encoded).unwrap();
        assert_eq!(decoded, needle);
        assert_eq!(consumed, frame);
    }
}
