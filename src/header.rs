use crate::{Error, Result};

pub const HEADER_SIZE: usize = 32;

/// Largest payload a single record may carry.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub length: u32,
    pub checksum: u32,
    pub timestamp_ns: i64,
    pub seq: u64,
    pub flags: u8,
    pub _reserved: [u8; 7],
}

impl RecordHeader {
    pub fn new(length: u32, timestamp_ns: i64, seq: u64, checksum: u32) -> Self {
        Self {
            length,
            checksum,
            timestamp_ns,
            seq,
            flags: 0,
            _reserved: [0u8; 7],
        }
    }

    /// Header for `payload`, with the checksum filled in.
    pub fn for_payload(payload: &[u8], timestamp_ns: i64, seq: u64) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge);
        }
        Ok(Self::new(
            payload.len() as u32,
            timestamp_ns,
            seq,
            Self::crc32(payload),
        ))
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        buf[16..24].copy_from_slice(&self.seq.to_le_bytes());
        buf[24] = self.flags;
        buf[25..32].copy_from_slice(&self._reserved);
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let length = u32::from_le_bytes(read_array(bytes, 0)?);
        let checksum = u32::from_le_bytes(read_array(bytes, 4)?);
        let timestamp_ns = i64::from_le_bytes(read_array(bytes, 8)?);
        let seq = u64::from_le_bytes(read_array(bytes, 16)?);
        let flags = bytes[24];
        let _reserved: [u8; 7] = read_array(bytes, 25)?;
        if length as usize > MAX_PAYLOAD_LEN {
            return Err(Error::Corrupt("record length exceeds maximum"));
        }
        Ok(Self {
            length,
            checksum,
            timestamp_ns,
            seq,
            flags,
            _reserved,
        })
    }

    /// Total bytes occupied by header and payload.
    pub fn record_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }

    pub fn crc32(payload: &[u8]) -> u32 {
        use crc32fast::Hasher;
        let mut hasher = Hasher::new();
        hasher.update(payload);
        hasher.finalize()
    }

    pub fn validate_crc(&self, payload: &[u8]) -> Result<()> {
        let expected = Self::crc32(payload);
        if expected == self.checksum {
            Ok(())
        } else {
            Err(Error::Corrupt("crc mismatch"))
        }
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N]> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(Error::Corrupt("header slice out of bounds"))
}
