//! ZX Spectrum TAP tape images.
//!
//! A TAP file is a run of blocks, each preceded by a 2-byte little-endian
//! length word. The length covers a flag byte, the data and a checksum byte
//! (XOR of flag and data).
//!
//! A saved program is normally two blocks:
//!   1. Header block (flag $00, 17 bytes of metadata)
//!   2. Data block (flag $FF, the program or bytes themselves)

use thiserror::Error;

/// ROM standard-speed pulse timings, in CPU tacts at 3.5 MHz.
pub mod timing {
    /// Pilot tone pulse.
    pub const PILOT_PULSE: u32 = 2168;

    /// Pilot pulses before a header block (flag bit 7 clear).
    pub const PILOT_HEADER_PULSES: u32 = 8063;

    /// Pilot pulses before a data block (flag bit 7 set).
    pub const PILOT_DATA_PULSES: u32 = 3223;

    pub const SYNC1_PULSE: u32 = 667;
    pub const SYNC2_PULSE: u32 = 735;

    /// Each bit is two pulses of the same length.
    pub const ZERO_PULSE: u32 = 855;
    pub const ONE_PULSE: u32 = 1710;

    /// Closing pulse after the last data bit.
    pub const TERM_SYNC_PULSE: u32 = 947;

    /// CPU tacts per millisecond at 3.5 MHz.
    pub const TACTS_PER_MS: u32 = 3500;

    /// Pause after a block when the image does not specify one.
    pub const DEFAULT_PAUSE_MS: u32 = 1000;

    /// Pilot length for a block starting with `flag`.
    #[must_use]
    pub fn pilot_pulses(flag: u8) -> u32 {
        if flag & 0x80 == 0 {
            PILOT_HEADER_PULSES
        } else {
            PILOT_DATA_PULSES
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TapError {
    #[error("truncated TAP image: expected a 2-byte length at offset {offset}")]
    TruncatedLength { offset: usize },
    #[error("TAP block at offset {offset} has length {length}, minimum is 2 (flag + checksum)")]
    BlockTooShort { offset: usize, length: usize },
    #[error("truncated TAP block at offset {offset}: need {needed} bytes, only {available} remain")]
    TruncatedBlock {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("TAP block at offset {offset}: checksum mismatch (expected ${expected:02X}, got ${found:02X})")]
    ChecksumMismatch {
        offset: usize,
        expected: u8,
        found: u8,
    },
    #[error("TAP block of {0} bytes does not fit a 16-bit length word")]
    BlockTooLong(usize),
}

/// One tape block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapBlock {
    /// $00 = header, $FF = data.
    pub flag: u8,
    /// Payload, without flag and checksum.
    pub data: Vec<u8>,
}

impl TapBlock {
    #[must_use]
    pub fn new(flag: u8, data: Vec<u8>) -> Self {
        Self { flag, data }
    }

    /// XOR of the flag and every data byte.
    #[must_use]
    pub fn checksum(&self) -> u8 {
        self.data.iter().fold(self.flag, |acc, &b| acc ^ b)
    }

    #[must_use]
    pub fn is_header(&self) -> bool {
        self.flag & 0x80 == 0
    }

    /// Bytes as they go on tape: flag, data, checksum.
    #[must_use]
    pub fn tape_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() + 2);
        bytes.push(self.flag);
        bytes.extend_from_slice(&self.data);
        bytes.push(self.checksum());
        bytes
    }

    /// Split bytes read from tape (flag, data, checksum) into a block.
    ///
    /// Returns `None` for fewer than two bytes or a bad checksum.
    #[must_use]
    pub fn from_tape_bytes(bytes: &[u8]) -> Option<Self> {
        let (&flag, rest) = bytes.split_first()?;
        let (&checksum, data) = rest.split_last()?;
        let block = Self::new(flag, data.to_vec());
        (block.checksum() == checksum).then_some(block)
    }
}

/// A parsed TAP image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapFile {
    pub blocks: Vec<TapBlock>,
}

impl TapFile {
    /// Parse a TAP image from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, TapError> {
        let mut blocks = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let Some(len_bytes) = data.get(offset..offset + 2) else {
                return Err(TapError::TruncatedLength { offset });
            };
            let length = usize::from(u16::from_le_bytes([len_bytes[0], len_bytes[1]]));
            let body_start = offset + 2;

            if length < 2 {
                return Err(TapError::BlockTooShort { offset, length });
            }
            let Some(body) = data.get(body_start..body_start + length) else {
                return Err(TapError::TruncatedBlock {
                    offset,
                    needed: length,
                    available: data.len() - body_start,
                });
            };

            let block = TapBlock::new(body[0], body[1..length - 1].to_vec());
            let found = body[length - 1];
            let expected = block.checksum();
            if expected != found {
                return Err(TapError::ChecksumMismatch {
                    offset,
                    expected,
                    found,
                });
            }

            blocks.push(block);
            offset = body_start + length;
        }

        log::debug!("Parsed TAP image: {} blocks", blocks.len());
        Ok(Self { blocks })
    }

    /// Serialise back to TAP bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TapError> {
        let mut out = Vec::new();
        for block in &self.blocks {
            let bytes = block.tape_bytes();
            let length =
                u16::try_from(bytes.len()).map_err(|_| TapError::BlockTooLong(bytes.len()))?;
            out.extend_from_slice(&length.to_le_bytes());
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }
}
