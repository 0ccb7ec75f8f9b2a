//! Decoding of ROM SAVE output from MIC pulses.
//!
//! The ROM SAVE routine writes a block as a pilot tone, two sync pulses, two
//! equal pulses per data bit (MSB first) and a closing sync pulse. The
//! decoder classifies each MIC pulse by its width and rebuilds the bytes.

use format_spectrum_tap::{TapBlock, TapError, TapFile, timing};

/// Accepted deviation from a nominal pulse width, in tacts.
pub const SAVE_PULSE_TOLERANCE: u64 = 24;

/// Pilot pulses required before a sync pulse is accepted.
pub const MIN_PILOT_PULSE_COUNT: u32 = 3000;

/// Length of a standard header block on tape: flag, 17 bytes, checksum.
const HEADER_BLOCK_LENGTH: usize = 19;

/// Width class of a single MIC pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicPulseType {
    /// Between the known widths.
    None,
    TooShort,
    TooLong,
    Pilot,
    Sync1,
    Sync2,
    Bit0,
    Bit1,
    TermSync,
}

impl MicPulseType {
    #[must_use]
    pub fn classify(length: u64) -> Self {
        let near = |nominal: u32| length.abs_diff(u64::from(nominal)) <= SAVE_PULSE_TOLERANCE;

        if near(timing::ZERO_PULSE) {
            Self::Bit0
        } else if near(timing::ONE_PULSE) {
            Self::Bit1
        } else if near(timing::PILOT_PULSE) {
            Self::Pilot
        } else if near(timing::SYNC1_PULSE) {
            Self::Sync1
        } else if near(timing::SYNC2_PULSE) {
            Self::Sync2
        } else if near(timing::TERM_SYNC_PULSE) {
            Self::TermSync
        } else if length < u64::from(timing::SYNC1_PULSE) - SAVE_PULSE_TOLERANCE {
            Self::TooShort
        } else if length > u64::from(timing::PILOT_PULSE) + 2 * SAVE_PULSE_TOLERANCE {
            Self::TooLong
        } else {
            Self::None
        }
    }
}

/// Where the decoder is within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SavePhase {
    /// Waiting for a pilot tone.
    #[default]
    None,
    Pilot,
    Sync1,
    Sync2,
    Data,
    /// An unexpected pulse arrived. Stays here until the decoder is reset.
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct SaveDecoder {
    phase: SavePhase,
    pilot_pulses: u32,
    /// First half of a bit waiting for its partner.
    half_bit: Option<MicPulseType>,
    bit_count: u8,
    byte: u8,
    data: Vec<u8>,
    blocks_completed: u32,
}

impl SaveDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn phase(&self) -> SavePhase {
        self.phase
    }

    #[must_use]
    pub fn blocks_completed(&self) -> u32 {
        self.blocks_completed
    }

    /// Feed one pulse. Returns the block's tape bytes (flag, data, checksum)
    /// when its closing sync pulse arrives.
    pub fn process_pulse(&mut self, length: u64) -> Option<Vec<u8>> {
        let pulse = MicPulseType::classify(length);
        let mut completed = None;

        let next = match (self.phase, pulse) {
            (SavePhase::None, MicPulseType::TooShort | MicPulseType::TooLong) => SavePhase::None,
            (SavePhase::None | SavePhase::Pilot, MicPulseType::Pilot) => {
                self.pilot_pulses = if self.phase == SavePhase::None {
                    1
                } else {
                    self.pilot_pulses + 1
                };
                SavePhase::Pilot
            }
            (SavePhase::Pilot, MicPulseType::Sync1)
                if self.pilot_pulses >= MIN_PILOT_PULSE_COUNT =>
            {
                SavePhase::Sync1
            }
            (SavePhase::Sync1, MicPulseType::Sync2) => SavePhase::Sync2,
            (SavePhase::Sync2, MicPulseType::Bit0 | MicPulseType::Bit1) => {
                self.half_bit = Some(pulse);
                self.bit_count = 0;
                self.byte = 0;
                self.data.clear();
                SavePhase::Data
            }
            (SavePhase::Data, MicPulseType::Bit0 | MicPulseType::Bit1) => match self.half_bit {
                None => {
                    self.half_bit = Some(pulse);
                    SavePhase::Data
                }
                Some(first) if first == pulse => {
                    self.half_bit = None;
                    self.push_bit(pulse == MicPulseType::Bit1);
                    SavePhase::Data
                }
                Some(_) => SavePhase::Error,
            },
            (SavePhase::Data, MicPulseType::TermSync) => {
                self.blocks_completed += 1;
                completed = Some(std::mem::take(&mut self.data));
                SavePhase::None
            }
            _ => SavePhase::Error,
        };

        if next == SavePhase::Error && self.phase != SavePhase::Error {
            log::debug!("SAVE decoding failed: {pulse:?} pulse in {:?} phase", self.phase);
        }
        self.phase = next;
        completed
    }

    fn push_bit(&mut self, one: bool) {
        self.byte = (self.byte << 1) | u8::from(one);
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.data.push(self.byte);
            self.byte = 0;
            self.bit_count = 0;
        }
    }
}

/// File name stored in a standard header block, if `bytes` is one.
#[must_use]
pub fn header_name(bytes: &[u8]) -> Option<String> {
    if bytes.len() != HEADER_BLOCK_LENGTH || bytes[0] != 0x00 {
        return None;
    }
    let name: String = bytes[2..12].iter().map(|&b| char::from(b)).collect();
    Some(name.trim_end().to_string())
}

/// Receiver of decoded SAVE output.
pub trait TapeSaveSink {
    /// Save mode was entered.
    fn create_tape_file(&mut self) {}

    /// Name taken from the first header block.
    fn set_name(&mut self, _name: &str) {}

    /// A complete block as it went to tape: flag, data, checksum.
    fn save_block(&mut self, _bytes: &[u8]) {}

    /// Save mode was left.
    fn finalize_tape_file(&mut self) {}
}

/// Sink that drops everything saved.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSaveSink;

impl TapeSaveSink for NoSaveSink {}

impl<S: TapeSaveSink + ?Sized> TapeSaveSink for Box<S> {
    fn create_tape_file(&mut self) {
        (**self).create_tape_file();
    }

    fn set_name(&mut self, name: &str) {
        (**self).set_name(name);
    }

    fn save_block(&mut self, bytes: &[u8]) {
        (**self).save_block(bytes);
    }

    fn finalize_tape_file(&mut self) {
        (**self).finalize_tape_file();
    }
}

/// Collects saved blocks into a TAP image.
#[derive(Debug, Clone, Default)]
pub struct TapRecorder {
    name: Option<String>,
    blocks: Vec<Vec<u8>>,
    files_finalized: u32,
}

impl TapRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn files_finalized(&self) -> u32 {
        self.files_finalized
    }

    /// The recorded blocks as TAP bytes, length words included. Fails if a
    /// block does not fit a 16-bit length word.
    pub fn to_tap_bytes(&self) -> Result<Vec<u8>, TapError> {
        let mut out = Vec::new();
        for block in &self.blocks {
            let length =
                u16::try_from(block.len()).map_err(|_| TapError::BlockTooLong(block.len()))?;
            out.extend_from_slice(&length.to_le_bytes());
            out.extend_from_slice(block);
        }
        Ok(out)
    }

    /// The recorded blocks as a parsed TAP image. Fails if a block was
    /// saved with a bad checksum or is too long for the format.
    pub fn tap_file(&self) -> Result<TapFile, TapError> {
        TapFile::parse(&self.to_tap_bytes()?)
    }

    /// Blocks that decode cleanly.
    pub fn blocks(&self) -> impl Iterator<Item = TapBlock> + '_ {
        self.blocks.iter().filter_map(|b| TapBlock::from_tape_bytes(b))
    }
}

impl TapeSaveSink for TapRecorder {
    fn create_tape_file(&mut self) {
        self.name = None;
        self.blocks.clear();
    }

    fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    fn save_block(&mut self, bytes: &[u8]) {
        self.blocks.push(bytes.to_vec());
    }

    fn finalize_tape_file(&mut self) {
        self.files_finalized += 1;
    }
}
