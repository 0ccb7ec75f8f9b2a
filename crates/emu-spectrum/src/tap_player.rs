//! Pulse-level playback of TAP images with ROM standard timing.
//!
//! Each block plays as: pilot tone, sync 1 (low), sync 2 (high), two pulses
//! per bit (low then high, MSB first), a low terminating sync pulse and a
//! high pause. The pilot starts high and alternates.

use std::io::Read;

use format_spectrum_tap::{TapBlock, TapFile, timing};

use crate::pulse::Pulse;
use crate::tape::{TapePlayer, TapeError};

/// Pause after each block.
const PAUSE_TACTS: u64 = timing::DEFAULT_PAUSE_MS as u64 * timing::TACTS_PER_MS as u64;

/// Position within the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pilot { remaining: u32, level: bool },
    Sync1,
    Sync2,
    Data { byte: usize, bit: u8, second_half: bool },
    TermSync,
    Pause,
}

#[derive(Debug, Clone, Default)]
pub struct TapPlayer {
    blocks: Vec<TapBlock>,
    /// Tape bytes (flag, data, checksum) of the block being played.
    current_bytes: Vec<u8>,
    block_index: usize,
    stage: Option<Stage>,
    /// EAR level of the running pulse.
    level: bool,
    /// Tact at which the running pulse ends.
    pulse_end: u64,
}

impl TapPlayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Player over already parsed blocks.
    #[must_use]
    pub fn from_tap(tap: TapFile) -> Self {
        Self {
            blocks: tap.blocks,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Index of the block being played.
    #[must_use]
    pub fn block_index(&self) -> usize {
        self.block_index
    }

    /// All blocks have been played.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.stage.is_none()
    }

    fn start_block(&mut self, index: usize) {
        self.block_index = index;
        match self.blocks.get(index) {
            Some(block) => {
                self.current_bytes = block.tape_bytes();
                self.stage = Some(Stage::Pilot {
                    remaining: timing::pilot_pulses(block.flag),
                    level: true,
                });
            }
            None => {
                self.current_bytes.clear();
                self.stage = None;
            }
        }
    }

    /// Produce the next pulse of the tape, moving through blocks.
    fn next_pulse(&mut self) -> Option<Pulse> {
        let stage = self.stage?;
        let (pulse, next) = match stage {
            Stage::Pilot { remaining, level } => {
                let next = if remaining > 1 {
                    Stage::Pilot {
                        remaining: remaining - 1,
                        level: !level,
                    }
                } else {
                    Stage::Sync1
                };
                (pulse(level, timing::PILOT_PULSE), Some(next))
            }
            Stage::Sync1 => (pulse(false, timing::SYNC1_PULSE), Some(Stage::Sync2)),
            Stage::Sync2 => (pulse(true, timing::SYNC2_PULSE), Some(self.first_data_stage())),
            Stage::Data {
                byte,
                bit,
                second_half,
            } => {
                let one = self.current_bytes[byte] & (0x80 >> bit) != 0;
                let width = if one {
                    timing::ONE_PULSE
                } else {
                    timing::ZERO_PULSE
                };
                let next = if !second_half {
                    Stage::Data {
                        byte,
                        bit,
                        second_half: true,
                    }
                } else if bit < 7 {
                    Stage::Data {
                        byte,
                        bit: bit + 1,
                        second_half: false,
                    }
                } else if byte + 1 < self.current_bytes.len() {
                    Stage::Data {
                        byte: byte + 1,
                        bit: 0,
                        second_half: false,
                    }
                } else {
                    Stage::TermSync
                };
                (pulse(second_half, width), Some(next))
            }
            Stage::TermSync => (pulse(false, timing::TERM_SYNC_PULSE), Some(Stage::Pause)),
            Stage::Pause => (
                Pulse {
                    level: true,
                    length: PAUSE_TACTS,
                },
                None,
            ),
        };

        match next {
            Some(stage) => self.stage = Some(stage),
            None => {
                log::debug!("TAP block {} played", self.block_index);
                self.start_block(self.block_index + 1);
            }
        }
        Some(pulse)
    }

    fn first_data_stage(&self) -> Stage {
        if self.current_bytes.is_empty() {
            Stage::TermSync
        } else {
            Stage::Data {
                byte: 0,
                bit: 0,
                second_half: false,
            }
        }
    }
}

fn pulse(level: bool, length: u32) -> Pulse {
    Pulse {
        level,
        length: u64::from(length),
    }
}

impl TapePlayer for TapPlayer {
    fn read_content(&mut self, reader: &mut dyn Read) -> Result<(), TapeError> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        let tap = TapFile::parse(&raw)?;
        self.blocks = tap.blocks;
        Ok(())
    }

    fn init_play(&mut self, start_tact: u64) {
        self.level = true;
        self.pulse_end = start_tact;
        self.start_block(0);
    }

    fn ear_bit(&mut self, tact: u64) -> bool {
        while tact >= self.pulse_end {
            let Some(pulse) = self.next_pulse() else {
                self.level = true;
                return true;
            };
            self.level = pulse.level;
            self.pulse_end += pulse.length;
        }
        self.level
    }
}
