//! Cassette interface: LOAD playback and SAVE capture.
//!
//! The device idles in [`TapeMode::Passive`]. It switches mode when the CPU
//! reaches known ROM routines: the SAVE entry point starts MIC capture, the
//! LOAD entry point starts playing tape content into the EAR line. The
//! addresses come from [`TapeConfig`] since they differ between ROMs.
//!
//! Detection is address based. A program that drives the tape port from its
//! own routines is not noticed.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

use emu_core::{CpuState, Observable, Value};
use format_spectrum_tap::TapError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::AudioSink;
use crate::beeper::BeeperDevice;
use crate::pulse::{MicBitPulse, PulseRecorder};
use crate::save::{NoSaveSink, SaveDecoder, SavePhase, TapeSaveSink, header_name};
use crate::tap_player::TapPlayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TapeMode {
    #[default]
    Passive,
    Save,
    Load,
}

impl TapeMode {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Passive => "Passive",
            Self::Save => "Save",
            Self::Load => "Load",
        }
    }
}

/// ROM entry points and timeouts that drive mode changes.
///
/// Defaults are for the Sinclair 48K ROM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapeConfig {
    /// SA-BYTES.
    pub save_bytes_address: u16,
    /// LD-BYTES, after the border and EAR setup.
    pub load_start_address: u16,
    /// RST 08 error restart.
    pub error_address: u16,
    /// Tacts without a MIC change after which SAVE is considered finished.
    pub save_silence_tacts: u64,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            save_bytes_address: 0x04C2,
            load_start_address: 0x056C,
            error_address: 0x0008,
            save_silence_tacts: 17_500_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum TapeError {
    #[error("cannot read tape content: {0}")]
    Io(#[from] io::Error),
    #[error("tape content is not a valid image: {0}")]
    Format(#[from] TapError),
}

/// Source of the bytes on the tape.
pub trait TapeContentProvider {
    /// Stream over the whole tape content, from the start.
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>>;

    /// Rewind; the next `open` starts over.
    fn reset(&mut self);
}

impl<C: TapeContentProvider + ?Sized> TapeContentProvider for Box<C> {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        (**self).open()
    }

    fn reset(&mut self) {
        (**self).reset();
    }
}

/// No tape in the deck: empty content.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTape;

impl TapeContentProvider for NoTape {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(io::empty()))
    }

    fn reset(&mut self) {}
}

/// Tape content held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTape {
    data: Vec<u8>,
}

impl MemoryTape {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl TapeContentProvider for MemoryTape {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(Cursor::new(self.data.as_slice())))
    }

    fn reset(&mut self) {}
}

/// Tape content read from a file each time LOAD starts.
#[derive(Debug, Clone)]
pub struct FileTape {
    path: PathBuf,
}

impl FileTape {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TapeContentProvider for FileTape {
    fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn reset(&mut self) {}
}

/// Turns tape content into an EAR signal.
pub trait TapePlayer {
    /// Load and parse the whole content.
    fn read_content(&mut self, reader: &mut dyn Read) -> Result<(), TapeError>;

    /// Start playback at CPU tact `start_tact`.
    fn init_play(&mut self, start_tact: u64);

    /// EAR level at CPU tact `tact`. Tacts must not go backwards.
    fn ear_bit(&mut self, tact: u64) -> bool;
}

pub struct TapeDevice<C = NoTape, P = TapPlayer, S = NoSaveSink>
where
    C: TapeContentProvider,
    P: TapePlayer + Default,
    S: TapeSaveSink,
{
    config: TapeConfig,
    mode: TapeMode,
    content: C,
    player: Option<P>,
    mic: PulseRecorder,
    save_start: u64,
    decoder: SaveDecoder,
    save_sink: S,
}

impl<C, P, S> TapeDevice<C, P, S>
where
    C: TapeContentProvider,
    P: TapePlayer + Default,
    S: TapeSaveSink,
{
    #[must_use]
    pub fn new(config: TapeConfig, content: C, save_sink: S) -> Self {
        Self {
            config,
            mode: TapeMode::Passive,
            content,
            player: None,
            mic: PulseRecorder::new(true),
            save_start: 0,
            decoder: SaveDecoder::new(),
            save_sink,
        }
    }

    /// Back to Passive with the tape rewound.
    pub fn reset(&mut self) {
        self.content.reset();
        self.player = None;
        self.mode = TapeMode::Passive;
        self.mic.reset(0, true);
        self.decoder.reset();
    }

    /// Run whichever trigger applies to the current mode. Returns `true` if
    /// the mode changed.
    pub fn set_tape_mode(&mut self, cpu: &impl CpuState) -> bool {
        match self.mode {
            TapeMode::Passive => self.trigger_load_mode(cpu) || self.trigger_save_mode(cpu),
            TapeMode::Save | TapeMode::Load => self.trigger_passive_mode(cpu),
        }
    }

    /// Enter Save if passive and the CPU is at the SAVE entry point.
    pub fn trigger_save_mode(&mut self, cpu: &impl CpuState) -> bool {
        if self.mode != TapeMode::Passive || cpu.pc() != self.config.save_bytes_address {
            return false;
        }
        self.enter_save_mode(cpu.tacts());
        true
    }

    /// Enter Load if passive and the CPU is at the LOAD entry point.
    pub fn trigger_load_mode(&mut self, cpu: &impl CpuState) -> bool {
        if self.mode != TapeMode::Passive || cpu.pc() != self.config.load_start_address {
            return false;
        }
        self.enter_load_mode(cpu.tacts());
        true
    }

    /// Return to Passive when the active mode is over: the CPU hit the error
    /// restart, or (in Save) the MIC line has been quiet for too long.
    pub fn trigger_passive_mode(&mut self, cpu: &impl CpuState) -> bool {
        let at_error = cpu.pc() == self.config.error_address;
        match self.mode {
            TapeMode::Passive => false,
            TapeMode::Save => {
                let silence = cpu.tacts().saturating_sub(self.mic.last_transition());
                if at_error || silence > self.config.save_silence_tacts {
                    self.leave_save_mode();
                    true
                } else {
                    false
                }
            }
            TapeMode::Load => {
                if at_error {
                    self.leave_load_mode();
                }
                at_error
            }
        }
    }

    pub fn enter_save_mode(&mut self, tacts: u64) {
        self.mode = TapeMode::Save;
        self.mic.reset(tacts, true);
        self.save_start = tacts;
        self.decoder.reset();
        self.save_sink.create_tape_file();
        log::debug!("Tape: entered Save mode at tact {tacts}");
    }

    pub fn leave_save_mode(&mut self) {
        self.mode = TapeMode::Passive;
        self.save_sink.finalize_tape_file();
        log::debug!(
            "Tape: left Save mode, {} blocks saved",
            self.decoder.blocks_completed()
        );
    }

    /// Enter Load and start playing the tape content from `tacts`.
    ///
    /// Content that cannot be read leaves the device in Load with no signal.
    pub fn enter_load_mode(&mut self, tacts: u64) {
        self.mode = TapeMode::Load;
        self.player = match self.open_player(tacts) {
            Ok(player) => Some(player),
            Err(err) => {
                log::warn!("Tape: cannot play content, EAR stays high: {err}");
                None
            }
        };
        log::debug!("Tape: entered Load mode at tact {tacts}");
    }

    fn open_player(&mut self, tacts: u64) -> Result<P, TapeError> {
        let mut player = P::default();
        let mut reader = self.content.open()?;
        player.read_content(&mut reader)?;
        player.init_play(tacts);
        Ok(player)
    }

    pub fn leave_load_mode(&mut self) {
        self.mode = TapeMode::Passive;
        self.player = None;
        self.content.reset();
        log::debug!("Tape: left Load mode");
    }

    /// EAR bit seen by the CPU reading port $FE.
    ///
    /// Outside Load this is always high. In Load the played bit is also fed to
    /// the beeper at `frame_tact` so loading is audible.
    pub fn ear_bit<A: AudioSink>(
        &mut self,
        cpu_tacts: u64,
        frame_tact: u32,
        beeper: &mut BeeperDevice<A>,
    ) -> bool {
        if self.mode != TapeMode::Load {
            return true;
        }
        let bit = self
            .player
            .as_mut()
            .is_none_or(|player| player.ear_bit(cpu_tacts));
        beeper.process_tape_ear_bit(frame_tact, bit);
        bit
    }

    /// MIC bit written by the CPU. Recorded and decoded only in Save.
    pub fn process_mic_bit_value(&mut self, cpu_tacts: u64, bit: bool) {
        if self.mode != TapeMode::Save {
            return;
        }
        let Some(pulse) = self.mic.record(cpu_tacts, bit) else {
            return;
        };
        if let Some(bytes) = self.decoder.process_pulse(pulse.length) {
            if self.decoder.blocks_completed() == 1 {
                if let Some(name) = header_name(&bytes) {
                    self.save_sink.set_name(&name);
                }
            }
            log::debug!("Tape: saved block of {} bytes", bytes.len());
            self.save_sink.save_block(&bytes);
        }
    }

    #[must_use]
    pub fn mode(&self) -> TapeMode {
        self.mode
    }

    #[must_use]
    pub fn config(&self) -> &TapeConfig {
        &self.config
    }

    /// MIC pulses recorded since Save was entered.
    #[must_use]
    pub fn mic_pulses(&self) -> &[MicBitPulse] {
        self.mic.pulses()
    }

    #[must_use]
    pub fn mic_bit(&self) -> bool {
        self.mic.level()
    }

    #[must_use]
    pub fn last_mic_bit_activity(&self) -> u64 {
        self.mic.last_transition()
    }

    #[must_use]
    pub fn save_start_tact(&self) -> u64 {
        self.save_start
    }

    #[must_use]
    pub fn save_phase(&self) -> SavePhase {
        self.decoder.phase()
    }

    #[must_use]
    pub fn player(&self) -> Option<&P> {
        self.player.as_ref()
    }

    #[must_use]
    pub fn save_sink(&self) -> &S {
        &self.save_sink
    }

    pub fn content_mut(&mut self) -> &mut C {
        &mut self.content
    }
}

impl<C, P, S> Observable for TapeDevice<C, P, S>
where
    C: TapeContentProvider,
    P: TapePlayer + Default,
    S: TapeSaveSink,
{
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "mode" => Some(self.mode.name().into()),
            "mic_bit" => Some(self.mic.level().into()),
            "mic_pulse_count" => Some((self.mic.pulses().len() as u64).into()),
            "last_mic_activity" => Some(self.mic.last_transition().into()),
            "save_start" => Some(self.save_start.into()),
            "blocks_saved" => Some(self.decoder.blocks_completed().into()),
            "playing" => Some(self.player.is_some().into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "mode",
            "mic_bit",
            "mic_pulse_count",
            "last_mic_activity",
            "save_start",
            "blocks_saved",
            "playing",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NoAudio;
    use crate::pulse::Pulse;
    use crate::save::TapRecorder;
    use format_spectrum_tap::{TapBlock, TapFile, timing};
    use std::cell::Cell;
    use std::rc::Rc;
    use test_log::test;

    struct Cpu {
        tacts: u64,
        pc: u16,
    }

    fn cpu(tacts: u64, pc: u16) -> Cpu {
        Cpu { tacts, pc }
    }

    impl CpuState for Cpu {
        fn tacts(&self) -> u64 {
            self.tacts
        }

        fn pc(&self) -> u16 {
            self.pc
        }
    }

    /// In-memory tape that counts opens and rewinds.
    struct CountingTape {
        data: Vec<u8>,
        opens: Rc<Cell<u32>>,
        resets: Rc<Cell<u32>>,
    }

    impl TapeContentProvider for CountingTape {
        fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
            self.opens.set(self.opens.get() + 1);
            Ok(Box::new(self.data.as_slice()))
        }

        fn reset(&mut self) {
            self.resets.set(self.resets.get() + 1);
        }
    }

    struct BrokenTape;

    impl TapeContentProvider for BrokenTape {
        fn open(&mut self) -> io::Result<Box<dyn Read + '_>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no tape"))
        }

        fn reset(&mut self) {}
    }

    fn tap_bytes() -> Vec<u8> {
        TapFile {
            blocks: vec![TapBlock::new(0xFF, vec![0x42])],
        }
        .to_bytes()
        .expect("small block")
    }

    fn save_device() -> TapeDevice<NoTape, TapPlayer, TapRecorder> {
        TapeDevice::new(TapeConfig::default(), NoTape, TapRecorder::new())
    }

    #[test]
    fn save_entry_point_enters_save() {
        let mut tape = save_device();
        assert!(!tape.trigger_save_mode(&cpu(100, 0x1234)));
        assert_eq!(tape.mode(), TapeMode::Passive);

        assert!(tape.trigger_save_mode(&cpu(100, 0x04C2)));
        assert_eq!(tape.mode(), TapeMode::Save);
        assert_eq!(tape.save_start_tact(), 100);
        assert_eq!(tape.last_mic_bit_activity(), 100);
        assert!(tape.mic_bit());
        assert_eq!(tape.save_sink().files_finalized(), 0);
    }

    #[test]
    fn save_ends_after_silence() {
        let mut tape = save_device();
        let start = 1_000;
        tape.enter_save_mode(start);
        tape.process_mic_bit_value(start, false);
        tape.process_mic_bit_value(start + 50, true);
        assert_eq!(
            tape.mic_pulses(),
            [Pulse {
                level: false,
                length: 50
            }]
        );

        let quiet = start + 50 + 17_500_000;
        assert!(!tape.trigger_passive_mode(&cpu(quiet, 0x1234)));
        assert_eq!(tape.mode(), TapeMode::Save);

        assert!(tape.trigger_passive_mode(&cpu(start + 50 + 20_000_000, 0x1234)));
        assert_eq!(tape.mode(), TapeMode::Passive);
        assert_eq!(tape.save_sink().files_finalized(), 1);
    }

    #[test]
    fn save_ends_at_error_restart() {
        let mut tape = save_device();
        tape.enter_save_mode(0);
        assert!(tape.set_tape_mode(&cpu(10, 0x0008)));
        assert_eq!(tape.mode(), TapeMode::Passive);
    }

    #[test]
    fn triggers_only_act_from_passive() {
        let mut tape = save_device();
        tape.enter_load_mode(0);
        assert!(!tape.trigger_save_mode(&cpu(10, 0x04C2)));
        assert_eq!(tape.mode(), TapeMode::Load);
    }

    #[test]
    fn mic_ignored_outside_save() {
        let mut tape = save_device();
        tape.process_mic_bit_value(100, false);
        assert!(tape.mic_pulses().is_empty());
        assert!(tape.mic_bit());
    }

    #[test]
    fn save_mode_decodes_blocks() {
        let mut tape = save_device();
        tape.enter_save_mode(0);

        let bytes = TapBlock::new(0xFF, vec![0x81]).tape_bytes();
        let mut widths = vec![timing::PILOT_PULSE; 3223];
        widths.extend([timing::SYNC1_PULSE, timing::SYNC2_PULSE]);
        for &byte in &bytes {
            for bit in (0..8).rev() {
                let w = if byte >> bit & 1 == 1 {
                    timing::ONE_PULSE
                } else {
                    timing::ZERO_PULSE
                };
                widths.extend([w, w]);
            }
        }
        widths.push(timing::TERM_SYNC_PULSE);

        // A long first pulse, then the block.
        let mut tact = 10_000;
        let mut level = false;
        tape.process_mic_bit_value(tact, level);
        for w in widths {
            tact += u64::from(w);
            level = !level;
            tape.process_mic_bit_value(tact, level);
        }

        assert_eq!(tape.save_phase(), SavePhase::None);
        assert_eq!(tape.query("blocks_saved"), Some(Value::U32(1)));
        let saved: Vec<_> = tape.save_sink().blocks().collect();
        assert_eq!(saved, [TapBlock::new(0xFF, vec![0x81])]);
    }

    #[test]
    fn load_plays_content_and_feeds_beeper() {
        let opens = Rc::new(Cell::new(0));
        let resets = Rc::new(Cell::new(0));
        let content = CountingTape {
            data: tap_bytes(),
            opens: Rc::clone(&opens),
            resets: Rc::clone(&resets),
        };
        let mut tape: TapeDevice<_> = TapeDevice::new(TapeConfig::default(), content, NoSaveSink);
        let mut beeper = BeeperDevice::new(69_888, NoAudio);

        assert!(tape.ear_bit(0, 0, &mut beeper));
        assert!(tape.set_tape_mode(&cpu(5_000, 0x056C)));
        assert_eq!(tape.mode(), TapeMode::Load);
        assert_eq!(opens.get(), 1);
        assert!(tape.player().is_some());

        // First pilot pulse is high, the second low.
        assert!(tape.ear_bit(5_000, 100, &mut beeper));
        assert!(!tape.ear_bit(5_000 + 2_168, 2_268, &mut beeper));
        assert_eq!(beeper.pulses().len(), 1);
        assert!(!beeper.last_ear_bit());

        // PC wandering elsewhere does not end Load.
        assert!(!tape.set_tape_mode(&cpu(6_000, 0x04C2)));
        assert_eq!(tape.mode(), TapeMode::Load);

        tape.leave_load_mode();
        assert_eq!(tape.mode(), TapeMode::Passive);
        assert!(tape.player().is_none());
        assert_eq!(resets.get(), 1);
    }

    #[test]
    fn load_ends_at_error_restart() {
        let mut tape: TapeDevice<MemoryTape> =
            TapeDevice::new(TapeConfig::default(), MemoryTape::new(tap_bytes()), NoSaveSink);
        tape.enter_load_mode(0);
        assert!(tape.trigger_passive_mode(&cpu(100, 0x0008)));
        assert_eq!(tape.mode(), TapeMode::Passive);
    }

    #[test]
    fn unreadable_tape_degrades_to_no_signal() {
        let mut tape: TapeDevice<BrokenTape> =
            TapeDevice::new(TapeConfig::default(), BrokenTape, NoSaveSink);
        let mut beeper = BeeperDevice::new(69_888, NoAudio);
        tape.enter_load_mode(0);
        assert_eq!(tape.mode(), TapeMode::Load);
        assert!(tape.player().is_none());
        assert!(tape.ear_bit(10_000, 10, &mut beeper));
    }

    #[test]
    fn custom_rom_addresses() {
        let config = TapeConfig {
            save_bytes_address: 0x1000,
            ..TapeConfig::default()
        };
        let mut tape: TapeDevice = TapeDevice::new(config, NoTape, NoSaveSink);
        assert!(!tape.set_tape_mode(&cpu(0, 0x04C2)));
        assert!(tape.set_tape_mode(&cpu(0, 0x1000)));
        assert_eq!(tape.query("mode"), Some(Value::Str("Save")));
    }

    #[test]
    fn reset_returns_to_passive() {
        let mut tape = save_device();
        tape.enter_save_mode(10);
        tape.process_mic_bit_value(20, false);
        tape.reset();
        assert_eq!(tape.mode(), TapeMode::Passive);
        assert!(tape.mic_pulses().is_empty());
        assert!(tape.mic_bit());
    }
}
