//! 48K Spectrum peripheral glue.
//!
//! The Z80 core lives outside this crate. The host runs it and calls back
//! into [`Spectrum48`] for memory, contention and port $FE traffic, then
//! calls [`Spectrum48::after_instruction`] so the screen catches up with the
//! CPU and the tape can switch modes.
//!
//! # Frame loop
//!
//! ```text
//! loop {
//!     cpu.step(&mut spectrum);
//!     if spectrum.after_instruction(&cpu) {
//!         spectrum.wait_for_next_frame(&token);
//!     }
//! }
//! ```
//!
//! A frame is 69,888 tacts on the 48K. Instructions that run past the end of
//! a frame carry their overshoot into the next one.

use emu_core::{
    CancellationToken, ClockBridge, ClockError, CpuState, FrameBoundDevice, Observable, Value,
};
use sinclair_ula::{NoRenderer, PixelRenderer, ScreenDevice, TimingError};
use thiserror::Error;

use crate::audio::{AudioSink, NoAudio};
use crate::beeper::BeeperDevice;
use crate::config::{ConfigError, SpectrumConfig};
use crate::save::{NoSaveSink, TapeSaveSink};
use crate::tap_player::TapPlayer;
use crate::tape::{NoTape, TapeContentProvider, TapeDevice, TapeMode};

const ROM_SIZE: usize = 0x4000;
const MEMORY_SIZE: usize = 0x1_0000;

/// Address range shared with the ULA.
const CONTENDED: std::ops::RangeInclusive<u16> = 0x4000..=0x7FFF;

const BORDER_MASK: u8 = 0x07;
const MIC_BIT: u8 = 0x08;
const EAR_BIT: u8 = 0x10;
/// EAR input as seen on port $FE reads.
const EAR_IN_BIT: u8 = 0x40;

#[derive(Debug, Error)]
pub enum SpectrumError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Timing(#[from] TimingError),
    #[error("cannot pace emulation: {0}")]
    Clock(#[from] ClockError),
    #[error("ROM image is {0} bytes, larger than the 16K ROM area")]
    RomTooLarge(usize),
}

/// Where the machine's output goes and where tape content comes from.
#[derive(Debug, Default)]
pub struct Peripherals<R = NoRenderer, A = NoAudio, C = NoTape, S = NoSaveSink> {
    pub renderer: R,
    pub audio: A,
    pub tape_content: C,
    pub save_sink: S,
}

pub struct Spectrum48<R = NoRenderer, A = NoAudio, C = NoTape, S = NoSaveSink>
where
    R: PixelRenderer,
    A: AudioSink,
    C: TapeContentProvider,
    S: TapeSaveSink,
{
    config: SpectrumConfig,
    memory: Box<[u8]>,
    screen: ScreenDevice<R>,
    beeper: BeeperDevice<A>,
    tape: TapeDevice<C, TapPlayer, S>,
    clock: ClockBridge,
    /// CPU tact at which the current frame started.
    frame_start: u64,
    /// Frame tacts below this have been rendered.
    rendered_up_to: u32,
    /// Host counter value at which the next frame is due.
    next_frame_due: u64,
    frames_completed: u64,
}

impl Spectrum48 {
    /// Machine with no display, sound or tape attached.
    pub fn headless(config: SpectrumConfig, rom: &[u8]) -> Result<Self, SpectrumError> {
        Self::new(config, rom, Peripherals::default())
    }
}

impl<R, A, C, S> Spectrum48<R, A, C, S>
where
    R: PixelRenderer,
    A: AudioSink,
    C: TapeContentProvider,
    S: TapeSaveSink,
{
    pub fn new(
        config: SpectrumConfig,
        rom: &[u8],
        peripherals: Peripherals<R, A, C, S>,
    ) -> Result<Self, SpectrumError> {
        config.validate()?;
        if rom.len() > ROM_SIZE {
            return Err(SpectrumError::RomTooLarge(rom.len()));
        }
        let mut memory = vec![0u8; MEMORY_SIZE].into_boxed_slice();
        memory[..rom.len()].copy_from_slice(rom);

        let frame_tacts = config.display.frame_tacts;
        let screen = ScreenDevice::new(config.display.clone(), peripherals.renderer)?;
        let beeper = BeeperDevice::new(frame_tacts, peripherals.audio);
        let tape = TapeDevice::new(
            config.tape.clone(),
            peripherals.tape_content,
            peripherals.save_sink,
        );
        let clock = ClockBridge::monotonic(config.cpu_frequency_mhz)?;

        let mut spectrum = Self {
            config,
            memory,
            screen,
            beeper,
            tape,
            clock,
            frame_start: 0,
            rendered_up_to: 0,
            next_frame_due: 0,
            frames_completed: 0,
        };
        spectrum.start_frames(0);
        Ok(spectrum)
    }

    /// Power-on reset. RAM keeps its contents, as on the real machine.
    ///
    /// The CPU's tact counter keeps running, so the first frame after the
    /// reset starts at its current value.
    pub fn reset(&mut self, cpu: &impl CpuState) -> Result<(), SpectrumError> {
        self.screen.reset();
        self.beeper.reset();
        self.tape.reset();
        self.clock.reset()?;
        self.frames_completed = 0;
        self.start_frames(cpu.tacts());
        Ok(())
    }

    /// Begin frame bookkeeping with the current frame starting at `tact`.
    fn start_frames(&mut self, tact: u64) {
        self.frame_start = tact;
        self.rendered_up_to = 0;
        self.screen.start_new_frame();
        self.beeper.start_new_frame();
        self.next_frame_due = self.clock.native_counter() + self.frame_host_ticks();
    }

    fn frame_tacts(&self) -> u32 {
        self.config.display.frame_tacts
    }

    fn frame_host_ticks(&self) -> u64 {
        self.clock
            .host_ticks_for_tacts(u64::from(self.frame_tacts()))
    }

    /// Position of the CPU within the current frame. May exceed the frame
    /// length until the frame is completed.
    #[must_use]
    pub fn frame_tact(&self, cpu: &impl CpuState) -> u32 {
        let elapsed = cpu.tacts().saturating_sub(self.frame_start);
        u32::try_from(elapsed).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn read_memory(&self, address: u16) -> u8 {
        self.memory[usize::from(address)]
    }

    /// Write a byte. Writes to the ROM area are dropped.
    pub fn write_memory(&mut self, address: u16, value: u8) {
        if usize::from(address) >= ROM_SIZE {
            self.memory[usize::from(address)] = value;
        }
    }

    /// Copy `data` into RAM starting at `address`, wrapping at the top of
    /// memory. ROM bytes are left alone.
    pub fn load_memory(&mut self, address: u16, data: &[u8]) {
        let mut address = address;
        for &byte in data {
            self.write_memory(address, byte);
            address = address.wrapping_add(1);
        }
    }

    /// Wait tacts the ULA adds to a memory access at `address` right now.
    #[must_use]
    pub fn contention(&self, address: u16, cpu: &impl CpuState) -> u8 {
        if CONTENDED.contains(&address) {
            self.screen
                .get_contention_value(cpu.tacts().saturating_sub(self.frame_start))
        } else {
            0
        }
    }

    /// OUT to `port`. The ULA answers every even port: bits 0-2 set the
    /// border, bit 3 drives MIC and bit 4 drives EAR.
    pub fn write_port(&mut self, port: u16, value: u8, cpu: &impl CpuState) {
        if port & 1 != 0 {
            return;
        }
        let frame_tact = self.frame_tact(cpu);
        // Border changes take effect from this tact on.
        self.render_until(frame_tact);
        self.screen.set_border_colour(value & BORDER_MASK);

        self.beeper
            .process_ear_bit_value(frame_tact, value & EAR_BIT != 0);
        self.tape
            .process_mic_bit_value(cpu.tacts(), value & MIC_BIT != 0);
    }

    /// IN from `port`. On even ports bit 6 carries the EAR input; the
    /// keyboard half rows read as released.
    pub fn read_port(&mut self, port: u16, cpu: &impl CpuState) -> u8 {
        if port & 1 != 0 {
            return 0xFF;
        }
        let frame_tact = self.frame_tact(cpu);
        let ear = self.tape.ear_bit(cpu.tacts(), frame_tact, &mut self.beeper);
        if ear { 0xFF } else { !EAR_IN_BIT }
    }

    /// Bring the devices up to the CPU after an instruction.
    ///
    /// Renders the tacts executed so far, runs the tape mode check and closes
    /// the frame once its last tact has passed. Returns `true` if a frame was
    /// completed.
    pub fn after_instruction(&mut self, cpu: &impl CpuState) -> bool {
        let frame_tact = self.frame_tact(cpu);
        self.render_until(frame_tact.min(self.frame_tacts()));

        self.tape.set_tape_mode(cpu);
        self.beeper
            .set_tape_override(self.tape.mode() == TapeMode::Load);

        if frame_tact >= self.frame_tacts() {
            self.complete_frame(cpu);
            true
        } else {
            false
        }
    }

    /// Close the current frame and start the next one.
    ///
    /// Tacts the CPU has run past the frame end belong to the new frame.
    pub fn complete_frame(&mut self, cpu: &impl CpuState) {
        let frame_tacts = self.frame_tacts();
        self.render_until(frame_tacts);
        self.beeper.sign_frame_completed();
        self.screen.sign_frame_completed();
        self.frames_completed += 1;

        let overshoot = cpu
            .tacts()
            .saturating_sub(self.frame_start)
            .saturating_sub(u64::from(frame_tacts));
        self.frame_start = cpu.tacts() - overshoot;
        self.rendered_up_to = 0;
        self.screen.start_new_frame();
        self.beeper.start_new_frame();
        log::trace!(
            "Frame {} completed, {overshoot} tacts carried over",
            self.frames_completed
        );
    }

    /// Render a whole frame from memory in one go, regardless of where the
    /// CPU is.
    pub fn refresh_screen(&mut self) {
        let memory = &self.memory;
        self.screen
            .render_screen(0, self.frame_tacts() - 1, |address| memory[usize::from(address)]);
        self.screen.sign_frame_completed();
    }

    /// Sleep until the host clock says the next frame is due.
    ///
    /// Returns `false` if `token` was cancelled while waiting.
    pub fn wait_for_next_frame(&mut self, token: &CancellationToken) -> bool {
        let reached = self.clock.wait_until(self.next_frame_due, token);
        self.next_frame_due += self.frame_host_ticks();
        reached
    }

    fn render_until(&mut self, end: u32) {
        let end = end.min(self.frame_tacts());
        if end <= self.rendered_up_to {
            return;
        }
        let memory = &self.memory;
        self.screen
            .render_screen(self.rendered_up_to, end - 1, |address| {
                memory[usize::from(address)]
            });
        self.rendered_up_to = end;
    }

    #[must_use]
    pub fn frames_completed(&self) -> u64 {
        self.frames_completed
    }

    #[must_use]
    pub fn config(&self) -> &SpectrumConfig {
        &self.config
    }

    #[must_use]
    pub fn screen(&self) -> &ScreenDevice<R> {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut ScreenDevice<R> {
        &mut self.screen
    }

    #[must_use]
    pub fn beeper(&self) -> &BeeperDevice<A> {
        &self.beeper
    }

    pub fn beeper_mut(&mut self) -> &mut BeeperDevice<A> {
        &mut self.beeper
    }

    #[must_use]
    pub fn tape(&self) -> &TapeDevice<C, TapPlayer, S> {
        &self.tape
    }

    pub fn tape_mut(&mut self) -> &mut TapeDevice<C, TapPlayer, S> {
        &mut self.tape
    }

    #[must_use]
    pub fn clock(&self) -> &ClockBridge {
        &self.clock
    }
}

impl<R, A, C, S> Observable for Spectrum48<R, A, C, S>
where
    R: PixelRenderer,
    A: AudioSink,
    C: TapeContentProvider,
    S: TapeSaveSink,
{
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("screen.") {
            self.screen.query(rest)
        } else if let Some(rest) = path.strip_prefix("beeper.") {
            self.beeper.query(rest)
        } else if let Some(rest) = path.strip_prefix("tape.") {
            self.tape.query(rest)
        } else if let Some(rest) = path.strip_prefix("memory.") {
            let address = if let Some(hex) =
                rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"))
            {
                u16::from_str_radix(hex, 16).ok()
            } else if let Some(hex) = rest.strip_prefix('$') {
                u16::from_str_radix(hex, 16).ok()
            } else {
                rest.parse().ok()
            };
            address.map(|a| Value::U8(self.read_memory(a)))
        } else {
            match path {
                "frames_completed" => Some(self.frames_completed.into()),
                "frame_start" => Some(self.frame_start.into()),
                "rendered_up_to" => Some(self.rendered_up_to.into()),
                _ => None,
            }
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "screen.<screen_paths>",
            "beeper.<beeper_paths>",
            "tape.<tape_paths>",
            "memory.<address>",
            "frames_completed",
            "frame_start",
            "rendered_up_to",
        ]
    }
}
