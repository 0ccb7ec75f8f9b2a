//! ZX Spectrum 48K peripherals: beeper, cassette interface and the glue that
//! drives them and the ULA screen from the CPU's tact counter.
//!
//! Devices are passive. The host loop runs the CPU, reports port traffic and
//! calls [`Spectrum48::after_instruction`]; each device only ever sees tact
//! numbers and the program counter.

pub mod audio;
mod beeper;
mod config;
mod pulse;
pub mod save;
mod spectrum;
mod tap_player;
pub mod tape;

pub use audio::{AudioSink, NoAudio, SampleBuffer};
pub use beeper::BeeperDevice;
pub use config::{ConfigError, SpectrumConfig};
pub use pulse::{EarBitPulse, MicBitPulse, Pulse, PulseRecorder};
pub use save::{NoSaveSink, SaveDecoder, SavePhase, TapRecorder, TapeSaveSink};
pub use spectrum::{Peripherals, Spectrum48, SpectrumError};
pub use tap_player::TapPlayer;
pub use tape::{
    FileTape, MemoryTape, NoTape, TapeConfig, TapeContentProvider, TapeDevice, TapeError,
    TapeMode, TapePlayer,
};
