//! Core traits and types for tact-synchronised device emulation.
//!
//! Everything counts in CPU tacts. Devices never own the CPU: they are handed
//! its tact counter and program counter through [`CpuState`] and react to the
//! frame boundaries the host loop signals through [`FrameBoundDevice`].

mod clock;
mod cpu;
mod device;
mod observable;

pub use clock::{CancellationToken, ClockBridge, ClockError, HostCounter, MonotonicCounter};
pub use cpu::CpuState;
pub use device::FrameBoundDevice;
pub use observable::{Observable, Value};
