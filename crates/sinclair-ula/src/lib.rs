//! Sinclair ULA screen timing for the 48K Spectrum.
//!
//! The ULA paints the border and the 256x192 display while stealing memory
//! cycles from the CPU. Both effects depend on exactly which tact of the frame
//! the machine is at, so this crate describes each tact up front in a
//! [`TactTable`] and drives rendering and contention from it.
//!
//! # Timing (48K PAL)
//!
//! - 224 tacts per line, 312 lines per frame (69,888 tacts)
//! - each tact paints two pixels
//! - visible area 352x288: 48 pixels of border on each side of the display
//!   horizontally, 48 lines above and below it vertically
//!
//! # Screen memory layout
//!
//! Bitmap at $4000-$57FF (6144 bytes), attributes at $5800-$5AFF (768 bytes).
//! Bitmap address: `010Y7 Y6Y2 Y1Y0 Y5Y4Y3 X4X3X2X1X0`
//! Attribute address: `0101 10Y7 Y6Y5 Y4Y3 X4X3X2X1X0`
//!
//! Video memory is read through a closure passed to
//! [`ScreenDevice::render_screen`], so the device never holds on to memory.

mod palette;
mod renderer;
mod screen;
mod tact_table;
mod timing;

pub use palette::{PALETTE, ink, paper, pixel_colour};
pub use renderer::{FrameBuffer, NoRenderer, PixelRenderer};
pub use screen::ScreenDevice;
pub use tact_table::{RenderingPhase, TactTable, UlaTact, attribute_address, pixel_byte_address};
pub use timing::{DisplayTimings, TimingError};
