//! Table-driven ULA screen device.
//!
//! The host loop calls [`ScreenDevice::render_screen`] with the range of
//! frame tacts the CPU has just executed. Each tact's descriptor tells the
//! device whether to paint border, paint display pixels, fetch a byte from
//! video memory, or do nothing.

use emu_core::{FrameBoundDevice, Observable, Value};

use crate::palette::{PALETTE, pixel_colour};
use crate::renderer::{NoRenderer, PixelRenderer};
use crate::tact_table::{RenderingPhase, TactTable};
use crate::timing::{DisplayTimings, TimingError};

/// Border colour after power-on.
const POWER_ON_BORDER: u8 = 7;

pub struct ScreenDevice<R: PixelRenderer = NoRenderer> {
    timings: DisplayTimings,
    table: TactTable,
    renderer: R,
    border_colour: u8,
    flash_phase: bool,
    frame_count: u64,
    // The ULA keeps two pixel/attribute byte pairs in flight: one being
    // shifted out, one being fetched. `_1` feeds DisplayByte1 tacts and
    // `_2` feeds DisplayByte2 tacts. Pixel bytes shift left as they are shown.
    pixel_1: u8,
    pixel_2: u8,
    attr_1: u8,
    attr_2: u8,
}

impl ScreenDevice<NoRenderer> {
    /// Screen device with no display attached.
    pub fn headless(timings: DisplayTimings) -> Result<Self, TimingError> {
        Self::new(timings, NoRenderer)
    }
}

impl<R: PixelRenderer> ScreenDevice<R> {
    /// Build the tact table for `timings` and attach `renderer`.
    pub fn new(timings: DisplayTimings, mut renderer: R) -> Result<Self, TimingError> {
        let table = TactTable::build(&timings)?;
        renderer.set_palette(&PALETTE);
        Ok(Self {
            timings,
            table,
            renderer,
            border_colour: POWER_ON_BORDER,
            flash_phase: false,
            frame_count: 0,
            pixel_1: 0,
            pixel_2: 0,
            attr_1: 0,
            attr_2: 0,
        })
    }

    /// Execute the tacts from `from` to `to`, both inclusive.
    ///
    /// Bounds are frame tacts and wrap at the frame length. An empty range
    /// (`to < from`) does nothing; a range longer than a frame executes each
    /// tact once. `fetch` reads video memory without side effects.
    pub fn render_screen(&mut self, from: u32, to: u32, fetch: impl Fn(u16) -> u8) {
        if to < from {
            return;
        }
        let frame = self.table.len();
        let count = (to - from).saturating_add(1).min(frame);
        let start = from % frame;

        for offset in 0..count {
            let tact = *self.table.get((start + offset) % frame);
            match tact.phase {
                RenderingPhase::Idle => {}
                RenderingPhase::Border => {
                    self.paint(tact.x, tact.y, self.border_colour, self.border_colour);
                }
                RenderingPhase::BorderAndFetchPixel => {
                    self.paint(tact.x, tact.y, self.border_colour, self.border_colour);
                    self.pixel_1 = fetch(tact.fetch_address);
                }
                RenderingPhase::BorderAndFetchAttribute => {
                    self.paint(tact.x, tact.y, self.border_colour, self.border_colour);
                    self.attr_1 = fetch(tact.fetch_address);
                }
                RenderingPhase::DisplayByte1 => {
                    self.shift_out_byte_1(tact.x, tact.y);
                }
                RenderingPhase::DisplayByte1AndFetchPixel2 => {
                    self.shift_out_byte_1(tact.x, tact.y);
                    self.pixel_2 = fetch(tact.fetch_address);
                }
                RenderingPhase::DisplayByte1AndFetchAttribute2 => {
                    self.shift_out_byte_1(tact.x, tact.y);
                    self.attr_2 = fetch(tact.fetch_address);
                }
                RenderingPhase::DisplayByte2 => {
                    self.shift_out_byte_2(tact.x, tact.y);
                }
                RenderingPhase::DisplayByte2AndFetchPixel1 => {
                    self.shift_out_byte_2(tact.x, tact.y);
                    self.pixel_1 = fetch(tact.fetch_address);
                }
                RenderingPhase::DisplayByte2AndFetchAttribute1 => {
                    self.shift_out_byte_2(tact.x, tact.y);
                    self.attr_1 = fetch(tact.fetch_address);
                }
            }
        }
    }

    fn shift_out_byte_1(&mut self, x: u16, y: u16) {
        let (left, right) = self.top_pixels(self.pixel_1, self.attr_1);
        self.paint(x, y, left, right);
        self.pixel_1 <<= 2;
    }

    fn shift_out_byte_2(&mut self, x: u16, y: u16) {
        let (left, right) = self.top_pixels(self.pixel_2, self.attr_2);
        self.paint(x, y, left, right);
        self.pixel_2 <<= 2;
    }

    /// Colours of the two pixels in bits 7 and 6 of `pixels`.
    fn top_pixels(&self, pixels: u8, attr: u8) -> (u8, u8) {
        (
            pixel_colour(pixels & 0x80 != 0, attr, self.flash_phase),
            pixel_colour(pixels & 0x40 != 0, attr, self.flash_phase),
        )
    }

    fn paint(&mut self, x: u16, y: u16, left: u8, right: u8) {
        self.renderer.render_pixel(x, y, left);
        self.renderer.render_pixel(x + 1, y, right);
    }

    /// Extra wait tacts for a contended memory access at `tact`.
    #[must_use]
    pub fn get_contention_value(&self, tact: u64) -> u8 {
        self.table.contention(tact)
    }

    pub fn set_border_colour(&mut self, colour: u8) {
        self.border_colour = colour & 0x07;
    }

    #[must_use]
    pub fn border_colour(&self) -> u8 {
        self.border_colour
    }

    #[must_use]
    pub fn flash_phase(&self) -> bool {
        self.flash_phase
    }

    /// Frames started since the last reset.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[must_use]
    pub fn timings(&self) -> &DisplayTimings {
        &self.timings
    }

    #[must_use]
    pub fn tact_table(&self) -> &TactTable {
        &self.table
    }

    #[must_use]
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }
}

impl<R: PixelRenderer> FrameBoundDevice for ScreenDevice<R> {
    fn reset(&mut self) {
        self.border_colour = POWER_ON_BORDER;
        self.flash_phase = false;
        self.frame_count = 0;
        self.pixel_1 = 0;
        self.pixel_2 = 0;
        self.attr_1 = 0;
        self.attr_2 = 0;
        self.renderer.reset();
    }

    fn start_new_frame(&mut self) {
        self.frame_count += 1;
        if self.frame_count % u64::from(self.timings.flash_toggle_frames) == 0 {
            self.flash_phase = !self.flash_phase;
        }
        self.renderer.start_new_frame();
    }

    fn sign_frame_completed(&mut self) {
        log::trace!("Screen frame {} completed", self.frame_count);
        self.renderer.display_frame();
    }
}

impl<R: PixelRenderer> Observable for ScreenDevice<R> {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "border_colour" => Some(self.border_colour.into()),
            "flash_phase" => Some(self.flash_phase.into()),
            "frame_count" => Some(self.frame_count.into()),
            "frame_tacts" => Some(self.table.len().into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &["border_colour", "flash_phase", "frame_count", "frame_tacts"]
    }
}
