//! Pixel sinks the screen device paints into.

/// Receives colour indices for screen pixels.
///
/// Coordinates cover the visible area, border included. Every method has a
/// do-nothing default so a sink only implements what it needs.
pub trait PixelRenderer {
    fn reset(&mut self) {}

    /// Colour index to ARGB32 mapping, sent once at construction.
    fn set_palette(&mut self, _palette: &[u32; 16]) {}

    fn start_new_frame(&mut self) {}

    fn render_pixel(&mut self, _x: u16, _y: u16, _colour: u8) {}

    /// The frame is complete and can be shown.
    fn display_frame(&mut self) {}
}

/// Sink that discards everything. Used when no display is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRenderer;

impl PixelRenderer for NoRenderer {}

impl<R: PixelRenderer + ?Sized> PixelRenderer for Box<R> {
    fn reset(&mut self) {
        (**self).reset();
    }

    fn set_palette(&mut self, palette: &[u32; 16]) {
        (**self).set_palette(palette);
    }

    fn start_new_frame(&mut self) {
        (**self).start_new_frame();
    }

    fn render_pixel(&mut self, x: u16, y: u16, colour: u8) {
        (**self).render_pixel(x, y, colour);
    }

    fn display_frame(&mut self) {
        (**self).display_frame();
    }
}

/// ARGB32 framebuffer.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    palette: [u32; 16],
    pixels: Vec<u32>,
    frames_displayed: u64,
}

impl FrameBuffer {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            palette: crate::PALETTE,
            pixels: vec![0xFF00_0000; (width * height) as usize],
            frames_displayed: 0,
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major ARGB32 pixels.
    #[must_use]
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    /// Number of `display_frame` calls since the last reset.
    #[must_use]
    pub fn frames_displayed(&self) -> u64 {
        self.frames_displayed
    }
}

impl PixelRenderer for FrameBuffer {
    fn reset(&mut self) {
        self.pixels.fill(0xFF00_0000);
        self.frames_displayed = 0;
    }

    fn set_palette(&mut self, palette: &[u32; 16]) {
        self.palette = *palette;
    }

    fn render_pixel(&mut self, x: u16, y: u16, colour: u8) {
        let (x, y) = (u32::from(x), u32::from(y));
        if x < self.width && y < self.height {
            self.pixels[(y * self.width + x) as usize] = self.palette[usize::from(colour & 0x0F)];
        }
    }

    fn display_frame(&mut self) {
        self.frames_displayed += 1;
    }
}
