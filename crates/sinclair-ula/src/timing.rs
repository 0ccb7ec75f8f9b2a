//! Display timing parameters.
//!
//! A frame is `total_lines` scanlines of `screen_line_time` tacts each. Lines
//! are laid out top to bottom as vertical sync, non-visible top border, top
//! border, display, bottom border and non-visible bottom border. Within a
//! line, tacts run horizontal blanking, left border, display, right border
//! and the non-visible right border.
//!
//! Every tact covers two screen pixels.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Widest display area the ULA can address: 32 byte columns of 4 tacts.
const MAX_DISPLAY_LINE_TIME: u32 = 128;

/// Tallest display area the ULA can address.
const MAX_DISPLAY_LINES: u32 = 192;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimingError {
    #[error(
        "frame length {frame_tacts} does not match {line_time} tacts x {lines} lines"
    )]
    FrameLengthMismatch {
        frame_tacts: u32,
        line_time: u32,
        lines: u32,
    },
    #[error("display line time {0} must be a non-zero multiple of 8 no larger than 128")]
    InvalidDisplayLineTime(u32),
    #[error("display line count {0} must be a non-zero multiple of 8 no larger than 192")]
    InvalidDisplayLines(u32),
    #[error(
        "prefetch offsets (pixel {pixel}, attribute {attribute}) must satisfy 0 < attribute < pixel <= left border {border_left}"
    )]
    InvalidPrefetch {
        pixel: u32,
        attribute: u32,
        border_left: u32,
    },
    #[error("flash toggle frame count must be positive")]
    ZeroFlashToggle,
    #[error("refresh rate must be positive")]
    ZeroRefreshRate,
    #[error("{0} does not fit in 32 bits")]
    GeometryOverflow(&'static str),
}

/// Geometry and timing of one video frame, in scanlines and CPU tacts.
///
/// `Default` is the 48K PAL profile: 312 lines of 224 tacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayTimings {
    /// Frames per second.
    pub refresh_rate: u32,
    /// Frames between two flash phase flips.
    pub flash_toggle_frames: u32,

    pub vertical_sync_lines: u32,
    pub non_visible_border_top_lines: u32,
    pub border_top_lines: u32,
    pub display_lines: u32,
    pub border_bottom_lines: u32,
    pub non_visible_border_bottom_lines: u32,

    pub horizontal_blanking_time: u32,
    pub border_left_time: u32,
    pub display_line_time: u32,
    pub border_right_time: u32,
    pub non_visible_border_right_time: u32,

    /// Tacts before the first display tact of a line at which the first
    /// pixel byte is fetched.
    pub pixel_data_prefetch_time: u32,
    /// Same, for the first attribute byte.
    pub attribute_data_prefetch_time: u32,

    /// Declared frame length. Must equal line time x total lines.
    pub frame_tacts: u32,
}

impl Default for DisplayTimings {
    fn default() -> Self {
        Self {
            refresh_rate: 50,
            flash_toggle_frames: 25,
            vertical_sync_lines: 8,
            non_visible_border_top_lines: 8,
            border_top_lines: 48,
            display_lines: 192,
            border_bottom_lines: 48,
            non_visible_border_bottom_lines: 8,
            horizontal_blanking_time: 40,
            border_left_time: 24,
            display_line_time: 128,
            border_right_time: 24,
            non_visible_border_right_time: 8,
            pixel_data_prefetch_time: 2,
            attribute_data_prefetch_time: 1,
            frame_tacts: 69_888,
        }
    }
}

impl DisplayTimings {
    /// Check that the parameters describe a frame the tact table can be
    /// built from.
    pub fn validate(&self) -> Result<(), TimingError> {
        // The derived getters add fields unchecked; they are only safe once
        // these sums are known to fit.
        let line_time = checked_sum(&[
            self.horizontal_blanking_time,
            self.border_left_time,
            self.display_line_time,
            self.border_right_time,
            self.non_visible_border_right_time,
        ])
        .ok_or(TimingError::GeometryOverflow("line time"))?;
        let lines = checked_sum(&[
            self.vertical_sync_lines,
            self.non_visible_border_top_lines,
            self.border_top_lines,
            self.display_lines,
            self.border_bottom_lines,
            self.non_visible_border_bottom_lines,
        ])
        .ok_or(TimingError::GeometryOverflow("line count"))?;
        if line_time.checked_mul(2).is_none() {
            return Err(TimingError::GeometryOverflow("screen width"));
        }

        if self.refresh_rate == 0 {
            return Err(TimingError::ZeroRefreshRate);
        }
        if self.flash_toggle_frames == 0 {
            return Err(TimingError::ZeroFlashToggle);
        }
        if self.display_line_time == 0
            || self.display_line_time % 8 != 0
            || self.display_line_time > MAX_DISPLAY_LINE_TIME
        {
            return Err(TimingError::InvalidDisplayLineTime(self.display_line_time));
        }
        if self.display_lines == 0
            || self.display_lines % 8 != 0
            || self.display_lines > MAX_DISPLAY_LINES
        {
            return Err(TimingError::InvalidDisplayLines(self.display_lines));
        }

        let pixel = self.pixel_data_prefetch_time;
        let attribute = self.attribute_data_prefetch_time;
        if attribute == 0 || pixel <= attribute || pixel > self.border_left_time {
            return Err(TimingError::InvalidPrefetch {
                pixel,
                attribute,
                border_left: self.border_left_time,
            });
        }

        if u64::from(line_time) * u64::from(lines) != u64::from(self.frame_tacts) {
            return Err(TimingError::FrameLengthMismatch {
                frame_tacts: self.frame_tacts,
                line_time,
                lines,
            });
        }
        Ok(())
    }

    /// Tacts in one scanline, blanking included.
    #[must_use]
    pub fn screen_line_time(&self) -> u32 {
        self.horizontal_blanking_time
            + self.border_left_time
            + self.display_line_time
            + self.border_right_time
            + self.non_visible_border_right_time
    }

    /// Scanlines in one frame, vertical sync included.
    #[must_use]
    pub fn total_lines(&self) -> u32 {
        self.vertical_sync_lines
            + self.non_visible_border_top_lines
            + self.border_top_lines
            + self.display_lines
            + self.border_bottom_lines
            + self.non_visible_border_bottom_lines
    }

    #[must_use]
    pub fn first_visible_line(&self) -> u32 {
        self.vertical_sync_lines + self.non_visible_border_top_lines
    }

    /// One past the last visible scanline.
    #[must_use]
    pub fn visible_lines_end(&self) -> u32 {
        self.first_visible_line()
            + self.border_top_lines
            + self.display_lines
            + self.border_bottom_lines
    }

    #[must_use]
    pub fn first_display_line(&self) -> u32 {
        self.first_visible_line() + self.border_top_lines
    }

    #[must_use]
    pub fn last_display_line(&self) -> u32 {
        self.first_display_line() + self.display_lines - 1
    }

    #[must_use]
    pub fn first_pixel_tact_in_line(&self) -> u32 {
        self.horizontal_blanking_time + self.border_left_time
    }

    /// One past the last visible tact of a line.
    #[must_use]
    pub fn visible_tacts_end(&self) -> u32 {
        self.screen_line_time() - self.non_visible_border_right_time
    }

    /// Visible width in pixels (two per tact).
    #[must_use]
    pub fn screen_width(&self) -> u32 {
        2 * (self.border_left_time + self.display_line_time + self.border_right_time)
    }

    /// Visible height in pixels (one per line).
    #[must_use]
    pub fn screen_height(&self) -> u32 {
        self.border_top_lines + self.display_lines + self.border_bottom_lines
    }

    #[must_use]
    pub fn is_tact_visible(&self, line: u32, tact_in_line: u32) -> bool {
        (self.first_visible_line()..self.visible_lines_end()).contains(&line)
            && (self.horizontal_blanking_time..self.visible_tacts_end()).contains(&tact_in_line)
    }

    #[must_use]
    pub fn is_tact_in_display_area(&self, line: u32, tact_in_line: u32) -> bool {
        let first_pixel = self.first_pixel_tact_in_line();
        (self.first_display_line()..=self.last_display_line()).contains(&line)
            && (first_pixel..first_pixel + self.display_line_time).contains(&tact_in_line)
    }
}

fn checked_sum(parts: &[u32]) -> Option<u32> {
    parts.iter().try_fold(0u32, |acc, &part| acc.checked_add(part))
}
