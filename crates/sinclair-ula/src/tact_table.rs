//! Per-tact ULA behaviour table.
//!
//! One [`UlaTact`] per tact of the frame, built once from [`DisplayTimings`]
//! and read-only afterwards. The renderer and the contention lookup never
//! compute geometry at run time; they index this table.
//!
//! # Fetch pipeline
//!
//! Each 8-tact group in the display area shows two pixel bytes (four tacts
//! each). While the first byte is shown the ULA fetches the second byte and
//! its attribute; while the second is shown it fetches the first byte of the
//! next group. The first group of a line is fetched from the left border
//! just before the display area starts.
//!
//! ```text
//! group tact   0    1    2       3       4    5    6       7
//! phase        D1   D1   D1+P2   D1+A2   D2   D2   D2+P1   D2+A1
//! contention   4    3    2       1       0    0    6       5
//! ```
//!
//! The last group of a line has nothing left to fetch in tacts 6 and 7.

use crate::timing::{DisplayTimings, TimingError};

/// Tacts between a display-area pixel byte fetch and the tact that shows it.
const PIXEL_FETCH_LEAD: u32 = 2;
/// Tacts between a display-area attribute fetch and the tact that shows it.
const ATTRIBUTE_FETCH_LEAD: u32 = 1;

/// Contention for the border tact that fetches the first pixel byte.
const BORDER_PIXEL_FETCH_CONTENTION: u8 = 6;
/// Contention for the border tact that fetches the first attribute byte.
const BORDER_ATTRIBUTE_FETCH_CONTENTION: u8 = 5;

const PIXEL_BASE: u16 = 0x4000;
const ATTRIBUTE_BASE: u16 = 0x5800;

// Pixel address bit layout. Laying rows out linearly gives
// `010 Y7Y6 Y5Y4Y3 Y2Y1Y0 X4X3X2X1X0`; the hardware swaps the two
// 3-bit row fields to get `010 Y7Y6 Y2Y1Y0 Y5Y4Y3 X4X3X2X1X0`.

/// Fixed prefix, Y7Y6 and the byte column stay where they are.
const PIXEL_KEEP_MASK: u16 = 0xF81F;
/// Y5Y4Y3 in the linear layout (bits 8-10).
const CHAR_ROW_MASK: u16 = 0x0700;
/// Y2Y1Y0 in the linear layout (bits 5-7).
const PIXEL_ROW_MASK: u16 = 0x00E0;
/// Distance each 3-bit row field moves.
const ROW_FIELD_SHIFT: u16 = 3;

/// What the ULA does during one tact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderingPhase {
    /// Blanking or non-visible border.
    #[default]
    Idle,
    Border,
    /// Border, while fetching the first pixel byte of the line.
    BorderAndFetchPixel,
    /// Border, while fetching the first attribute byte of the line.
    BorderAndFetchAttribute,
    DisplayByte1,
    DisplayByte1AndFetchPixel2,
    DisplayByte1AndFetchAttribute2,
    DisplayByte2,
    DisplayByte2AndFetchPixel1,
    DisplayByte2AndFetchAttribute1,
}

impl RenderingPhase {
    /// Does this phase read video memory?
    #[must_use]
    pub fn fetches(self) -> bool {
        matches!(
            self,
            Self::BorderAndFetchPixel
                | Self::BorderAndFetchAttribute
                | Self::DisplayByte1AndFetchPixel2
                | Self::DisplayByte1AndFetchAttribute2
                | Self::DisplayByte2AndFetchPixel1
                | Self::DisplayByte2AndFetchAttribute1
        )
    }

    #[must_use]
    pub fn is_border(self) -> bool {
        matches!(
            self,
            Self::Border | Self::BorderAndFetchPixel | Self::BorderAndFetchAttribute
        )
    }

    #[must_use]
    pub fn is_display(self) -> bool {
        !matches!(self, Self::Idle) && !self.is_border()
    }
}

/// Descriptor of a single tact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UlaTact {
    pub phase: RenderingPhase,
    /// Left of the two screen pixels this tact paints.
    pub x: u16,
    pub y: u16,
    /// Extra wait tacts for a CPU access to contended memory (0-7).
    pub contention: u8,
    /// Video memory address read by fetch phases; zero otherwise.
    pub fetch_address: u16,
}

/// The per-frame tact table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TactTable {
    tacts: Box<[UlaTact]>,
}

impl TactTable {
    /// Build the table, failing if the timings are inconsistent.
    pub fn build(timings: &DisplayTimings) -> Result<Self, TimingError> {
        timings.validate()?;

        let line_time = timings.screen_line_time();
        let tacts: Box<[UlaTact]> = (0..timings.frame_tacts)
            .map(|tact| describe_tact(timings, tact / line_time, tact % line_time))
            .collect();

        log::debug!(
            "Built ULA tact table: {} tacts, {} lines of {} tacts",
            tacts.len(),
            timings.total_lines(),
            line_time
        );
        Ok(Self { tacts })
    }

    /// Descriptor of `tact`, which must be below the frame length.
    #[must_use]
    pub fn get(&self, tact: u32) -> &UlaTact {
        &self.tacts[tact as usize]
    }

    /// Contention delay at any tact, wrapped into the frame.
    #[must_use]
    pub fn contention(&self, tact: u64) -> u8 {
        self.tacts[(tact % self.tacts.len() as u64) as usize].contention
    }

    /// Frame length in tacts.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.tacts.len() as u32
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tacts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UlaTact> {
        self.tacts.iter()
    }
}

fn describe_tact(timings: &DisplayTimings, line: u32, tact_in_line: u32) -> UlaTact {
    if !timings.is_tact_visible(line, tact_in_line) {
        return UlaTact::default();
    }

    let mut item = UlaTact {
        phase: RenderingPhase::Border,
        x: ((tact_in_line - timings.horizontal_blanking_time) * 2) as u16,
        y: (line - timings.first_visible_line()) as u16,
        contention: 0,
        fetch_address: 0,
    };

    let first_pixel = timings.first_pixel_tact_in_line();

    if !timings.is_tact_in_display_area(line, tact_in_line) {
        let beside_display =
            (timings.first_display_line()..=timings.last_display_line()).contains(&line);
        if beside_display {
            if tact_in_line == first_pixel - timings.pixel_data_prefetch_time {
                item.phase = RenderingPhase::BorderAndFetchPixel;
                item.fetch_address = pixel_byte_address(timings, line, first_pixel);
                item.contention = BORDER_PIXEL_FETCH_CONTENTION;
            } else if tact_in_line == first_pixel - timings.attribute_data_prefetch_time {
                item.phase = RenderingPhase::BorderAndFetchAttribute;
                item.fetch_address = attribute_address(timings, line, first_pixel);
                item.contention = BORDER_ATTRIBUTE_FETCH_CONTENTION;
            }
        }
        return item;
    }

    let display_end = first_pixel + timings.display_line_time;
    let pixel_fetch = pixel_byte_address(timings, line, tact_in_line + PIXEL_FETCH_LEAD);
    let attribute_fetch = attribute_address(timings, line, tact_in_line + ATTRIBUTE_FETCH_LEAD);

    let (phase, contention, fetch_address) = match (tact_in_line - first_pixel) & 7 {
        0 => (RenderingPhase::DisplayByte1, 4, 0),
        1 => (RenderingPhase::DisplayByte1, 3, 0),
        2 => (RenderingPhase::DisplayByte1AndFetchPixel2, 2, pixel_fetch),
        3 => (RenderingPhase::DisplayByte1AndFetchAttribute2, 1, attribute_fetch),
        6 if tact_in_line + PIXEL_FETCH_LEAD < display_end => {
            (RenderingPhase::DisplayByte2AndFetchPixel1, 6, pixel_fetch)
        }
        7 if tact_in_line + ATTRIBUTE_FETCH_LEAD < display_end => {
            (RenderingPhase::DisplayByte2AndFetchAttribute1, 5, attribute_fetch)
        }
        _ => (RenderingPhase::DisplayByte2, 0, 0),
    };
    item.phase = phase;
    item.contention = contention;
    item.fetch_address = fetch_address;
    item
}

/// Display row (0-191) and pixel column (0-255) of a display-area tact.
fn display_position(timings: &DisplayTimings, line: u32, tact_in_line: u32) -> (u16, u16) {
    let row = line.saturating_sub(timings.first_display_line());
    let col = 2 * tact_in_line.saturating_sub(timings.first_pixel_tact_in_line());
    (row as u16, col as u16)
}

/// Video memory address of the pixel byte shown at `(line, tact_in_line)`.
#[must_use]
pub fn pixel_byte_address(timings: &DisplayTimings, line: u32, tact_in_line: u32) -> u16 {
    let (row, col) = display_position(timings, line, tact_in_line);
    let linear = PIXEL_BASE | (col >> 3) | (row << 5);
    (linear & PIXEL_KEEP_MASK)
        | ((linear & CHAR_ROW_MASK) >> ROW_FIELD_SHIFT)
        | ((linear & PIXEL_ROW_MASK) << ROW_FIELD_SHIFT)
}

/// Video memory address of the attribute byte for `(line, tact_in_line)`.
///
/// Attributes are linear: one 32-byte row per 8-line character row.
#[must_use]
pub fn attribute_address(timings: &DisplayTimings, line: u32, tact_in_line: u32) -> u16 {
    let (row, col) = display_position(timings, line, tact_in_line);
    ATTRIBUTE_BASE + ((col >> 3) | ((row >> 3) << 5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn table() -> TactTable {
        TactTable::build(&DisplayTimings::default()).expect("default timings are valid")
    }

    /// Line and tact of pixel row `row`, byte column `byte_col`.
    fn at(row: u32, byte_col: u32) -> (u32, u32) {
        (64 + row, 64 + byte_col * 4)
    }

    #[test]
    fn pixel_addresses_match_screen_layout() {
        let t = DisplayTimings::default();
        let cases = [
            ((0, 0), 0x4000),
            ((1, 0), 0x4100),
            ((7, 0), 0x4700),
            ((8, 0), 0x4020),
            ((63, 0), 0x47E0),
            ((64, 0), 0x4800),
            ((128, 0), 0x5000),
            ((0, 1), 0x4001),
            ((191, 31), 0x57FF),
        ];
        for ((row, col), expected) in cases {
            let (line, tact) = at(row, col);
            assert_eq!(
                pixel_byte_address(&t, line, tact),
                expected,
                "row {row}, column {col}"
            );
        }
    }

    #[test]
    fn attribute_addresses_match_screen_layout() {
        let t = DisplayTimings::default();
        let cases = [
            ((0, 0), 0x5800),
            ((7, 0), 0x5800),
            ((8, 0), 0x5820),
            ((0, 31), 0x581F),
            ((191, 31), 0x5AFF),
        ];
        for ((row, col), expected) in cases {
            let (line, tact) = at(row, col);
            assert_eq!(attribute_address(&t, line, tact), expected);
        }
    }

    #[test]
    fn both_tacts_of_a_byte_share_an_address() {
        let t = DisplayTimings::default();
        assert_eq!(pixel_byte_address(&t, 64, 64), pixel_byte_address(&t, 64, 67));
        assert_ne!(pixel_byte_address(&t, 64, 64), pixel_byte_address(&t, 64, 68));
    }

    #[test]
    fn build_is_deterministic() {
        assert_eq!(table(), table());
    }

    #[test]
    fn table_covers_whole_frame() {
        assert_eq!(table().len(), 69_888);
    }

    #[test]
    fn invalid_timings_fail_to_build() {
        let timings = DisplayTimings {
            frame_tacts: 69_887,
            ..DisplayTimings::default()
        };
        assert!(TactTable::build(&timings).is_err());
    }

    #[test]
    fn blanking_and_sync_are_idle() {
        let table = table();
        assert_eq!(*table.get(0), UlaTact::default());
        // Horizontal blanking of a display line.
        assert_eq!(table.get(64 * 224 + 10).phase, RenderingPhase::Idle);
        // Non-visible right border.
        assert_eq!(table.get(64 * 224 + 220).phase, RenderingPhase::Idle);
    }

    #[test]
    fn border_prefetch_tacts() {
        let table = table();
        let line_start = 64 * 224;

        let pixel = table.get(line_start + 62);
        assert_eq!(pixel.phase, RenderingPhase::BorderAndFetchPixel);
        assert_eq!(pixel.fetch_address, 0x4000);
        assert_eq!(pixel.contention, 6);

        let attr = table.get(line_start + 63);
        assert_eq!(attr.phase, RenderingPhase::BorderAndFetchAttribute);
        assert_eq!(attr.fetch_address, 0x5800);
        assert_eq!(attr.contention, 5);

        // Same offsets on a top-border line are plain border.
        assert_eq!(table.get(20 * 224 + 62).phase, RenderingPhase::Border);
    }

    #[test]
    fn display_group_pattern() {
        let table = table();
        let group = 64 * 224 + 64;
        let phases: Vec<_> = (0..8).map(|i| table.get(group + i).phase).collect();
        assert_eq!(
            phases,
            [
                RenderingPhase::DisplayByte1,
                RenderingPhase::DisplayByte1,
                RenderingPhase::DisplayByte1AndFetchPixel2,
                RenderingPhase::DisplayByte1AndFetchAttribute2,
                RenderingPhase::DisplayByte2,
                RenderingPhase::DisplayByte2,
                RenderingPhase::DisplayByte2AndFetchPixel1,
                RenderingPhase::DisplayByte2AndFetchAttribute1,
            ]
        );
        let contention: Vec<_> = (0..8).map(|i| table.get(group + i).contention).collect();
        assert_eq!(contention, [4, 3, 2, 1, 0, 0, 6, 5]);

        assert_eq!(table.get(group + 2).fetch_address, 0x4001);
        assert_eq!(table.get(group + 3).fetch_address, 0x5801);
        assert_eq!(table.get(group + 6).fetch_address, 0x4002);
        assert_eq!(table.get(group + 7).fetch_address, 0x5802);
    }

    #[test]
    fn last_group_of_line_does_not_prefetch() {
        let table = table();
        let last_group = 64 * 224 + 64 + 120;
        assert_eq!(table.get(last_group + 2).fetch_address, 0x401F);
        assert_eq!(table.get(last_group + 6).phase, RenderingPhase::DisplayByte2);
        assert_eq!(table.get(last_group + 7).phase, RenderingPhase::DisplayByte2);
        assert_eq!(table.get(last_group + 6).contention, 0);
    }

    #[test]
    fn contention_wraps_into_frame() {
        let table = table();
        let tact = u64::from(64_u32 * 224 + 64);
        assert_eq!(table.contention(tact), 4);
        assert_eq!(table.contention(tact + 69_888 * 3), 4);
    }

    #[test]
    fn pixel_coordinates() {
        let table = table();
        let first_visible = table.get(16 * 224 + 40);
        assert_eq!((first_visible.x, first_visible.y), (0, 0));
        let first_display = table.get(64 * 224 + 64);
        assert_eq!((first_display.x, first_display.y), (48, 48));
    }

    #[test]
    fn fetches_only_happen_on_display_lines() {
        let table = table();
        let fetching = table.iter().filter(|t| t.phase.fetches()).count();
        // 192 lines x (2 border prefetches + 4 fetches in each of 15 groups
        // + 2 in the last one).
        assert_eq!(fetching, 192 * (2 + 15 * 4 + 2));
    }
}
