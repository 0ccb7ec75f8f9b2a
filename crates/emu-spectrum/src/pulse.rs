//! Digital signal pulses.
//!
//! A one-bit line (EAR or MIC) is recorded as a list of pulses: runs of a
//! constant level with their length in tacts. Laying the pulses end to end
//! from the recording start reproduces the level at every tact.

/// A run of one signal level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub level: bool,
    /// Length in tacts. Never zero.
    pub length: u64,
}

/// Pulse on the EAR line (beeper and tape input).
pub type EarBitPulse = Pulse;

/// Pulse on the MIC line (tape output).
pub type MicBitPulse = Pulse;

/// Turns level changes into pulses.
///
/// Each change closes the pulse that was running, so a pulse carries the
/// level that was held before the change. A change at the very tact the
/// previous pulse started would produce a zero-length pulse; those are not
/// recorded.
#[derive(Debug, Clone)]
pub struct PulseRecorder {
    level: bool,
    last_transition: u64,
    pulses: Vec<Pulse>,
}

impl PulseRecorder {
    /// Start recording at tact 0 with the line at `level`.
    #[must_use]
    pub fn new(level: bool) -> Self {
        Self {
            level,
            last_transition: 0,
            pulses: Vec::new(),
        }
    }

    /// The line is `bit` as of `tact`. Returns the pulse this closed, if any.
    pub fn record(&mut self, tact: u64, bit: bool) -> Option<Pulse> {
        if bit == self.level {
            return None;
        }
        let length = tact.saturating_sub(self.last_transition);
        let closed = Pulse {
            level: self.level,
            length,
        };
        self.level = bit;
        self.last_transition = tact;
        if length == 0 {
            return None;
        }
        self.pulses.push(closed);
        Some(closed)
    }

    /// Close the running pulse at `end`, if it has any length left.
    pub fn close(&mut self, end: u64) {
        if self.last_transition < end {
            self.pulses.push(Pulse {
                level: self.level,
                length: end - self.last_transition,
            });
            self.last_transition = end;
        }
    }

    /// Drop recorded pulses and restart timing from `tact`. The level is kept.
    pub fn restart(&mut self, tact: u64) {
        self.pulses.clear();
        self.last_transition = tact;
    }

    /// Drop everything and start over at `tact` with the line at `level`.
    pub fn reset(&mut self, tact: u64, level: bool) {
        self.restart(tact);
        self.level = level;
    }

    #[must_use]
    pub fn level(&self) -> bool {
        self.level
    }

    #[must_use]
    pub fn last_transition(&self) -> u64 {
        self.last_transition
    }

    #[must_use]
    pub fn pulses(&self) -> &[Pulse] {
        &self.pulses
    }
}
