//! Audio sinks for the beeper's pulse frames.
//!
//! The beeper hands over one frame of EAR pulses at a time. What happens to
//! them (sound card, WAV capture, nothing) is up to the sink.

use crate::pulse::EarBitPulse;

/// Output amplitude of a fully high or fully low sample.
const AMPLITUDE: f32 = 0.5;

/// Consumer of beeper output.
pub trait AudioSink {
    fn reset(&mut self) {}

    /// One completed frame of pulses, covering the whole frame.
    fn add_sound_frame(&mut self, _pulses: &[EarBitPulse]) {}

    fn play_sound(&mut self) {}

    fn pause_sound(&mut self) {}

    /// Stop playback and drop anything buffered.
    fn kill_sound(&mut self) {}
}

/// Sink that discards all audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAudio;

impl AudioSink for NoAudio {}

impl<A: AudioSink + ?Sized> AudioSink for Box<A> {
    fn reset(&mut self) {
        (**self).reset();
    }

    fn add_sound_frame(&mut self, pulses: &[EarBitPulse]) {
        (**self).add_sound_frame(pulses);
    }

    fn play_sound(&mut self) {
        (**self).play_sound();
    }

    fn pause_sound(&mut self) {
        (**self).pause_sound();
    }

    fn kill_sound(&mut self) {
        (**self).kill_sound();
    }
}

/// Converts pulse frames into mono `f32` samples.
///
/// Each sample integrates the time the line spent high within its window,
/// so toggles faster than the sample rate average out instead of aliasing.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples_per_frame: usize,
    tacts_per_sample: f32,
    samples: Vec<f32>,
    paused: bool,
}

impl SampleBuffer {
    /// `sample_rate` in Hz, `frame_tacts` and `refresh_rate` from the display
    /// timings. At 44.1 kHz and 50 Hz that is 882 samples per frame.
    #[must_use]
    pub fn new(sample_rate: u32, frame_tacts: u32, refresh_rate: u32) -> Self {
        let samples_per_frame = (sample_rate / refresh_rate.max(1)).max(1) as usize;
        Self {
            samples_per_frame,
            tacts_per_sample: frame_tacts as f32 / samples_per_frame as f32,
            samples: Vec::new(),
            paused: false,
        }
    }

    #[must_use]
    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Hand over everything buffered so far.
    pub fn take_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl AudioSink for SampleBuffer {
    fn reset(&mut self) {
        self.samples.clear();
        self.paused = false;
    }

    fn add_sound_frame(&mut self, pulses: &[EarBitPulse]) {
        if self.paused {
            return;
        }

        let mut pulses = pulses.iter();
        let mut current = pulses.next();
        let mut left_in_pulse = current.map_or(0.0, |p| p.length as f32);

        for _ in 0..self.samples_per_frame {
            let mut window = self.tacts_per_sample;
            let mut high_time = 0.0f32;

            while window > 0.0 {
                let Some(pulse) = current else { break };
                let take = window.min(left_in_pulse);
                if pulse.level {
                    high_time += take;
                }
                window -= take;
                left_in_pulse -= take;
                if left_in_pulse <= 0.0 {
                    current = pulses.next();
                    left_in_pulse = current.map_or(0.0, |p| p.length as f32);
                }
            }

            let ratio = high_time / self.tacts_per_sample;
            self.samples.push((ratio * 2.0 - 1.0) * AMPLITUDE);
        }
    }

    fn play_sound(&mut self) {
        self.paused = false;
    }

    fn pause_sound(&mut self) {
        self.paused = true;
    }

    fn kill_sound(&mut self) {
        self.samples.clear();
        self.paused = true;
    }
}
