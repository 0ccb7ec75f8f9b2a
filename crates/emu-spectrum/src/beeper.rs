//! Beeper: the EAR line as heard through the internal speaker.
//!
//! Level changes written to port $FE are collected into one pulse list per
//! frame. At the end of the frame the list is closed off to the frame length
//! and handed to the audio sink.

use emu_core::{FrameBoundDevice, Observable, Value};

use crate::audio::{AudioSink, NoAudio};
use crate::pulse::{EarBitPulse, PulseRecorder};

/// Level of the EAR line with nothing driving it.
const REST_LEVEL: bool = true;

pub struct BeeperDevice<A: AudioSink = NoAudio> {
    frame_tacts: u32,
    recorder: PulseRecorder,
    /// Changes written past the frame end, as offsets into the next frame.
    carried: Vec<(u32, bool)>,
    frame_count: u64,
    /// Set while the tape is loading: only tape EAR bits are followed.
    tape_override: bool,
    sink: A,
}

impl<A: AudioSink> BeeperDevice<A> {
    #[must_use]
    pub fn new(frame_tacts: u32, sink: A) -> Self {
        Self {
            frame_tacts,
            recorder: PulseRecorder::new(REST_LEVEL),
            carried: Vec::new(),
            frame_count: 0,
            tape_override: false,
            sink,
        }
    }

    /// EAR bit written by the CPU, at `frame_tact` of the current frame.
    /// Ignored while the tape overrides the beeper.
    pub fn process_ear_bit_value(&mut self, frame_tact: u32, bit: bool) {
        if !self.tape_override {
            self.record(frame_tact, bit);
        }
    }

    /// EAR bit coming from tape playback.
    pub fn process_tape_ear_bit(&mut self, frame_tact: u32, bit: bool) {
        self.record(frame_tact, bit);
    }

    fn record(&mut self, frame_tact: u32, bit: bool) {
        if frame_tact >= self.frame_tacts || !self.carried.is_empty() {
            // The instruction ran past the frame end. The old level holds to
            // the end of this frame and the change lands in the next one.
            let offset = frame_tact.saturating_sub(self.frame_tacts);
            self.carried.push((offset, bit));
        } else {
            self.recorder.record(u64::from(frame_tact), bit);
        }
    }

    pub fn set_tape_override(&mut self, enabled: bool) {
        self.tape_override = enabled;
    }

    #[must_use]
    pub fn tape_override(&self) -> bool {
        self.tape_override
    }

    /// Pulses recorded so far in the current frame.
    #[must_use]
    pub fn pulses(&self) -> &[EarBitPulse] {
        self.recorder.pulses()
    }

    #[must_use]
    pub fn last_ear_bit(&self) -> bool {
        self.carried
            .last()
            .map_or_else(|| self.recorder.level(), |&(_, bit)| bit)
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[must_use]
    pub fn sink(&self) -> &A {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut A {
        &mut self.sink
    }
}

impl<A: AudioSink> FrameBoundDevice for BeeperDevice<A> {
    fn reset(&mut self) {
        self.recorder.reset(0, REST_LEVEL);
        self.carried.clear();
        self.frame_count = 0;
        self.tape_override = false;
        self.sink.reset();
    }

    fn start_new_frame(&mut self) {
        self.recorder.restart(0);
        for (offset, bit) in std::mem::take(&mut self.carried) {
            self.recorder.record(u64::from(offset), bit);
        }
        self.frame_count += 1;
    }

    fn sign_frame_completed(&mut self) {
        if self.recorder.pulses().is_empty() && self.recorder.level() == REST_LEVEL {
            log::trace!("Beeper frame {} silent", self.frame_count);
            return;
        }
        self.recorder.close(u64::from(self.frame_tacts));
        log::trace!(
            "Beeper frame {}: {} pulses",
            self.frame_count,
            self.recorder.pulses().len()
        );
        self.sink.add_sound_frame(self.recorder.pulses());
    }
}

impl<A: AudioSink> Observable for BeeperDevice<A> {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "ear_bit" => Some(self.recorder.level().into()),
            "pulse_count" => Some((self.recorder.pulses().len() as u64).into()),
            "frame_count" => Some(self.frame_count.into()),
            "tape_override" => Some(self.tape_override.into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &["ear_bit", "pulse_count", "frame_count", "tape_override"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulse::Pulse;
    use test_log::test;

    /// Keeps every frame it receives.
    #[derive(Default)]
    struct FrameLog {
        frames: Vec<Vec<EarBitPulse>>,
    }

    impl AudioSink for FrameLog {
        fn add_sound_frame(&mut self, pulses: &[EarBitPulse]) {
            self.frames.push(pulses.to_vec());
        }
    }

    fn beeper(frame_tacts: u32) -> BeeperDevice<FrameLog> {
        BeeperDevice::new(frame_tacts, FrameLog::default())
    }

    fn pulse(level: bool, length: u64) -> Pulse {
        Pulse { level, length }
    }

    #[test]
    fn two_transitions_in_one_frame() {
        let mut b = beeper(70_000);
        b.start_new_frame();
        b.process_ear_bit_value(100, false);
        b.process_ear_bit_value(500, true);
        b.sign_frame_completed();

        assert_eq!(
            b.sink().frames,
            [vec![
                pulse(true, 100),
                pulse(false, 400),
                pulse(true, 69_500)
            ]]
        );
    }

    #[test]
    fn pulses_sum_to_frame_length() {
        let mut b = beeper(69_888);
        b.start_new_frame();
        for (i, tact) in [3u32, 1_000, 1_001, 25_000, 60_000, 69_887].iter().enumerate() {
            b.process_ear_bit_value(*tact, i % 2 == 1);
        }
        b.sign_frame_completed();

        let frame = &b.sink().frames[0];
        assert_eq!(frame.iter().map(|p| p.length).sum::<u64>(), 69_888);
        assert!(frame.iter().all(|p| p.length > 0));
    }

    #[test]
    fn silent_frame_reaches_no_sink() {
        let mut b = beeper(69_888);
        b.start_new_frame();
        b.process_ear_bit_value(200, true);
        b.sign_frame_completed();
        assert!(b.sink().frames.is_empty());
    }

    #[test]
    fn frame_held_low_is_emitted() {
        let mut b = beeper(1_000);
        b.start_new_frame();
        b.process_ear_bit_value(0, false);
        b.sign_frame_completed();
        b.start_new_frame();
        b.sign_frame_completed();

        assert_eq!(
            b.sink().frames,
            [vec![pulse(false, 1_000)], vec![pulse(false, 1_000)]]
        );
    }

    #[test]
    fn transition_at_frame_start_not_recorded() {
        let mut b = beeper(1_000);
        b.start_new_frame();
        b.process_ear_bit_value(0, false);
        assert!(b.pulses().is_empty());
        assert!(!b.last_ear_bit());
    }

    #[test]
    fn late_write_carries_into_next_frame() {
        let mut b = beeper(1_000);
        b.start_new_frame();
        b.process_ear_bit_value(400, false);
        b.process_ear_bit_value(1_200, true);
        assert!(b.last_ear_bit());
        b.sign_frame_completed();
        b.start_new_frame();
        b.process_ear_bit_value(700, false);
        b.sign_frame_completed();

        assert_eq!(
            b.sink().frames,
            [
                vec![pulse(true, 400), pulse(false, 600)],
                vec![pulse(false, 200), pulse(true, 500), pulse(false, 300)]
            ]
        );
    }

    #[test]
    fn late_tape_bit_carries_into_next_frame() {
        let mut b = beeper(1_000);
        b.start_new_frame();
        b.set_tape_override(true);
        b.process_tape_ear_bit(1_000, false);
        b.sign_frame_completed();
        b.start_new_frame();
        assert!(!b.last_ear_bit());
        assert!(b.pulses().is_empty());
        b.process_tape_ear_bit(50, true);
        assert_eq!(b.pulses(), [pulse(false, 50)]);
    }

    #[test]
    fn new_frame_restarts_at_tact_zero() {
        let mut b = beeper(1_000);
        b.start_new_frame();
        b.process_ear_bit_value(900, false);
        b.sign_frame_completed();
        b.start_new_frame();
        b.process_ear_bit_value(10, true);
        b.sign_frame_completed();
        assert_eq!(b.sink().frames[1], [pulse(false, 10), pulse(true, 990)]);
    }

    #[test]
    fn tape_override_ignores_port_writes() {
        let mut b = beeper(1_000);
        b.start_new_frame();
        b.set_tape_override(true);
        b.process_ear_bit_value(100, false);
        assert!(b.pulses().is_empty());
        b.process_tape_ear_bit(200, false);
        b.process_tape_ear_bit(300, true);
        assert_eq!(b.pulses(), [pulse(true, 200), pulse(false, 100)]);
    }

    #[test]
    fn reset_restores_rest_level() {
        let mut b = beeper(1_000);
        b.start_new_frame();
        b.process_ear_bit_value(50, false);
        b.set_tape_override(true);
        b.process_tape_ear_bit(1_100, false);
        b.reset();
        assert!(b.last_ear_bit());
        assert!(!b.tape_override());
        assert_eq!(b.query("frame_count"), Some(Value::U64(0)));
    }
}
