//! Trait for devices whose work is batched per video frame.

/// A device driven by the host loop's frame boundaries.
///
/// Within one frame the host calls `start_new_frame` before anything else
/// touches the device, and `sign_frame_completed` only after every tact of
/// the frame has been processed. The ordering is the host's responsibility;
/// devices do not check it.
pub trait FrameBoundDevice {
    /// Return the device to its power-on state.
    fn reset(&mut self);

    /// Prepare for a new frame starting at frame tact 0.
    fn start_new_frame(&mut self);

    /// The frame's tacts have all been processed; hand results to the sinks.
    fn sign_frame_completed(&mut self);
}
