//! The slice of CPU state the peripheral devices consume.

/// Read-only view of the CPU core.
///
/// The instruction decoder lives outside this workspace. Devices only ever
/// need to know how many tacts have elapsed and where the program counter
/// points, so that is all this trait exposes.
pub trait CpuState {
    /// Monotonically increasing count of CPU tacts since power-on.
    fn tacts(&self) -> u64;

    /// Current program counter.
    fn pc(&self) -> u16;
}

impl<T: CpuState + ?Sized> CpuState for &T {
    fn tacts(&self) -> u64 {
        (**self).tacts()
    }

    fn pc(&self) -> u16 {
        (**self).pc()
    }
}
