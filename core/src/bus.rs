/// A bus that supports memory read/write operations.
///
/// All operations are cycle-accurate: reads and writes advance the system
/// clock by their access cost (4 T-states for an M1 opcode fetch, 3 for a
/// plain memory access), plus any wait states the bus inserts. `tick()` is
/// used for internal CPU cycles that don't touch the bus.
///
/// The CPU measures per-instruction timing through `elapsed()` rather than
/// keeping its own counter, so wait states injected mid-instruction are
/// reflected in the count the CPU reports.
pub trait Bus {
    /// Read a byte from the given address.
    ///
    /// `m1` marks an opcode-fetch cycle. M1 reads cost 4 T-states (3 access
    /// + 1 refresh) and are the only cycles subject to video contention;
    /// other reads cost 3.
    fn read(&mut self, addr: u16, m1: bool) -> u8;

    /// Write a byte to the given address. Costs 3 T-states.
    fn write(&mut self, addr: u16, value: u8);

    /// Advance the system clock without a bus access.
    fn tick(&mut self, t_states: u32);

    /// Monotonic T-state counter since reset.
    fn elapsed(&self) -> u64;

    /// Side-effect-free read for diagnostics and intercepts.
    ///
    /// Does not advance the clock, does not clear latches.
    fn peek(&self, addr: u16) -> u8;
}
