use crate::Bus;

/// A CPU that can execute instructions against a bus.
///
/// Interrupt acceptance is deliberately absent: on this machine the frame
/// driver delivers interrupts between steps by rewriting PC/SP through the
/// CPU's accessors, so the core itself never takes an interrupt.
pub trait Cpu<B: Bus> {
    /// Execute one architecturally complete instruction (including any
    /// prefix chain). Returns the T-states consumed, as observed by the bus.
    fn step(&mut self, bus: &mut B) -> u32;

    /// Reset the CPU to its power-on state.
    fn reset(&mut self);

    /// Current program counter.
    fn pc(&self) -> u16;
}
