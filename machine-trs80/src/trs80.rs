//! Top-level machine: owns the CPU, bus and subsystems and runs the
//! per-frame loop.
//!
//! Interrupt delivery lives here, not in the CPU: after each step, if the
//! bus has an interrupt pending and IFF1 is set, the driver performs the
//! IM 1 acceptance itself (push PC, vector to 0x0038). This is the only
//! place PC and SP are rewritten from outside the core.

#![allow(clippy::cast_possible_truncation)]

use std::fs;
use std::path::Path;

use cpu_z80::Z80;
use emu_core::Bus as _;

use crate::audio::Mixer;
use crate::bus::{Bus, TICKS_PER_FRAME};
use crate::cassette::CassetteState;
use crate::injector::KeyInjector;
use crate::loader::SoftwareLoader;
use crate::trace::Debugger;
use crate::video;

/// Turbo runs this many frames' worth of T-states per wall frame.
const TURBO_MULTIPLIER: u64 = 100;
/// In turbo, render only every Nth wall frame.
const TURBO_RENDER_EVERY: u32 = 10;
/// IM 1 acceptance is 13 T-states; the two stack writes account for 6.
const IM1_INTERNAL_TICKS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedMode {
    Normal,
    Turbo,
}

pub struct Trs80 {
    cpu: Z80,
    bus: Bus,
    loader: SoftwareLoader,
    injector: KeyInjector,
    debugger: Debugger,
    mixer: Mixer,

    user_speed: SpeedMode,
    cur_speed: SpeedMode,
    turbo_render_count: u32,
}

impl Trs80 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cpu: Z80::new(),
            bus: Bus::new(),
            loader: SoftwareLoader::new(),
            injector: KeyInjector::new(),
            debugger: Debugger::new(),
            mixer: Mixer::new(),
            user_speed: SpeedMode::Normal,
            cur_speed: SpeedMode::Normal,
            turbo_render_count: 0,
        }
    }

    /// Install the Level II ROM image (exactly 12 KiB).
    pub fn load_rom(&mut self, image: &[u8]) -> Result<(), String> {
        self.bus.load_rom(image)
    }

    /// Attach a flat `.dsk` image to a drive slot.
    pub fn attach_disk(&mut self, drive: usize, image: Vec<u8>) -> bool {
        self.bus.fdc.insert_disk(drive, image)
    }

    /// Handle a `--load <name>` request.
    pub fn autoload(&mut self, name: &str) {
        self.loader.setup_from_cli(name, &mut self.injector);
    }

    /// Cold reset: everything except the ROM image.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.reset();
        self.mixer.clear();
    }

    #[must_use]
    pub fn speed(&self) -> SpeedMode {
        self.cur_speed
    }

    /// Run one wall-clock frame's worth of emulation. Turbo engages by
    /// itself while keystrokes are queued and drops back out (flushing the
    /// audio backlog) once the queue drains.
    pub fn run_frame(&mut self) {
        let desired = if self.injector.is_active() {
            SpeedMode::Turbo
        } else {
            self.user_speed
        };
        if desired != self.cur_speed {
            if self.cur_speed == SpeedMode::Turbo {
                self.mixer.clear();
            }
            self.cur_speed = desired;
            self.turbo_render_count = 0;
        }

        let budget = match self.cur_speed {
            SpeedMode::Normal => TICKS_PER_FRAME,
            SpeedMode::Turbo => TICKS_PER_FRAME * TURBO_MULTIPLIER,
        };
        self.step_frame(budget);
    }

    /// Execute until `budget` T-states have elapsed on the bus clock.
    fn step_frame(&mut self, budget: u64) {
        let frame_start = self.bus.elapsed();

        while self.bus.elapsed() - frame_start < budget {
            let pc = self.cpu.pc();

            // Offer the PC to the intercept layer first.
            self.loader.on_system_entry(pc, &mut self.cpu, &mut self.bus);
            self.loader
                .on_cload_entry(pc, &mut self.cpu, &mut self.bus, &mut self.injector);
            self.loader
                .on_cload_tracking(pc, &self.cpu, &mut self.bus, &mut self.injector);
            self.loader.on_csave_entry(pc, &mut self.bus);

            if self
                .injector
                .handle_intercept(pc, &mut self.cpu, &mut self.bus)
            {
                continue; // the intercept replaced this step
            }

            self.debugger.record(&self.cpu, self.bus.elapsed());
            if self.debugger.check_freeze(pc) {
                let bus = &self.bus;
                self.debugger.dump(|addr| bus.peek(addr));
            }

            let ticks = self.cpu.step(&mut self.bus);

            // Cassette toggles are FSK, not audio; turbo runs silent too.
            let audio_active = self.cur_speed == SpeedMode::Normal
                && self.bus.cassette.state() == CassetteState::Idle;
            self.mixer.update(self.bus.sound_bit(), ticks, audio_active);

            self.deliver_interrupt();

            let now = self.bus.elapsed();
            if self.bus.cassette.recording_idle(now) {
                self.finish_recording();
            }
            if self.bus.cassette.playback_done(now) {
                let _ = self.bus.cassette.stop();
            }
        }
    }

    /// IM 1 acceptance: IFF2 saves IFF1, IFF1 clears, a halted CPU wakes
    /// to the instruction after HALT, PC is pushed and control vectors to
    /// 0x0038. Charged at 13 T-states.
    fn deliver_interrupt(&mut self) {
        if !self.bus.interrupt_pending() || !self.cpu.iff1() {
            return;
        }
        self.bus.clear_interrupt();

        // IFF1 is known set here; the order still matters so RETN/RETI can
        // restore it. Do NOT clear IFF2: it must keep the pre-acceptance
        // IFF1 or the return instruction would disable interrupts for good.
        self.cpu.set_iff2(true);
        self.cpu.set_iff1(false);

        if self.cpu.halted() {
            self.cpu.set_halted(false);
            self.cpu.set_pc(self.cpu.pc().wrapping_add(1));
        }

        let sp = self.cpu.sp().wrapping_sub(2);
        let pc = self.cpu.pc();
        self.bus.write(sp, pc as u8);
        self.bus.write(sp.wrapping_add(1), (pc >> 8) as u8);
        self.cpu.set_sp(sp);
        self.cpu.set_pc(0x0038);
        self.bus.tick(IM1_INTERNAL_TICKS);
    }

    /// Recording went idle: flush the decoded bytes to the software
    /// directory under the pending filename.
    fn finish_recording(&mut self) {
        let Some(bytes) = self.bus.cassette.stop() else {
            return;
        };
        let name = if self.bus.cassette.filename().is_empty() {
            "untitled"
        } else {
            self.bus.cassette.filename()
        };
        let path = Path::new("software").join(format!("{name}.cas"));
        match fs::write(&path, &bytes) {
            Ok(()) => println!("[CSAVE] wrote {} bytes to {}", bytes.len(), path.display()),
            Err(e) => eprintln!("[CSAVE] cannot write {}: {e}", path.display()),
        }
    }

    /// Whether this wall frame should be drawn (every frame in Normal,
    /// every tenth in Turbo).
    pub fn take_render(&mut self) -> bool {
        match self.cur_speed {
            SpeedMode::Normal => true,
            SpeedMode::Turbo => {
                self.turbo_render_count = self.turbo_render_count.wrapping_add(1);
                self.turbo_render_count % TURBO_RENDER_EVERY == 0
            }
        }
    }

    /// Render the current display into a 384x192 0RGB buffer.
    pub fn render(&self, buffer: &mut [u32]) {
        video::render_screen(self.bus.vram(), buffer);
    }

    /// Move this frame's audio samples into `out`.
    pub fn drain_audio(&mut self, out: &mut Vec<i16>) {
        self.mixer.drain(out);
    }

    pub fn key_down(&mut self, row: usize, bit: u8) {
        self.bus.set_key(row, bit, true);
    }

    pub fn key_up(&mut self, row: usize, bit: u8) {
        self.bus.set_key(row, bit, false);
    }

    pub fn clear_keys(&mut self) {
        self.bus.clear_keys();
    }

    /// Title-bar status: cassette transport plus a turbo tag.
    #[must_use]
    pub fn status_line(&self) -> String {
        let mut status = self.bus.cassette.status();
        if self.cur_speed == SpeedMode::Turbo {
            status.push_str(" [TURBO]");
        }
        status.trim_start().to_string()
    }

    /// Write the instruction trace out (always called on shutdown, so the
    /// last moments are inspectable even without a freeze).
    pub fn dump_trace(&self) {
        if self.debugger.has_entries() {
            let bus = &self.bus;
            self.debugger.dump(|addr| bus.peek(addr));
        }
    }
}

impl Default for Trs80 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::Bus as _;

    /// ROM that enables interrupts and then spins: EI; JP 0x0001. The IM 1
    /// vector at 0x0038 holds its own spin loop so a delivered interrupt is
    /// observable.
    fn interrupt_test_machine() -> Trs80 {
        let mut rom = vec![0u8; 0x3000];
        rom[0x0000] = 0xFB; // EI
        rom[0x0001] = 0xC3; // JP 0x0001
        rom[0x0002] = 0x01;
        rom[0x0003] = 0x00;
        rom[0x0038] = 0xC3; // JP 0x0038
        rom[0x0039] = 0x38;
        rom[0x003A] = 0x00;

        let mut machine = Trs80::new();
        machine.load_rom(&rom).unwrap();
        machine
    }

    #[test]
    fn frame_interrupt_is_delivered_once() {
        let mut machine = interrupt_test_machine();
        machine.cpu.set_sp(0x9000);

        // One full scanline sweep is 262 * 114 = 29,868 ticks; run past it.
        machine.step_frame(40_000);

        assert_eq!(machine.cpu.pc(), 0x0038, "diverted to the IM 1 vector");
        assert_eq!(machine.cpu.sp(), 0x8FFE, "SP dropped by exactly 2");
        assert!(machine.cpu.iff2(), "IFF2 holds the pre-acceptance IFF1");
        assert!(!machine.cpu.iff1(), "IFF1 cleared for the service routine");

        // The pushed return address points into the spin loop.
        let lo = machine.bus.peek(0x8FFE);
        let hi = machine.bus.peek(0x8FFF);
        let ret = u16::from(lo) | u16::from(hi) << 8;
        assert!((0x0001..=0x0004).contains(&ret), "return into the loop, got {ret:04X}");

        // With IFF1 clear, the next frame cannot deliver again.
        machine.step_frame(40_000);
        assert_eq!(machine.cpu.sp(), 0x8FFE, "no second delivery");
    }

    #[test]
    fn halted_cpu_wakes_past_the_halt() {
        let mut rom = vec![0u8; 0x3000];
        rom[0x0000] = 0xFB; // EI
        rom[0x0001] = 0x76; // HALT
        rom[0x0002] = 0x00; // NOP (resume point)
        rom[0x0038] = 0xED; // RETI
        rom[0x0039] = 0x4D;

        let mut machine = Trs80::new();
        machine.load_rom(&rom).unwrap();
        machine.cpu.set_sp(0x9000);

        machine.step_frame(40_000);

        assert!(!machine.cpu.halted(), "woken by the interrupt");
        // The pushed resume address is the byte after HALT.
        assert_eq!(machine.bus.peek(0x8FFE), 0x02);
        assert_eq!(machine.bus.peek(0x8FFF), 0x00);
        assert!(machine.cpu.iff1(), "RETI restored IFF1 from IFF2");
    }

    #[test]
    fn interrupt_waits_while_iff1_clear() {
        let mut rom = vec![0u8; 0x3000];
        rom[0x0000] = 0xC3; // JP 0x0000 (interrupts never enabled)
        rom[0x0001] = 0x00;
        rom[0x0002] = 0x00;

        let mut machine = Trs80::new();
        machine.load_rom(&rom).unwrap();
        machine.cpu.set_sp(0x9000);

        machine.step_frame(40_000);
        assert_eq!(machine.cpu.sp(), 0x9000, "nothing pushed");
        assert!(machine.bus.interrupt_pending(), "latch still waiting");
    }

    #[test]
    fn keystroke_injection_drains_through_key_intercept() {
        // ROM: CALL $KEY forever; the intercept pops one byte per call.
        let mut rom = vec![0u8; 0x3000];
        rom[0x0000] = 0xCD; // CALL 0x0049
        rom[0x0001] = 0x49;
        rom[0x0002] = 0x00;
        rom[0x0003] = 0xC3; // JP 0x0000
        rom[0x0004] = 0x00;
        rom[0x0005] = 0x00;
        // $KEY itself spins if ever entered for real.
        rom[0x0049] = 0xC3;
        rom[0x004A] = 0x49;
        rom[0x004B] = 0x00;

        let mut machine = Trs80::new();
        machine.load_rom(&rom).unwrap();
        machine.cpu.set_sp(0x9000);
        machine.injector.enqueue("OK");

        machine.step_frame(2_000);

        assert!(!machine.injector.is_active(), "queue fully drained");
        assert_eq!(machine.cpu.a(), b'K', "last injected character in A");
    }

    #[test]
    fn turbo_engages_while_queue_is_active() {
        let mut machine = interrupt_test_machine();
        machine.injector.enqueue("X");
        let before = machine.bus.elapsed();
        machine.run_frame();
        assert_eq!(machine.speed(), SpeedMode::Turbo);
        assert!(
            machine.bus.elapsed() - before >= TICKS_PER_FRAME * TURBO_MULTIPLIER,
            "turbo frame runs the multiplied budget"
        );
        assert!(machine.status_line().contains("[TURBO]"));

        // In turbo only every tenth frame renders.
        let drawn = (0..10).filter(|_| machine.take_render()).count();
        assert_eq!(drawn, 1);
    }

    #[test]
    fn normal_frame_consumes_the_frame_budget() {
        let mut machine = interrupt_test_machine();
        let before = machine.bus.elapsed();
        machine.run_frame();
        let elapsed = machine.bus.elapsed() - before;
        assert!(elapsed >= TICKS_PER_FRAME);
        assert!(elapsed < TICKS_PER_FRAME + 100, "overshoot is one instruction at most");
        assert!(machine.take_render(), "normal mode renders every frame");
    }
}
