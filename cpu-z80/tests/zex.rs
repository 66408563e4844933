//! ZEXDOC/ZEXALL integration tests.
//!
//! The exerciser images are not redistributable, so these tests are ignored
//! by default; drop `zexdoc.com`/`zexall.com` into `tests/data/` and run
//! with `--ignored`.

use cpu_z80::Z80;
use emu_core::{Bus, SimpleBus};

fn run_zex(binary: &[u8]) -> bool {
    let mut bus = SimpleBus::new();
    let mut cpu = Z80::new();

    bus.load(0x0100, binary);
    bus.load(0x0000, &[0x76]); // warm boot -> HALT
    bus.load(0x0005, &[0xC9]); // BDOS entry (intercepted)
    bus.load(0x0006, &[0x00, 0xF0]); // top of TPA

    cpu.set_pc(0x0100);
    cpu.set_sp(0xF000);

    let mut output = String::new();

    loop {
        let pc = cpu.pc();

        if pc == 0x0005 {
            match cpu.c() {
                2 => output.push(cpu.e() as char),
                9 => {
                    let mut addr = cpu.de();
                    loop {
                        let ch = bus.peek(addr);
                        if ch == b'$' {
                            break;
                        }
                        output.push(ch as char);
                        addr = addr.wrapping_add(1);
                    }
                }
                _ => {}
            }
            cpu.force_ret(&mut bus);
            continue;
        }

        if pc == 0x0000 || cpu.halted() {
            break;
        }

        cpu.step(&mut bus);
    }

    eprintln!("{output}");
    !output.contains("ERROR")
}

#[test]
#[ignore]
fn zexdoc() {
    let binary =
        std::fs::read("tests/data/zexdoc.com").expect("tests/data/zexdoc.com not found");
    assert!(run_zex(&binary), "ZEXDOC reported errors");
}

#[test]
#[ignore]
fn zexall() {
    let binary =
        std::fs::read("tests/data/zexall.com").expect("tests/data/zexall.com not found");
    assert!(run_zex(&binary), "ZEXALL reported errors");
}
