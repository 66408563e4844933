//! CP/M harness for running the ZEXDOC/ZEXALL Z80 instruction exercisers.
//!
//! Usage:
//!   cargo run -p cpu-z80 --bin zextest --release -- path/to/zexdoc.com
//!
//! The exerciser's console output is printed in real time; it ends with
//! "Tests complete" and prints ERROR lines for any failing group.

use std::env;
use std::io::{self, Write};
use std::process;
use std::time::Instant;

use cpu_z80::Z80;
use emu_core::{Bus, SimpleBus};

/// Handle a CP/M BDOS call (function number in C). Returns true on exit.
fn handle_bdos(cpu: &mut Z80, bus: &SimpleBus, output: &mut String) -> bool {
    match cpu.c() {
        0 => return true,
        2 => {
            let ch = cpu.e() as char;
            print!("{ch}");
            io::stdout().flush().ok();
            output.push(ch);
        }
        9 => {
            // Print the $-terminated string at DE
            let mut addr = cpu.de();
            loop {
                let ch = bus.peek(addr);
                if ch == b'$' {
                    break;
                }
                print!("{}", ch as char);
                output.push(ch as char);
                addr = addr.wrapping_add(1);
            }
            io::stdout().flush().ok();
        }
        other => eprintln!("[ZEX] unhandled BDOS function {other}"),
    }
    false
}

fn run_exerciser(binary: &[u8]) -> bool {
    let mut bus = SimpleBus::new();
    let mut cpu = Z80::new();

    // CP/M layout: program at 0x0100, HALT at the warm-boot vector, RET at
    // the BDOS entry (we intercept before it runs), TPA top at 0x0006.
    bus.load(0x0100, binary);
    bus.load(0x0000, &[0x76]);
    bus.load(0x0005, &[0xC9]);
    bus.load(0x0006, &[0x00, 0xF0]);

    cpu.set_pc(0x0100);
    cpu.set_sp(0xF000);

    let start = Instant::now();
    let mut instructions: u64 = 0;
    let mut output = String::new();

    loop {
        let pc = cpu.pc();

        if pc == 0x0005 {
            if handle_bdos(&mut cpu, &bus, &mut output) {
                break;
            }
            cpu.force_ret(&mut bus);
            continue;
        }

        if pc == 0x0000 || cpu.halted() {
            break;
        }

        cpu.step(&mut bus);
        instructions += 1;
        if instructions % 500_000_000 == 0 {
            eprintln!(
                "[ZEX] {}M instructions, {:.0}s",
                instructions / 1_000_000,
                start.elapsed().as_secs_f64()
            );
        }
    }

    eprintln!(
        "\n[ZEX] done: {} instructions in {:.1}s",
        instructions,
        start.elapsed().as_secs_f64()
    );
    !output.contains("ERROR")
}

fn main() {
    let Some(path) = env::args().nth(1) else {
        eprintln!("Usage: zextest <zexdoc.com|zexall.com>");
        process::exit(1);
    };
    let binary = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("[ZEX] cannot read {path}: {e}");
            process::exit(1);
        }
    };
    if run_exerciser(&binary) {
        println!("\nPASS");
    } else {
        println!("\nFAIL");
        process::exit(1);
    }
}
