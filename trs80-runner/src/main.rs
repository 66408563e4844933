//! TRS-80 Model I emulator binary.
//!
//! Runs the machine in a minifb window with cpal audio, or headless for a
//! fixed number of frames. The ROM is required; audio and display are not.

mod audio;
mod input;

use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use minifb::{Scale, Window, WindowOptions};

use audio::AudioOutput;
use machine_trs80::video::{HEIGHT, WIDTH};
use machine_trs80::Trs80;

const ROM_PATH: &str = "roms/level2.rom";
const TITLE: &str = "TRS-80 Model I";

/// Wall-clock frame period for Normal speed (~60 Hz).
const FRAME_PERIOD: Duration = Duration::from_micros(16_667);

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

struct CliArgs {
    load_name: Option<String>,
    disk_path: Option<PathBuf>,
    headless: bool,
    frames: u32,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        load_name: None,
        disk_path: None,
        headless: false,
        frames: 600,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--load" => {
                i += 1;
                cli.load_name = args.get(i).cloned();
            }
            "--disk" => {
                i += 1;
                cli.disk_path = args.get(i).map(PathBuf::from);
            }
            "--headless" => {
                cli.headless = true;
            }
            "--frames" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.frames = s.parse().unwrap_or(600);
                }
            }
            "--help" | "-h" => {
                eprintln!("Usage: trs80-runner [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --load <name>    Autoload software/<name>*.cas|.bas by prefix");
                eprintln!("  --disk <file>    Attach a JV1 .dsk image to drive 0");
                eprintln!("  --headless       Run without a window");
                eprintln!("  --frames <n>     Frames to run in headless mode [default: 600]");
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn make_machine(cli: &CliArgs) -> Trs80 {
    let mut machine = Trs80::new();

    // The ROM is the one fatal dependency.
    let rom = match fs::read(ROM_PATH) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("ROM load failed: {ROM_PATH}: {e}");
            eprintln!("Place a Level II BASIC image at {ROM_PATH}");
            process::exit(1);
        }
    };
    if let Err(e) = machine.load_rom(&rom) {
        eprintln!("ROM load failed: {e}");
        process::exit(1);
    }

    // Disk images are a recoverable peripheral: log and continue idle.
    if let Some(ref path) = cli.disk_path {
        match fs::read(path) {
            Ok(image) => {
                machine.attach_disk(0, image);
            }
            Err(e) => eprintln!("[FDC] cannot read {}: {e}", path.display()),
        }
    }

    if let Some(ref name) = cli.load_name {
        machine.autoload(name);
    }

    machine
}

// ---------------------------------------------------------------------------
// Frame loops
// ---------------------------------------------------------------------------

fn run_headless(machine: &mut Trs80, frames: u32) {
    for _ in 0..frames {
        machine.run_frame();
    }
    machine.dump_trace();
}

fn run_windowed(machine: &mut Trs80, mut window: Window) {
    let mut buffer = vec![0u32; WIDTH * HEIGHT];
    let mut samples: Vec<i16> = Vec::new();

    let mut audio_output = AudioOutput::new();
    if audio_output.is_none() {
        eprintln!("Warning: no audio device available, sound disabled");
    }

    let mut prev_status = String::new();
    let mut frame_start = Instant::now();

    while window.is_open() {
        // Rebuild the matrix from the currently held keys.
        machine.clear_keys();
        for key in window.get_keys() {
            for &(row, bit) in input::map_key(key) {
                machine.key_down(row, bit);
            }
        }

        machine.run_frame();

        samples.clear();
        machine.drain_audio(&mut samples);
        if let Some(ref mut out) = audio_output {
            out.push_samples(&samples);
        }

        if machine.take_render() {
            machine.render(&mut buffer);
            window
                .update_with_buffer(&buffer, WIDTH, HEIGHT)
                .unwrap_or_else(|e| eprintln!("Window update failed: {e}"));
        } else {
            window.update();
        }

        // Title tracks cassette transport and speed mode.
        let status = machine.status_line();
        if status != prev_status {
            if status.is_empty() {
                window.set_title(TITLE);
            } else {
                window.set_title(&format!("{TITLE} - {status}"));
            }
            prev_status = status;
        }

        // Pace Normal mode to the wall clock; Turbo runs free.
        if machine.speed() == machine_trs80::SpeedMode::Normal {
            let elapsed = frame_start.elapsed();
            if elapsed < FRAME_PERIOD {
                std::thread::sleep(FRAME_PERIOD - elapsed);
            }
        }
        frame_start = Instant::now();
    }

    machine.dump_trace();
}

fn main() {
    let cli = parse_args();
    let mut machine = make_machine(&cli);

    if cli.headless {
        run_headless(&mut machine, cli.frames);
    } else {
        let options = WindowOptions {
            scale: Scale::X2,
            ..WindowOptions::default()
        };
        match Window::new(TITLE, WIDTH, HEIGHT, options) {
            Ok(mut window) => {
                // Frame pacing is ours; disable minifb's own rate limit.
                window.set_target_fps(0);
                run_windowed(&mut machine, window);
            }
            Err(e) => {
                // A missing display is not fatal; fall back to headless.
                eprintln!("Warning: cannot open window ({e}); running headless");
                run_headless(&mut machine, cli.frames);
            }
        }
    }

    println!("Shutdown complete.");
}
