//! ROM-entry intercepts for instant software loading.
//!
//! The Level II ROM reaches a handful of well-known addresses on its way
//! into cassette I/O. Recognising those PCs lets the emulator substitute
//! host-side semantics: SYSTEM files decode straight into RAM, BASIC text
//! files type themselves, CLOAD arms real FSK playback, CSAVE arms the
//! recorder. Each `on_*` hook is called every step and checks the PC and
//! transport state itself.

use std::fs;
use std::path::{Path, PathBuf};

use cpu_z80::Z80;
use emu_core::Bus as _;

use crate::bus::Bus;
use crate::cassette::CassetteState;
use crate::injector::KeyInjector;

/// LOPHD: SYSTEM loader entry, before the cassette motor turns on.
pub const ROM_SYSTEM_ENTRY: u16 = 0x02CE;
/// CSRDON: CLOAD leader/sync search entry.
pub const ROM_SYNC_SEARCH: u16 = 0x0293;
/// CSAVE write-leader entry.
pub const ROM_WRITE_LEADER: u16 = 0x0284;
/// BASIC warm restart (prints READY and loops).
pub const ROM_BASIC_READY: u16 = 0x1A19;
/// Two-byte pointer to the 6-character filename argument.
pub const ROM_FILENAME_PTR: u16 = 0x40A7;
/// First call into the cassette byte reader: realign the tape clock here.
pub const ROM_CASIN_FIRST: u16 = 0x0235;
/// Return from the cassette byte reader: one full byte is in A.
pub const ROM_CASIN_RET: u16 = 0x0240;

/// Directory searched for `.cas` and `.bas` software.
const SOFTWARE_DIR: &str = "software";

// SYSTEM tape framing
const SYNC_BYTE: u8 = 0xA5;
const SYSTEM_TYPE: u8 = 0x55;
const BLOCK_DATA: u8 = 0x3C;
const BLOCK_EOF: u8 = 0x78;

/// A parsed SYSTEM tape: named, with load blocks and an execute address.
pub struct SystemFile {
    pub name: String,
    pub blocks: Vec<(u16, Vec<u8>)>,
    pub exec: u16,
}

/// Parse a SYSTEM-format `.cas` image.
///
/// Checksum mismatches are logged and loading continues, matching what the
/// ROM loader does on real hardware; structural damage (missing sync, bad
/// type byte, truncation, unknown marker) is an error and the caller falls
/// back to genuine cassette playback.
pub fn parse_system_cas(data: &[u8]) -> Result<SystemFile, String> {
    let mut i = 0;
    while i < data.len() && data[i] == 0x00 {
        i += 1; // leader
    }

    if data.get(i) != Some(&SYNC_BYTE) {
        return Err("no 0xA5 sync byte".into());
    }
    i += 1;
    if data.get(i) != Some(&SYSTEM_TYPE) {
        return Err("not a SYSTEM file (type byte != 0x55)".into());
    }
    i += 1;

    let name_bytes = data.get(i..i + 6).ok_or("truncated filename")?;
    let name = name_bytes
        .iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim_end()
        .to_string();
    i += 6;

    let mut blocks = Vec::new();
    loop {
        let marker = *data.get(i).ok_or("missing EOF block")?;
        i += 1;

        match marker {
            BLOCK_DATA => {
                let header = data.get(i..i + 3).ok_or("truncated block header")?;
                let count = if header[0] == 0 { 256 } else { usize::from(header[0]) };
                let load = u16::from(header[1]) | u16::from(header[2]) << 8;
                i += 3;

                let payload = data.get(i..i + count).ok_or("truncated block data")?;
                let stored = *data.get(i + count).ok_or("truncated checksum")?;
                let computed = payload
                    .iter()
                    .fold(header[1].wrapping_add(header[2]), |sum, &b| {
                        sum.wrapping_add(b)
                    });
                if computed != stored {
                    eprintln!(
                        "[SYSTEM] checksum mismatch in block at {load:04X} \
                         (computed {computed:02X}, stored {stored:02X})"
                    );
                }
                blocks.push((load, payload.to_vec()));
                i += count + 1;
            }
            BLOCK_EOF => {
                let exec_bytes = data.get(i..i + 2).ok_or("truncated EOF block")?;
                let exec = u16::from(exec_bytes[0]) | u16::from(exec_bytes[1]) << 8;
                return Ok(SystemFile { name, blocks, exec });
            }
            other => return Err(format!("unknown block marker {other:02X}")),
        }
    }
}

/// Sniff whether a `.cas` image is a SYSTEM (machine-language) tape.
fn is_system_cas(data: &[u8]) -> bool {
    let mut i = 0;
    while i < data.len() && data[i] == 0x00 {
        i += 1;
    }
    data.get(i) == Some(&SYNC_BYTE) && data.get(i + 1) == Some(&SYSTEM_TYPE)
}

/// Read the filename the ROM collected: follow the pointer at 0x40A7, skip
/// an optional opening quote, take up to six printable characters, and
/// trim trailing spaces.
fn extract_filename(bus: &Bus) -> String {
    let mut ptr = u16::from(bus.peek(ROM_FILENAME_PTR))
        | u16::from(bus.peek(ROM_FILENAME_PTR + 1)) << 8;
    if bus.peek(ptr) == b'"' {
        ptr = ptr.wrapping_add(1);
    }
    let mut name = String::new();
    for offset in 0..6 {
        let ch = bus.peek(ptr.wrapping_add(offset));
        if ch == 0x00 || ch == b'"' || !(0x20..=0x7E).contains(&ch) {
            break;
        }
        name.push(ch as char);
    }
    name.trim_end().to_string()
}

/// Find a software file whose stem starts with `name` (case-insensitive).
/// The shortest matching stem wins; `.bas` beats `.cas` on equal stems.
/// An empty name matches everything (bare CLOAD takes the first tape).
fn find_software(name: &str, tag: &str) -> Option<PathBuf> {
    println!("[{tag}] searching for: '{name}'");
    let needle = name.to_lowercase();

    let entries = fs::read_dir(SOFTWARE_DIR).ok()?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            let ext = p
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if ext != "cas" && ext != "bas" {
                return false;
            }
            p.file_stem()
                .map(|s| s.to_string_lossy().to_lowercase().starts_with(&needle))
                .unwrap_or(false)
        })
        .collect();

    if matches.is_empty() {
        println!("[{tag}] no match for: '{name}'");
        return None;
    }

    matches.sort_by_key(|p| {
        let stem_len = p.file_stem().map_or(usize::MAX, |s| s.len());
        let is_bas = p
            .extension()
            .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case("bas"));
        (stem_len, !is_bas, p.clone())
    });

    println!("[{tag}] picking: '{}'", matches[0].display());
    Some(matches[0].clone())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Write SYSTEM blocks into memory and point the CPU at the entry address.
fn apply_system_file(file: &SystemFile, cpu: &mut Z80, bus: &mut Bus) {
    for (load, payload) in &file.blocks {
        for (offset, &byte) in payload.iter().enumerate() {
            bus.write(load.wrapping_add(offset as u16), byte);
        }
    }
    cpu.set_pc(file.exec);
    println!(
        "[SYSTEM] loaded '{}' ({} blocks), exec {:04X}",
        file.name,
        file.blocks.len(),
        file.exec
    );
}

#[derive(Default)]
pub struct SoftwareLoader {
    /// Set at the SYSTEM entry; suppresses the CLOAD intercept for the
    /// same file when the fast path fails.
    system_active: bool,

    // CLOAD progress tracking
    cload_active: bool,
    cload_realigned: bool,
    cload_byte_count: usize,
    cload_sync_pos: usize,

    // --load autoload state
    cli_autoload_path: Option<PathBuf>,
    cli_autorun: bool,
}

impl SoftwareLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate a `--load <name>` argument into queued keystrokes and
    /// pending transport state.
    pub fn setup_from_cli(&mut self, name: &str, injector: &mut KeyInjector) {
        let Some(path) = find_software(name, "LOAD") else {
            eprintln!("[LOAD] no file found matching: {name}");
            return;
        };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        match extension_of(&path).as_str() {
            "cas" => {
                let data = fs::read(&path).unwrap_or_default();
                if is_system_cas(&data) {
                    // SYSTEM is interactive: the loader prompts "*?" and
                    // reads the name through $KEY. The leading newline
                    // answers the cold-boot MEMORY SIZE? prompt.
                    injector.enqueue(&format!("\nSYSTEM\n{stem}\n"));
                } else {
                    // BASIC tape: CLOAD plays it, then RUN on completion.
                    self.cli_autoload_path = Some(path);
                    injector.enqueue("CLOAD\n");
                    self.cli_autorun = true;
                }
            }
            "bas" => {
                match fs::read_to_string(&path) {
                    Ok(text) => {
                        injector.enqueue_program(&text);
                        injector.enqueue("RUN\n");
                    }
                    Err(e) => eprintln!("[BAS] cannot read {}: {e}", path.display()),
                }
            }
            _ => {}
        }
    }

    /// SYSTEM loader entry (LOPHD): fast-load a matching `.cas` directly
    /// into RAM before the cassette motor ever turns on.
    pub fn on_system_entry(&mut self, pc: u16, cpu: &mut Z80, bus: &mut Bus) {
        if pc != ROM_SYSTEM_ENTRY {
            return;
        }
        self.system_active = true;

        let fname = extract_filename(bus);
        let Some(path) = find_software(&fname, "SYSTEM") else {
            return;
        };
        let Ok(data) = fs::read(&path) else {
            eprintln!("[SYSTEM] cannot read {}", path.display());
            return;
        };
        match parse_system_cas(&data) {
            Ok(file) => {
                apply_system_file(&file, cpu, bus);
                self.system_active = false; // success: CSRDON must not fire
            }
            Err(e) => {
                // Structural damage: fall through to the ROM's own loader.
                eprintln!("[SYSTEM] {}: {e}", path.display());
            }
        }
    }

    /// CLOAD sync-search entry (CSRDON): type a `.bas` file or arm real
    /// cassette playback for a `.cas` one.
    pub fn on_cload_entry(
        &mut self,
        pc: u16,
        cpu: &mut Z80,
        bus: &mut Bus,
        injector: &mut KeyInjector,
    ) {
        if pc != ROM_SYNC_SEARCH || bus.cassette.state() != CassetteState::Idle {
            return;
        }
        if self.system_active {
            // Reached from a failed SYSTEM fast-load; don't play the
            // SYSTEM tape as if it were BASIC.
            self.system_active = false;
            return;
        }

        let (path, fname) = if let Some(path) = self.cli_autoload_path.take() {
            println!("[CLOAD] using CLI autoload: {}", path.display());
            (Some(path), String::new())
        } else {
            let fname = extract_filename(bus);
            (find_software(&fname, "CLOAD"), fname)
        };
        let Some(path) = path else {
            println!("[CLOAD] no file found");
            return;
        };

        if extension_of(&path) == "bas" {
            match fs::read_to_string(&path) {
                Ok(text) => {
                    injector.enqueue_program(&text);
                    cpu.set_pc(ROM_BASIC_READY);
                }
                Err(e) => eprintln!("[BAS] cannot read {}: {e}", path.display()),
            }
            return;
        }

        match fs::read(&path) {
            Ok(data) => {
                let sync_pos = data.iter().position(|&b| b == SYNC_BYTE).unwrap_or(0);
                let total = data.len().saturating_sub(sync_pos + 1);
                println!("[CLOAD] {} ({total} bytes)", path.display());

                bus.cassette.load(data);
                bus.cassette
                    .set_filename(if fname.is_empty() { "(auto)" } else { fname.as_str() });
                let now = bus.elapsed();
                bus.cassette.start_playback(now);

                self.cload_active = true;
                self.cload_realigned = false;
                self.cload_byte_count = 0;
                self.cload_sync_pos = sync_pos;
            }
            Err(e) => eprintln!("[CLOAD] cannot read {}: {e}", path.display()),
        }
    }

    /// Track an in-progress CLOAD: realign the tape clock on the first
    /// byte-reader call, report progress and mismatches on each returned
    /// byte, and handle the playback-finished transition.
    pub fn on_cload_tracking(
        &mut self,
        pc: u16,
        cpu: &Z80,
        bus: &mut Bus,
        injector: &mut KeyInjector,
    ) {
        if !self.cload_active {
            return;
        }

        if bus.cassette.state() == CassetteState::Playing {
            if pc == ROM_CASIN_FIRST && !self.cload_realigned {
                let now = bus.elapsed();
                bus.cassette.realign(now);
                self.cload_realigned = true;
            }
            if pc == ROM_CASIN_RET {
                let actual = cpu.a();
                let data = bus.cassette.data();
                let index = self.cload_sync_pos + 1 + self.cload_byte_count;
                let expected = data.get(index).copied().unwrap_or(0xFF);
                let total = data.len().saturating_sub(self.cload_sync_pos + 1);

                if actual != expected {
                    eprintln!(
                        "[CLOAD] mismatch at byte {}/{total}: got {actual:02X}, \
                         expected {expected:02X}",
                        self.cload_byte_count
                    );
                }
                if self.cload_byte_count % 512 == 0 {
                    eprintln!("[CLOAD] progress: {}/{total} bytes", self.cload_byte_count);
                }
                self.cload_byte_count += 1;
            }
        }

        if bus.cassette.state() == CassetteState::Idle {
            eprintln!("[CLOAD] complete: {} bytes read", self.cload_byte_count);
            self.cload_active = false;
            if self.cli_autorun {
                injector.enqueue("RUN\n");
                self.cli_autorun = false;
            }
        }
    }

    /// CSAVE write-leader entry: start the recorder under the pending
    /// filename.
    pub fn on_csave_entry(&mut self, pc: u16, bus: &mut Bus) {
        if pc != ROM_WRITE_LEADER || bus.cassette.state() != CassetteState::Idle {
            return;
        }
        let fname = extract_filename(bus);
        bus.cassette.set_filename(&fname);
        let now = bus.elapsed();
        bus.cassette.start_recording(now);
        println!(
            "[CSAVE] recording{}",
            if fname.is_empty() {
                String::new()
            } else {
                format!(" \"{fname}\"")
            }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::Bus as _;

    /// Minimal SYSTEM tape: leader + sync + type + "TESTXX", one 2-byte
    /// block at 0x5000, EOF with exec 0x5000.
    fn scenario_tape() -> Vec<u8> {
        let mut cas = vec![0x00; 16];
        cas.extend_from_slice(&[SYNC_BYTE, SYSTEM_TYPE]);
        cas.extend_from_slice(b"TESTXX");
        cas.extend_from_slice(&[
            BLOCK_DATA,
            0x02,
            0x00,
            0x50,
            0xAA,
            0xBB,
            0x00u8.wrapping_add(0x50).wrapping_add(0xAA).wrapping_add(0xBB),
        ]);
        cas.extend_from_slice(&[BLOCK_EOF, 0x00, 0x50]);
        cas
    }

    #[test]
    fn system_fast_load_scenario() {
        let file = parse_system_cas(&scenario_tape()).expect("valid tape");
        assert_eq!(file.name, "TESTXX");
        assert_eq!(file.exec, 0x5000);

        let mut cpu = Z80::new();
        let mut bus = Bus::new();
        apply_system_file(&file, &mut cpu, &mut bus);

        assert_eq!(bus.peek(0x5000), 0xAA);
        assert_eq!(bus.peek(0x5001), 0xBB);
        assert_eq!(cpu.pc(), 0x5000);
    }

    #[test]
    fn count_zero_means_256_bytes() {
        let mut cas = vec![SYNC_BYTE, SYSTEM_TYPE];
        cas.extend_from_slice(b"BIG   ");
        cas.push(BLOCK_DATA);
        cas.extend_from_slice(&[0x00, 0x00, 0x60]); // count=0 -> 256 at 0x6000
        let payload: Vec<u8> = (0..=255).collect();
        let checksum = payload
            .iter()
            .fold(0x60u8, |sum, &b| sum.wrapping_add(b));
        cas.extend_from_slice(&payload);
        cas.push(checksum);
        cas.extend_from_slice(&[BLOCK_EOF, 0x00, 0x60]);

        let file = parse_system_cas(&cas).expect("valid tape");
        assert_eq!(file.blocks[0].1.len(), 256);
    }

    #[test]
    fn checksum_mismatch_still_loads() {
        let mut cas = scenario_tape();
        // Corrupt the stored checksum (last byte before the EOF block).
        let len = cas.len();
        cas[len - 4] ^= 0xFF;
        let file = parse_system_cas(&cas).expect("checksum errors are soft");
        assert_eq!(file.blocks.len(), 1);
    }

    #[test]
    fn structural_errors_are_hard() {
        assert!(parse_system_cas(&[0x00, 0x00]).is_err(), "no sync");
        assert!(
            parse_system_cas(&[SYNC_BYTE, 0x00]).is_err(),
            "wrong type byte"
        );

        let mut truncated = scenario_tape();
        truncated.truncate(truncated.len() - 4);
        assert!(parse_system_cas(&truncated).is_err(), "no EOF block");

        let mut bad_marker = scenario_tape();
        let pos = bad_marker.len() - 3;
        bad_marker[pos] = 0x99;
        assert!(parse_system_cas(&bad_marker).is_err(), "unknown marker");
    }

    #[test]
    fn filename_extraction_follows_pointer() {
        let mut bus = Bus::new();
        // Pointer at 0x40A7 -> 0x7000, name is "\"GAME  " quoted, padded.
        bus.write(ROM_FILENAME_PTR, 0x00);
        bus.write(ROM_FILENAME_PTR + 1, 0x70);
        for (i, &b) in b"\"GAME  ".iter().enumerate() {
            bus.write(0x7000 + i as u16, b);
        }
        assert_eq!(extract_filename(&bus), "GAME");
    }

    #[test]
    fn filename_stops_at_terminators() {
        let mut bus = Bus::new();
        bus.write(ROM_FILENAME_PTR, 0x00);
        bus.write(ROM_FILENAME_PTR + 1, 0x70);
        for (i, &b) in b"AB\x00XYZ".iter().enumerate() {
            bus.write(0x7000 + i as u16, b);
        }
        assert_eq!(extract_filename(&bus), "AB");
    }

    #[test]
    fn system_sniffer_checks_type_byte() {
        assert!(is_system_cas(&scenario_tape()));
        assert!(!is_system_cas(&[0x00, SYNC_BYTE, 0xD3])); // BASIC tape
        assert!(!is_system_cas(&[0x00, 0x00]));
    }

    #[test]
    fn csave_entry_arms_the_recorder() {
        let mut bus = Bus::new();
        let mut loader = SoftwareLoader::new();
        bus.write(ROM_FILENAME_PTR, 0x00);
        bus.write(ROM_FILENAME_PTR + 1, 0x70);
        for (i, &b) in b"SAVED\x00".iter().enumerate() {
            bus.write(0x7000 + i as u16, b);
        }

        loader.on_csave_entry(ROM_WRITE_LEADER, &mut bus);
        assert_eq!(bus.cassette.state(), CassetteState::Recording);
        assert_eq!(bus.cassette.filename(), "SAVED");

        // Firing again while recording is a no-op.
        loader.on_csave_entry(ROM_WRITE_LEADER, &mut bus);
        assert_eq!(bus.cassette.state(), CassetteState::Recording);
    }
}
