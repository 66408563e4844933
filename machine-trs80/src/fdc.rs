//! FD1771 floppy disk controller over flat JV1 sector images.
//!
//! Registers are memory-mapped through the bus:
//!   0x37EC  command (write) / status (read, clears INTRQ)
//!   0x37ED  track register
//!   0x37EE  sector register
//!   0x37EF  data register (byte-by-byte transfer engine)
//!
//! Drive select arrives separately from the 0x37E0-0x37E3 latch. JV1 images
//! are track-major: offset = (track * sectors_per_track + sector) * 256.

#![allow(clippy::cast_possible_truncation)]

pub const DRIVES: usize = 4;
pub const SECTORS_PER_TRACK: u8 = 10;
pub const BYTES_PER_SECTOR: usize = 256;
pub const MAX_TRACKS: u8 = 35;

// Status register bits
pub const ST_BUSY: u8 = 0x01;
pub const ST_DRQ: u8 = 0x02;
pub const ST_TRACK0: u8 = 0x04;
pub const ST_RNF: u8 = 0x10;
pub const ST_RECTYPE: u8 = 0x20;
pub const ST_NOTREADY: u8 = 0x80;

#[derive(Default)]
struct Drive {
    image: Vec<u8>,
    head_track: u8,
    loaded: bool,
}

impl Drive {
    fn sector_offset(track: u8, sector: u8) -> usize {
        (usize::from(track) * usize::from(SECTORS_PER_TRACK) + usize::from(sector))
            * BYTES_PER_SECTOR
    }

    fn read_sector(&self, track: u8, sector: u8, buf: &mut [u8; BYTES_PER_SECTOR]) {
        buf.fill(0);
        let offset = Self::sector_offset(track, sector);
        if let Some(src) = self.image.get(offset..offset + BYTES_PER_SECTOR) {
            buf.copy_from_slice(src);
        }
    }

    fn write_sector(&mut self, track: u8, sector: u8, buf: &[u8; BYTES_PER_SECTOR]) {
        let offset = Self::sector_offset(track, sector);
        if self.image.len() < offset + BYTES_PER_SECTOR {
            self.image.resize(offset + BYTES_PER_SECTOR, 0);
        }
        self.image[offset..offset + BYTES_PER_SECTOR].copy_from_slice(buf);
    }
}

pub struct Fdc {
    status: u8,
    track: u8,
    sector: u8,
    data: u8,

    drives: [Drive; DRIVES],
    drive_sel: u8,
    /// Sticky index of the last explicitly selected drive, so commands
    /// keep working after a motor-off deselect pulse.
    last_drive: usize,

    // Transfer buffer shared by Read Sector, Write Sector, Read Address
    buf: [u8; BYTES_PER_SECTOR],
    buf_pos: usize,
    buf_len: usize,

    // Pending Write Sector commit target
    write_pending: bool,
    write_track: u8,
    write_sector: u8,

    intrq: bool,
    /// Last step direction: +1 in (toward the hub), -1 out.
    last_dir: i8,
}

impl Fdc {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: 0,
            track: 0,
            sector: 0,
            data: 0,
            drives: Default::default(),
            drive_sel: 0,
            last_drive: 0,
            buf: [0; BYTES_PER_SECTOR],
            buf_pos: 0,
            buf_len: 0,
            write_pending: false,
            write_track: 0,
            write_sector: 0,
            intrq: false,
            last_dir: 1,
        }
    }

    /// Insert a flat JV1 image. Power-on status shows TRACK0 so the ROM's
    /// expansion-interface probe sees a live controller.
    pub fn insert_disk(&mut self, drive: usize, image: Vec<u8>) -> bool {
        if drive >= DRIVES {
            eprintln!("[FDC] invalid drive index {drive}");
            return false;
        }
        let tracks = image.len() / (usize::from(SECTORS_PER_TRACK) * BYTES_PER_SECTOR);
        eprintln!(
            "[FDC] drive {drive}: {} bytes, {tracks} tracks",
            image.len()
        );
        self.drives[drive].image = image;
        self.drives[drive].head_track = 0;
        self.drives[drive].loaded = true;
        self.status = ST_TRACK0;
        true
    }

    /// True if any drive has an image (expansion-interface detection).
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.drives.iter().any(|d| d.loaded)
    }

    #[must_use]
    pub fn intrq_pending(&self) -> bool {
        self.intrq
    }

    /// Drive-select latch write (0x37E0-0x37E3). Bits 0-2 select a drive;
    /// bit 3 is side select, ignored for single-sided images. All-zero
    /// deselects for motor control without forgetting the active drive.
    pub fn select_drive(&mut self, value: u8) {
        self.drive_sel = value;
        for i in 0..3 {
            if value & (1 << i) != 0 {
                self.last_drive = i;
                break;
            }
        }
    }

    fn current_drive(&self) -> usize {
        for i in 0..3 {
            if self.drive_sel & (1 << i) != 0 {
                return i;
            }
        }
        self.last_drive
    }

    fn drive_loaded(&self) -> bool {
        self.drives[self.current_drive()].loaded
    }

    /// Register read. Reading status clears INTRQ; reading data advances
    /// the transfer engine.
    pub fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0x37EC => {
                self.intrq = false;
                self.status
            }
            0x37ED => self.track,
            0x37EE => self.sector,
            0x37EF => {
                if self.buf_len > 0 && self.buf_pos < self.buf_len {
                    self.data = self.buf[self.buf_pos];
                    self.buf_pos += 1;
                    if self.buf_pos >= self.buf_len {
                        // Last byte delivered: command complete.
                        self.buf_len = 0;
                        self.status &= !(ST_BUSY | ST_DRQ);
                        self.intrq = true;
                    }
                }
                self.data
            }
            _ => 0xFF,
        }
    }

    /// Non-mutating register view for diagnostics.
    #[must_use]
    pub fn peek(&self, addr: u16) -> u8 {
        match addr {
            0x37EC => self.status,
            0x37ED => self.track,
            0x37EE => self.sector,
            0x37EF => self.data,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        match addr {
            0x37EC => self.execute_command(value),
            0x37ED => self.track = value,
            0x37EE => self.sector = value,
            0x37EF => {
                self.data = value;
                if self.write_pending && self.buf_pos < self.buf_len {
                    self.buf[self.buf_pos] = value;
                    self.buf_pos += 1;
                    if self.buf_pos >= self.buf_len {
                        // Buffer full: commit the sector to the image.
                        let drive = self.current_drive();
                        let (track, sector) = (self.write_track, self.write_sector);
                        if self.drives[drive].loaded {
                            let buf = self.buf;
                            self.drives[drive].write_sector(track, sector, &buf);
                        }
                        self.buf_len = 0;
                        self.write_pending = false;
                        self.status &= !(ST_BUSY | ST_DRQ);
                        self.intrq = true;
                    }
                }
            }
            _ => {}
        }
    }

    /// Dispatch a command byte by its high nibble.
    fn execute_command(&mut self, cmd: u8) {
        // Any new command aborts an in-progress transfer.
        self.buf_len = 0;
        self.buf_pos = 0;
        self.write_pending = false;
        self.intrq = false;

        match cmd >> 4 {
            0x0 => self.cmd_restore(),
            0x1 => self.cmd_seek(),
            0x2 => self.cmd_step(self.last_dir, false),
            0x3 => self.cmd_step(self.last_dir, true),
            0x4 => self.cmd_step(1, false),
            0x5 => self.cmd_step(1, true),
            0x6 => self.cmd_step(-1, false),
            0x7 => self.cmd_step(-1, true),
            0x8 | 0x9 => self.cmd_read_sector(),
            0xA | 0xB => self.cmd_write_sector(),
            0xC => self.cmd_read_address(),
            0xD => self.cmd_force_interrupt(cmd),
            // 0xE Read Track / 0xF Write Track: not needed to boot or run;
            // treat as an immediate abort.
            _ => self.cmd_force_interrupt(0xD0),
        }
    }

    fn not_ready(&mut self) {
        self.status = ST_NOTREADY;
        self.intrq = true;
    }

    fn cmd_restore(&mut self) {
        if !self.drive_loaded() {
            return self.not_ready();
        }
        let drive = self.current_drive();
        self.drives[drive].head_track = 0;
        self.track = 0;
        self.status = ST_TRACK0;
        self.intrq = true;
    }

    fn cmd_seek(&mut self) {
        if !self.drive_loaded() {
            return self.not_ready();
        }
        let drive = self.current_drive();
        let target = self.data.min(MAX_TRACKS - 1);
        self.last_dir = if target > self.drives[drive].head_track { 1 } else { -1 };
        self.drives[drive].head_track = target;
        self.track = target;
        self.status = if target == 0 { ST_TRACK0 } else { 0 };
        self.intrq = true;
    }

    fn cmd_step(&mut self, dir: i8, update_track: bool) {
        if !self.drive_loaded() {
            return self.not_ready();
        }
        let drive = self.current_drive();
        self.last_dir = dir;
        let next = self.drives[drive]
            .head_track
            .saturating_add_signed(dir)
            .min(MAX_TRACKS - 1);
        self.drives[drive].head_track = next;
        if update_track {
            self.track = next;
        }
        self.status = if next == 0 { ST_TRACK0 } else { 0 };
        self.intrq = true;
    }

    fn cmd_read_sector(&mut self) {
        if !self.drive_loaded() {
            return self.not_ready();
        }
        let drive = self.current_drive();
        let track = self.drives[drive].head_track;
        let sector = self.sector;

        if sector >= SECTORS_PER_TRACK || track >= MAX_TRACKS {
            self.status = ST_RNF;
            self.intrq = true;
            return;
        }

        let mut buf = [0u8; BYTES_PER_SECTOR];
        self.drives[drive].read_sector(track, sector, &mut buf);
        self.buf = buf;
        self.buf_pos = 0;
        self.buf_len = BYTES_PER_SECTOR;

        // TRSDOS writes the directory track (17) with deleted data marks,
        // which the FD1771 reports in the record-type bit.
        let deleted = track == 17;
        self.status = ST_BUSY | ST_DRQ | if deleted { ST_RECTYPE } else { 0 };
    }

    fn cmd_write_sector(&mut self) {
        if !self.drive_loaded() {
            return self.not_ready();
        }
        let drive = self.current_drive();
        let track = self.drives[drive].head_track;
        let sector = self.sector;

        if sector >= SECTORS_PER_TRACK || track >= MAX_TRACKS {
            self.status = ST_RNF;
            self.intrq = true;
            return;
        }

        self.write_pending = true;
        self.write_track = track;
        self.write_sector = sector;
        self.buf_pos = 0;
        self.buf_len = BYTES_PER_SECTOR;
        self.status = ST_BUSY | ST_DRQ;
    }

    /// Read Address: synthesize the 6-byte ID field for the next sector
    /// header. The FD1771 also copies the ID's track field into the track
    /// register, which the disk OS uses to verify seeks.
    fn cmd_read_address(&mut self) {
        if !self.drive_loaded() {
            return self.not_ready();
        }
        let drive = self.current_drive();
        let track = self.drives[drive].head_track;

        self.buf[0] = track;
        self.buf[1] = 0x00; // side 0
        self.buf[2] = self.sector;
        self.buf[3] = 0x01; // length code: 256 bytes
        self.buf[4] = 0x00; // CRC (not modelled)
        self.buf[5] = 0x00;
        self.buf_pos = 0;
        self.buf_len = 6;

        self.track = track;
        self.status = ST_BUSY | ST_DRQ;
    }

    fn cmd_force_interrupt(&mut self, cmd: u8) {
        self.status &= !(ST_BUSY | ST_DRQ);
        if cmd & 0x08 != 0 {
            self.intrq = true;
        }
    }
}

impl Default for Fdc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_with_pattern() -> Vec<u8> {
        let mut image = vec![0u8; usize::from(MAX_TRACKS)
            * usize::from(SECTORS_PER_TRACK)
            * BYTES_PER_SECTOR];
        for (i, byte) in image.iter_mut().enumerate() {
            *byte = (i / BYTES_PER_SECTOR) as u8 ^ (i as u8);
        }
        image
    }

    fn fdc_with_disk() -> Fdc {
        let mut fdc = Fdc::new();
        assert!(fdc.insert_disk(0, image_with_pattern()));
        fdc.select_drive(0x01);
        fdc
    }

    #[test]
    fn restore_homes_head() {
        let mut fdc = fdc_with_disk();
        fdc.data = 12;
        fdc.write(0x37EC, 0x10); // Seek to track 12
        assert!(fdc.intrq_pending());

        fdc.write(0x37EC, 0x00); // Restore
        assert_eq!(fdc.peek(0x37ED), 0);
        assert_eq!(fdc.peek(0x37EC), ST_TRACK0);
        assert!(fdc.intrq_pending());
    }

    #[test]
    fn status_read_clears_intrq() {
        let mut fdc = fdc_with_disk();
        fdc.write(0x37EC, 0x00); // Restore raises INTRQ
        assert!(fdc.intrq_pending());
        let _ = fdc.read(0x37EC);
        assert!(!fdc.intrq_pending());
    }

    #[test]
    fn seek_clamps_to_track_range() {
        let mut fdc = fdc_with_disk();
        fdc.write(0x37EF, 200); // data register = absurd track
        fdc.write(0x37EC, 0x10); // Seek
        assert_eq!(fdc.peek(0x37ED), MAX_TRACKS - 1);
    }

    #[test]
    fn step_in_and_out_with_track_update() {
        let mut fdc = fdc_with_disk();
        fdc.write(0x37EC, 0x50); // Step in, update track
        assert_eq!(fdc.peek(0x37ED), 1);
        fdc.write(0x37EC, 0x30); // Step (same direction), update
        assert_eq!(fdc.peek(0x37ED), 2);
        fdc.write(0x37EC, 0x70); // Step out, update
        assert_eq!(fdc.peek(0x37ED), 1);
        // Stepping out past track 0 pins at 0
        fdc.write(0x37EC, 0x70);
        fdc.write(0x37EC, 0x70);
        assert_eq!(fdc.peek(0x37ED), 0);
        assert_eq!(fdc.peek(0x37EC) & ST_TRACK0, ST_TRACK0);
    }

    #[test]
    fn read_sector_streams_256_bytes_then_completes() {
        let mut fdc = fdc_with_disk();
        fdc.write(0x37EC, 0x00); // Restore
        fdc.write(0x37EE, 0x00); // sector 0
        fdc.write(0x37EC, 0x80); // Read Sector

        assert_eq!(
            fdc.peek(0x37EC) & (ST_BUSY | ST_DRQ),
            ST_BUSY | ST_DRQ,
            "transfer in progress"
        );

        let image = image_with_pattern();
        for (i, &expected) in image[..BYTES_PER_SECTOR].iter().enumerate() {
            assert_eq!(fdc.read(0x37EF), expected, "byte {i}");
        }

        assert_eq!(fdc.peek(0x37EC) & (ST_BUSY | ST_DRQ), 0);
        assert!(fdc.intrq_pending());
        let _ = fdc.read(0x37EC);
        assert!(!fdc.intrq_pending());
    }

    #[test]
    fn out_of_range_sector_sets_record_not_found() {
        let mut fdc = fdc_with_disk();
        fdc.write(0x37EE, SECTORS_PER_TRACK); // one past the last sector
        fdc.write(0x37EC, 0x80);
        assert_eq!(fdc.peek(0x37EC) & ST_RNF, ST_RNF);
        assert!(fdc.intrq_pending());
    }

    #[test]
    fn write_sector_commits_on_final_byte() {
        let mut fdc = fdc_with_disk();
        fdc.write(0x37EC, 0x00); // Restore
        fdc.write(0x37EE, 0x03); // sector 3
        fdc.write(0x37EC, 0xA0); // Write Sector
        assert_eq!(fdc.peek(0x37EC) & (ST_BUSY | ST_DRQ), ST_BUSY | ST_DRQ);

        for i in 0..BYTES_PER_SECTOR {
            fdc.write(0x37EF, i as u8);
        }
        assert_eq!(fdc.peek(0x37EC) & (ST_BUSY | ST_DRQ), 0);
        assert!(fdc.intrq_pending());

        // Read it back
        fdc.write(0x37EE, 0x03);
        fdc.write(0x37EC, 0x80);
        for i in 0..BYTES_PER_SECTOR {
            assert_eq!(fdc.read(0x37EF), i as u8);
        }
    }

    #[test]
    fn read_address_synthesizes_id_field() {
        let mut fdc = fdc_with_disk();
        fdc.data = 7;
        fdc.write(0x37EC, 0x10); // Seek to 7
        fdc.write(0x37EE, 0x04);
        fdc.write(0x37EC, 0xC0); // Read Address

        let id: Vec<u8> = (0..6).map(|_| fdc.read(0x37EF)).collect();
        assert_eq!(id, vec![7, 0, 4, 1, 0, 0]);
        assert_eq!(fdc.peek(0x37ED), 7, "track register updated from ID");
        assert!(fdc.intrq_pending());
    }

    #[test]
    fn force_interrupt_with_bit3_raises_intrq() {
        let mut fdc = fdc_with_disk();
        fdc.write(0x37EE, 0x00);
        fdc.write(0x37EC, 0x80); // start a read
        fdc.write(0x37EC, 0xD8); // Force Interrupt, immediate
        assert_eq!(fdc.peek(0x37EC) & (ST_BUSY | ST_DRQ), 0);
        assert!(fdc.intrq_pending());

        let _ = fdc.read(0x37EC);
        fdc.write(0x37EC, 0xD0); // Force Interrupt, no INTRQ
        assert!(!fdc.intrq_pending());
    }

    #[test]
    fn deleted_data_mark_on_track_17() {
        let mut fdc = fdc_with_disk();
        fdc.data = 17;
        fdc.write(0x37EC, 0x10); // Seek to 17
        fdc.write(0x37EE, 0x00);
        fdc.write(0x37EC, 0x80);
        assert_eq!(fdc.peek(0x37EC) & ST_RECTYPE, ST_RECTYPE);
    }

    #[test]
    fn deselect_keeps_last_drive() {
        let mut fdc = Fdc::new();
        fdc.insert_disk(1, image_with_pattern());
        fdc.select_drive(0x02); // drive 1
        fdc.select_drive(0x00); // motor-off deselect
        fdc.write(0x37EC, 0x00); // Restore still addresses drive 1
        assert_eq!(fdc.peek(0x37EC), ST_TRACK0, "not NOTREADY");
    }

    #[test]
    fn commands_without_disk_report_not_ready() {
        let mut fdc = Fdc::new();
        fdc.select_drive(0x01);
        fdc.write(0x37EC, 0x00);
        assert_eq!(fdc.peek(0x37EC), ST_NOTREADY);
        assert!(fdc.intrq_pending());
    }
}
