//! Cassette deck: 500-baud FSK playback and an edge-decoding recorder.
//!
//! Playback never mutates state per tick; the line level is a pure function
//! of (now - start) over the loaded byte stream, so the ROM's bit-banging
//! reader sees a perfectly stable signal regardless of host frame timing.

#![allow(clippy::cast_possible_truncation)]

/// T-states per data bit at 500 baud (1.77408 MHz clock).
pub const BIT_PERIOD: u64 = 3_548;
/// Square-wave half-period encoding a 0-bit (one full cycle per cell).
pub const HALF_0: u64 = 1_774;
/// Square-wave half-period encoding a 1-bit (two cycles per cell).
pub const HALF_1: u64 = 887;
/// Edge spacing at or below this is the second edge of a 1-bit cell.
pub const CYCLE_THRESHOLD: u64 = 2_600;
/// Gap that resets the recorder's cycle tracking (~113 ms); doubling as
/// the recording-inactivity auto-stop.
pub const IDLE_TIMEOUT: u64 = 200_000;
/// T-states per byte on tape.
pub const BYTE_PERIOD: u64 = 8 * BIT_PERIOD;

/// Playback keeps running this many zero bytes past the end of the stream
/// so edge-seeking loops in the ROM keep terminating.
const TRAILER_BYTES: u64 = 500;

/// With nothing playing the input line flips at roughly this period so
/// edge-wait loops time out instead of hanging.
const IDLE_TOGGLE_PERIOD: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CassetteState {
    Idle,
    Playing,
    Recording,
}

/// Recorder side: decodes rising edges on the port write path back into
/// bytes, MSB first.
#[derive(Default)]
struct Recorder {
    data: Vec<u8>,
    last_edge_t: u64,
    /// 1 while a cell-start edge is waiting for its partner.
    cycle_count: u8,
    byte: u8,
    bit_count: u8,
    last_activity_t: u64,
}

impl Recorder {
    fn start(&mut self, now: u64) {
        *self = Recorder {
            last_activity_t: now,
            ..Recorder::default()
        };
    }

    fn on_edge(&mut self, now: u64) {
        let gap = now.saturating_sub(self.last_edge_t);
        self.last_edge_t = now;

        if gap > IDLE_TIMEOUT {
            self.cycle_count = 0;
            return;
        }
        if self.cycle_count == 0 {
            self.cycle_count = 1;
            return;
        }
        if gap <= CYCLE_THRESHOLD {
            // Mid-cell edge: the pair encodes a 1. The next edge starts a
            // fresh cell.
            self.push_bit(true);
            self.cycle_count = 0;
        } else {
            // The previous cell had a lone edge (a 0); this edge is the
            // next cell's start.
            self.push_bit(false);
            self.cycle_count = 1;
        }
    }

    fn push_bit(&mut self, bit: bool) {
        self.byte = (self.byte << 1) | u8::from(bit);
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.data.push(self.byte);
            self.byte = 0;
            self.bit_count = 0;
        }
    }

    /// Zero-pad the partial byte and hand the stream over.
    fn flush(&mut self) -> Vec<u8> {
        if self.bit_count > 0 {
            self.data.push(self.byte << (8 - self.bit_count));
            self.byte = 0;
            self.bit_count = 0;
        }
        std::mem::take(&mut self.data)
    }
}

pub struct Cassette {
    state: CassetteState,
    /// Loaded .cas contents for playback.
    data: Vec<u8>,
    playback_start_t: u64,
    recorder: Recorder,
    filename: String,
    prev_port: u8,
}

impl Cassette {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: CassetteState::Idle,
            data: Vec::new(),
            playback_start_t: 0,
            recorder: Recorder::default(),
            filename: String::new(),
            prev_port: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> CassetteState {
        self.state
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_filename(&mut self, name: &str) {
        self.filename = name.to_string();
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// One-line transport status for the title bar.
    #[must_use]
    pub fn status(&self) -> String {
        match self.state {
            CassetteState::Idle => String::new(),
            CassetteState::Playing => format!("Playing \"{}\"", self.filename),
            CassetteState::Recording => format!("Recording \"{}\"", self.filename),
        }
    }

    pub fn load(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    pub fn start_playback(&mut self, now: u64) {
        self.state = CassetteState::Playing;
        self.playback_start_t = now;
    }

    pub fn start_recording(&mut self, now: u64) {
        self.recorder.start(now);
        self.state = CassetteState::Recording;
    }

    /// Stop the transport. If we were recording, returns the decoded bytes
    /// (partial byte zero-padded) for the caller to persist.
    pub fn stop(&mut self) -> Option<Vec<u8>> {
        let result = match self.state {
            CassetteState::Recording => Some(self.recorder.flush()),
            _ => None,
        };
        self.state = CassetteState::Idle;
        result
    }

    /// Port 0xFF write: bit 0 is the recorder clock line.
    pub fn on_port_write(&mut self, value: u8, now: u64) {
        if self.state == CassetteState::Recording {
            self.recorder.last_activity_t = now;
            if self.prev_port & 0x01 == 0 && value & 0x01 != 0 {
                self.recorder.on_edge(now);
            }
        }
        self.prev_port = value;
    }

    /// Current input line level (port 0xFF bit 7).
    #[must_use]
    pub fn input_level(&self, now: u64) -> bool {
        match self.state {
            CassetteState::Playing => self.signal_at(now - self.playback_start_t),
            // No tape: a slow toggle so edge-wait loops terminate.
            _ => (now / IDLE_TOGGLE_PERIOD) & 1 == 0,
        }
    }

    /// FSK level at `dt` ticks into playback. A single low half-period
    /// leads in; each bit cell is one cycle (0) or two cycles (1), always
    /// starting high; bytes beyond the stream read as zero.
    fn signal_at(&self, dt: u64) -> bool {
        if dt < HALF_0 {
            return false; // lead-in
        }
        let dt = dt - HALF_0;
        let bit_index = dt / BIT_PERIOD;
        let byte = self
            .data
            .get((bit_index / 8) as usize)
            .copied()
            .unwrap_or(0x00);
        let bit = byte & (0x80 >> (bit_index % 8)) != 0;

        let half = if bit { HALF_1 } else { HALF_0 };
        ((dt % BIT_PERIOD) / half) & 1 == 0
    }

    /// Snap the playback clock so "now" is the start of the byte the head
    /// is currently inside. Called once when the ROM's bit reader locks on.
    pub fn realign(&mut self, now: u64) {
        if self.state != CassetteState::Playing {
            return;
        }
        let elapsed = now - self.playback_start_t;
        let byte_index = elapsed.saturating_sub(HALF_0) / BYTE_PERIOD;
        self.playback_start_t = now - HALF_0 - byte_index * BYTE_PERIOD;
    }

    /// Playback has run past the data plus the trailer pad.
    #[must_use]
    pub fn playback_done(&self, now: u64) -> bool {
        self.state == CassetteState::Playing
            && now - self.playback_start_t
                > (self.data.len() as u64 + TRAILER_BYTES) * BYTE_PERIOD
    }

    /// Recording has seen no port writes for the idle timeout.
    #[must_use]
    pub fn recording_idle(&self, now: u64) -> bool {
        self.state == CassetteState::Recording
            && now.saturating_sub(self.recorder.last_activity_t) > IDLE_TIMEOUT
    }
}

impl Default for Cassette {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Analytic rising-edge times for a byte stream, mirroring the
    /// waveform `signal_at` produces.
    fn edges_for(data: &[u8]) -> Vec<u64> {
        let mut edges = Vec::new();
        for (i, &byte) in data.iter().enumerate() {
            for bit in 0..8u64 {
                let cell = HALF_0 + (i as u64 * 8 + bit) * BIT_PERIOD;
                edges.push(cell);
                if byte & (0x80 >> bit) != 0 {
                    edges.push(cell + 2 * HALF_1);
                }
            }
        }
        edges
    }

    fn record(edge_times: &[u64]) -> Vec<u8> {
        let mut cas = Cassette::new();
        cas.start_recording(0);
        for &t in edge_times {
            cas.on_port_write(0x01, t);
            cas.on_port_write(0x00, t + 10);
        }
        // One trailing cell edge so the final bit's cell is delimited.
        let last = edge_times.last().copied().unwrap_or(0);
        cas.on_port_write(0x01, last + BIT_PERIOD);
        cas.stop().expect("was recording")
    }

    #[test]
    fn encode_decode_identity_on_whole_bytes() {
        let data = [0xA5, 0x55, 0x00, 0xFF, 0x3C];
        let decoded = record(&edges_for(&data));
        assert_eq!(&decoded[..data.len()], &data);
    }

    #[test]
    fn playback_starts_with_low_lead_in() {
        let mut cas = Cassette::new();
        cas.load(vec![0xFF]);
        cas.start_playback(0);
        assert!(!cas.input_level(0));
        assert!(!cas.input_level(HALF_0 - 1));
        assert!(cas.input_level(HALF_0), "first bit cell starts high");
    }

    #[test]
    fn zero_bit_is_one_cycle_one_bit_is_two() {
        let mut cas = Cassette::new();
        cas.load(vec![0x80]); // first bit 1, rest 0
        cas.start_playback(0);

        // Bit 0 (a 1): high, low, high, low at 887-tick halves.
        let cell = HALF_0;
        assert!(cas.input_level(cell));
        assert!(!cas.input_level(cell + HALF_1));
        assert!(cas.input_level(cell + 2 * HALF_1));
        assert!(!cas.input_level(cell + 3 * HALF_1));

        // Bit 1 (a 0): high for 1774, low for 1774.
        let cell = HALF_0 + BIT_PERIOD;
        assert!(cas.input_level(cell));
        assert!(cas.input_level(cell + HALF_0 - 1));
        assert!(!cas.input_level(cell + HALF_0));
    }

    #[test]
    fn exhausted_tape_keeps_toggling_as_zero_bits() {
        let mut cas = Cassette::new();
        cas.load(vec![0xAA]);
        cas.start_playback(0);
        let past_end = HALF_0 + 20 * BIT_PERIOD;
        assert!(cas.input_level(past_end), "padding cells still pulse");
    }

    #[test]
    fn idle_line_toggles_slowly() {
        let cas = Cassette::new();
        let a = cas.input_level(0);
        let b = cas.input_level(IDLE_TOGGLE_PERIOD);
        assert_ne!(a, b);
    }

    #[test]
    fn realign_snaps_to_byte_boundary() {
        let mut cas = Cassette::new();
        cas.load(vec![0x00; 16]);
        cas.start_playback(0);

        // Drift 1000 ticks into byte 2
        let now = HALF_0 + 2 * BYTE_PERIOD + 1_000;
        cas.realign(now);
        // After realignment the head is exactly at the start of byte 2's
        // first cell: the signal goes high there, having been low just
        // before (the previous cell's trailing half).
        assert!(cas.input_level(now));
        assert!(!cas.input_level(now - 1));
    }

    #[test]
    fn long_gap_resets_cycle_tracking() {
        let mut cas = Cassette::new();
        cas.start_recording(0);
        cas.on_port_write(0x01, 1_000);
        cas.on_port_write(0x00, 1_010);
        // Huge gap, then a clean 0-bit cell pair
        let base = 1_000 + IDLE_TIMEOUT + 50_000;
        cas.on_port_write(0x01, base);
        cas.on_port_write(0x00, base + 10);
        for i in 1..=8u64 {
            cas.on_port_write(0x01, base + i * BIT_PERIOD);
            cas.on_port_write(0x00, base + i * BIT_PERIOD + 10);
        }
        let bytes = cas.stop().unwrap();
        assert_eq!(bytes, vec![0x00], "eight clean zero bits, no stray one");
    }

    #[test]
    fn partial_byte_zero_padded_on_stop() {
        let mut cas = Cassette::new();
        cas.start_recording(0);
        // Two 1-bits (pairs of close edges), then stop mid-byte.
        for cell in 0..2u64 {
            let t = 1_000 + cell * BIT_PERIOD;
            cas.on_port_write(0x01, t);
            cas.on_port_write(0x00, t + 10);
            cas.on_port_write(0x01, t + 2 * HALF_1);
            cas.on_port_write(0x00, t + 2 * HALF_1 + 10);
        }
        let bytes = cas.stop().unwrap();
        assert_eq!(bytes, vec![0xC0], "11 followed by zero padding");
    }

    #[test]
    fn auto_stop_predicates() {
        let mut cas = Cassette::new();
        cas.load(vec![0x00; 4]);
        cas.start_playback(0);
        assert!(!cas.playback_done(BYTE_PERIOD));
        assert!(cas.playback_done((4 + 501) * BYTE_PERIOD + HALF_0));

        let mut cas = Cassette::new();
        cas.start_recording(0);
        assert!(!cas.recording_idle(IDLE_TIMEOUT));
        assert!(cas.recording_idle(IDLE_TIMEOUT + 1));
    }
}
