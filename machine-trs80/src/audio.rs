//! 1-bit audio down-mixer.
//!
//! The Model I has no speaker; games toggle bit 1 of port 0xFF at audio
//! rates into an external amplifier. The hardware path has an RC low-pass
//! that rounds the square edges and AC coupling that removes DC bias; both
//! are reproduced as first-order IIR filters.

pub const SAMPLE_RATE: u32 = 44_100;

/// T-states per host sample: 1,774,000 Hz / 44,100 Hz, rounded.
const TICKS_PER_SAMPLE: u64 = 40;

/// Low-pass alpha for a ~4 kHz cutoff at 44.1 kHz.
const LP_ALPHA: f32 = 0.363;

/// DC-block alpha: fc = rate * (1 - alpha) / 2pi, roughly 7 Hz.
const HP_ALPHA: f32 = 0.999;

/// Peak output; half scale leaves headroom.
const AMPLITUDE: f32 = 16_384.0;

/// Sub-sample accumulator plus the two filter stages and a sample buffer
/// the frontend drains once per frame.
pub struct Mixer {
    lp_state: f32,
    hp_state: f32,
    ticks_acc: u64,
    buf: Vec<i16>,
}

impl Mixer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lp_state: 0.0,
            hp_state: 0.0,
            ticks_acc: 0,
            buf: Vec::with_capacity(SAMPLE_RATE as usize / 60 + 64),
        }
    }

    /// Feed one instruction's worth of output level.
    ///
    /// `active` is false during cassette I/O (the toggles are FSK, not
    /// audio) and in turbo mode; the input then decays toward silence
    /// instead of cutting hard.
    pub fn update(&mut self, sound_bit: bool, ticks: u32, active: bool) {
        let raw = if active {
            if sound_bit {
                1.0
            } else {
                -1.0
            }
        } else {
            0.0
        };

        self.ticks_acc += u64::from(ticks);
        while self.ticks_acc >= TICKS_PER_SAMPLE {
            self.ticks_acc -= TICKS_PER_SAMPLE;

            // RC low-pass: y[n] = a*x[n] + (1-a)*y[n-1]
            let lp = LP_ALPHA * raw + (1.0 - LP_ALPHA) * self.lp_state;
            // DC block: hp[n] = lp[n] - lp[n-1] + a*hp[n-1]
            let hp = lp - self.lp_state + HP_ALPHA * self.hp_state;

            self.lp_state = lp;
            self.hp_state = hp;
            self.buf.push((hp * AMPLITUDE) as i16);
        }
    }

    /// Move the buffered samples into `out`.
    pub fn drain(&mut self, out: &mut Vec<i16>) {
        out.append(&mut self.buf);
    }

    /// Drop buffered samples and reset the filters, so leaving turbo mode
    /// doesn't replay a backlog of stale silence.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.lp_state = 0.0;
        self.hp_state = 0.0;
        self.ticks_acc = 0;
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forty_ticks_per_sample() {
        let mut mixer = Mixer::new();
        mixer.update(true, 39, true);
        let mut out = Vec::new();
        mixer.drain(&mut out);
        assert!(out.is_empty(), "below one sample period");

        mixer.update(true, 1, true);
        mixer.drain(&mut out);
        assert_eq!(out.len(), 1, "accumulator crossed the threshold once");
    }

    #[test]
    fn accumulator_carries_remainder() {
        let mut mixer = Mixer::new();
        mixer.update(true, 100, true);
        let mut out = Vec::new();
        mixer.drain(&mut out);
        assert_eq!(out.len(), 2, "100 ticks = 2 samples + 20 carried");

        mixer.update(true, 20, true);
        mixer.drain(&mut out);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn sustained_high_input_rises_then_decays_to_zero() {
        let mut mixer = Mixer::new();
        mixer.update(true, 40 * 50, true);
        let mut out = Vec::new();
        mixer.drain(&mut out);
        assert!(out[2] > 0, "low-pass output climbing");

        // The DC blocker pulls a sustained level back toward zero.
        mixer.update(true, 40 * 20_000, true);
        out.clear();
        mixer.drain(&mut out);
        let tail = out[out.len() - 1];
        assert!(tail.abs() < 500, "steady state is near silence, got {tail}");
    }

    #[test]
    fn muted_input_is_silent_from_rest() {
        let mut mixer = Mixer::new();
        mixer.update(true, 40 * 100, false);
        let mut out = Vec::new();
        mixer.drain(&mut out);
        assert!(out.iter().all(|&s| s == 0), "muted from rest stays at zero");
    }

    #[test]
    fn clear_resets_filters_and_buffer() {
        let mut mixer = Mixer::new();
        mixer.update(true, 40 * 100, true);
        mixer.clear();
        let mut out = Vec::new();
        mixer.drain(&mut out);
        assert!(out.is_empty());

        // After the reset a muted stream is exactly zero again.
        mixer.update(false, 40 * 10, false);
        mixer.drain(&mut out);
        assert!(out.iter().all(|&s| s == 0));
    }
}
