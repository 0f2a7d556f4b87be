//! Four-band speech activity / tilt / quality estimator.
//!
//! Feeds SILK and the DTX controller. This runs independently of the
//! tonality analyzer's own `vad_prob` output — SILK and the DTX gate both
//! want a cheap, low-latency activity flag that does not require a full
//! FFT pass, mirroring how `symphonia-codec-opus`'s `silk` module keeps
//! VAD-adjacent bookkeeping (`silk/mod.rs`) close to but separate from
//! the heavier analysis code.
use log::trace;

/// Split frequencies (Hz) for the four VAD bands, matching SILK's native
/// band split used for its own voice-activity weighting.
const BAND_EDGES_HZ: [f32; 5] = [0.0, 1000.0, 2000.0, 4000.0, 8000.0];

#[derive(Debug, Clone, Copy, Default)]
pub struct VadReport {
    pub activity: bool,
    /// Spectral tilt: positive means energy concentrated in low bands
    /// (voiced), negative means high-band-dominant (fricative/noise).
    pub tilt: f32,
    /// A coarse SNR-style quality estimate in `[0, 1]`.
    pub quality: f32,
    pub band_energy: [f32; 4],
}

/// One-pole band-energy trackers per VAD band, persisted across calls so
/// the tilt/quality estimate reacts smoothly rather than frame-to-frame.
pub struct Vad {
    sample_rate: u32,
    smoothed: [f32; 4],
    noise_floor: [f32; 4],
    active_hold: u32,
}

const ACTIVITY_HOLD_FRAMES: u32 = 3;

impl Vad {
    pub fn new(sample_rate: u32) -> Self {
        Vad { sample_rate, smoothed: [0.0; 4], noise_floor: [1e-3; 4], active_hold: 0 }
    }

    /// Computes a simple Goertzel-style band energy for `pcm` (mono, at
    /// `self.sample_rate`) and updates the smoothed state.
    fn band_energies(&self, pcm: &[i16]) -> [f32; 4] {
        let mut energies = [0.0f32; 4];
        for b in 0..4 {
            let lo = BAND_EDGES_HZ[b];
            let hi = BAND_EDGES_HZ[b + 1].min(self.sample_rate as f32 / 2.0);
            energies[b] = goertzel_band_energy(pcm, self.sample_rate as f32, lo, hi);
        }
        energies
    }

    pub fn process(&mut self, pcm: &[i16]) -> VadReport {
        let raw = self.band_energies(pcm);
        for b in 0..4 {
            self.smoothed[b] = 0.8 * self.smoothed[b] + 0.2 * raw[b];
            if raw[b] < self.noise_floor[b] {
                self.noise_floor[b] = 0.95 * self.noise_floor[b] + 0.05 * raw[b];
            } else {
                self.noise_floor[b] = 0.999 * self.noise_floor[b] + 0.001 * raw[b];
            }
        }

        let total: f32 = self.smoothed.iter().sum::<f32>().max(1e-9);
        let low = self.smoothed[0] + self.smoothed[1];
        let high = self.smoothed[2] + self.smoothed[3];
        let tilt = (low - high) / total;

        let snr: f32 = (0..4)
            .map(|b| (self.smoothed[b] / self.noise_floor[b].max(1e-9)).max(1.0).ln())
            .sum::<f32>()
            / 4.0;
        let quality = (snr / 4.0).clamp(0.0, 1.0);

        let instant_active = quality > 0.15;
        if instant_active {
            self.active_hold = ACTIVITY_HOLD_FRAMES;
        } else if self.active_hold > 0 {
            self.active_hold -= 1;
        }
        let activity = self.active_hold > 0;

        trace!("vad: tilt={tilt:.3} quality={quality:.3} activity={activity}");
        VadReport { activity, tilt, quality, band_energy: self.smoothed }
    }

    pub fn reset(&mut self) {
        self.smoothed = [0.0; 4];
        self.noise_floor = [1e-3; 4];
        self.active_hold = 0;
    }
}

/// Goertzel-algorithm energy estimate for the band `[lo_hz, hi_hz)`, sampled
/// at a handful of representative bins rather than a full DFT — cheap
/// enough to run every SILK subframe.
fn goertzel_band_energy(pcm: &[i16], sample_rate: f32, lo_hz: f32, hi_hz: f32) -> f32 {
    if pcm.is_empty() || hi_hz <= lo_hz {
        return 0.0;
    }
    let n = pcm.len();
    let bins = 4;
    let mut energy = 0.0f32;
    for i in 0..bins {
        let freq = lo_hz + (hi_hz - lo_hz) * (i as f32 + 0.5) / bins as f32;
        let k = (0.5 + (n as f32 * freq / sample_rate)).floor();
        let w = 2.0 * std::f32::consts::PI * k / n as f32;
        let coeff = 2.0 * w.cos();
        let (mut s0, mut s1, mut s2);
        s1 = 0.0;
        s2 = 0.0;
        for &sample in pcm {
            s0 = sample as f32 + coeff * s1 - s2;
            s2 = s1;
            s1 = s0;
        }
        energy += s1 * s1 + s2 * s2 - coeff * s1 * s2;
    }
    (energy / bins as f32).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_reports_no_activity() {
        let mut vad = Vad::new(16_000);
        let silence = [0i16; 320];
        for _ in 0..5 {
            let report = vad.process(&silence);
            assert!(!report.activity);
        }
    }

    #[test]
    fn loud_low_frequency_tone_is_positive_tilt_and_active() {
        let mut vad = Vad::new(16_000);
        let tone: Vec<i16> = (0..320).map(|i| ((i as f32 * 2.0 * std::f32::consts::PI * 300.0 / 16_000.0).sin() * 12000.0) as i16).collect();
        let mut last = VadReport::default();
        for _ in 0..8 {
            last = vad.process(&tone);
        }
        assert!(last.activity);
        assert!(last.tilt > 0.0);
    }

    #[test]
    fn reset_clears_hold_counter() {
        let mut vad = Vad::new(16_000);
        let tone: Vec<i16> = (0..320).map(|i| ((i as f32 * 0.3).sin() * 12000.0) as i16).collect();
        for _ in 0..8 {
            vad.process(&tone);
        }
        vad.reset();
        let report = vad.process(&[0i16; 320]);
        assert!(!report.activity);
    }
}
