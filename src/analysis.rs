//! Tonality analyzer.
//!
//! Runs once per 20 ms window on the raw (pre DC-reject, pre LSB-quant)
//! input and produces an [`AnalysisInfo`] consumed by mode decision and
//! the CELT VBR weighting. There is no FFT or MLP in a decoder (it never
//! needs either); this module imports `rustfft` for the 480-point forward
//! transform, the same crate `Bojan20-reelforge-standalone` and
//! `NickFlach-kannaka-memory` reach for elsewhere, and hand-rolls the
//! small fixed-topology classifier (dense -> GRU -> dense) directly,
//! since no crate here offers that specific shape.
use log::trace;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unsupported analyzer input rate: {0} Hz")]
    UnsupportedRate(u32),
}

pub const DETECT_SIZE: usize = 100;
const NB_TBANDS: usize = 18;
const NB_TONAL_SKIP_BANDS: usize = 9;
const FFT_SIZE: usize = 480;
const FOLD_SIZE: usize = 240;
/// Tonality band edges, bins [0, 240) folded into 18 bands.
const BAND_EDGES: [usize; NB_TBANDS + 1] =
    [0, 4, 8, 12, 16, 20, 24, 28, 32, 40, 48, 56, 68, 80, 96, 112, 136, 160, 240];

const MAX_NEURONS: usize = 32;
const BFCC_COUNT: usize = 8;

/// One analyzed window's worth of output.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInfo {
    pub valid: bool,
    pub tonality: f32,
    pub tonality_slope: f32,
    pub noisiness: f32,
    pub stationarity: f32,
    pub music_prob: f32,
    pub music_prob_min: f32,
    pub music_prob_max: f32,
    pub vad_prob: f32,
    pub bandwidth_index: i32,
    pub loudness: f32,
    pub max_pitch_ratio: f32,
}

impl Default for AnalysisInfo {
    fn default() -> Self {
        AnalysisInfo {
            valid: false,
            tonality: 0.0,
            tonality_slope: 0.0,
            noisiness: 0.0,
            stationarity: 0.0,
            music_prob: 0.5,
            music_prob_min: 0.5,
            music_prob_max: 0.5,
            vad_prob: 0.5,
            bandwidth_index: 20,
            loudness: 0.0,
            max_pitch_ratio: 0.0,
        }
    }
}

/// The tiny fixed classifier: `dense(8->32) -> GRU(32) -> dense(32->2)`,
/// producing `(MusicProb, VADProb)`. Weights are deterministic (seeded,
/// not trained) since this crate does not ship a training pipeline; the
/// topology and data flow are fixed, not the specific trained weights.
struct Classifier {
    dense_in: [[f32; BFCC_COUNT]; MAX_NEURONS],
    gru_state: [f32; MAX_NEURONS],
    gru_update: [[f32; MAX_NEURONS]; MAX_NEURONS],
    dense_out: [[f32; MAX_NEURONS]; 2],
}

impl Classifier {
    fn new() -> Self {
        let mut seed: u32 = 0x9E3779B9;
        let mut next = move || {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            ((seed >> 8) as f32 / u32::MAX as f32) * 2.0 - 1.0
        };

        let mut dense_in = [[0.0f32; BFCC_COUNT]; MAX_NEURONS];
        for row in dense_in.iter_mut() {
            for w in row.iter_mut() {
                *w = next() * 0.2;
            }
        }
        let mut gru_update = [[0.0f32; MAX_NEURONS]; MAX_NEURONS];
        for row in gru_update.iter_mut() {
            for w in row.iter_mut() {
                *w = next() * 0.1;
            }
        }
        let mut dense_out = [[0.0f32; MAX_NEURONS]; 2];
        for row in dense_out.iter_mut() {
            for w in row.iter_mut() {
                *w = next() * 0.2;
            }
        }

        Classifier { dense_in, gru_state: [0.0; MAX_NEURONS], gru_update, dense_out }
    }

    fn run(&mut self, bfcc: &[f32; BFCC_COUNT]) -> (f32, f32) {
        let mut hidden = [0.0f32; MAX_NEURONS];
        for n in 0..MAX_NEURONS {
            let mut acc = 0.0f32;
            for i in 0..BFCC_COUNT {
                acc += self.dense_in[n][i] * bfcc[i];
            }
            hidden[n] = acc.tanh();
        }

        let mut update = [0.0f32; MAX_NEURONS];
        for n in 0..MAX_NEURONS {
            let mut acc = hidden[n];
            for i in 0..MAX_NEURONS {
                acc += self.gru_update[n][i] * self.gru_state[i];
            }
            update[n] = 1.0 / (1.0 + (-acc).exp());
        }
        for n in 0..MAX_NEURONS {
            self.gru_state[n] = update[n] * self.gru_state[n] + (1.0 - update[n]) * hidden[n];
        }

        let mut out = [0.0f32; 2];
        for o in 0..2 {
            let mut acc = 0.0f32;
            for i in 0..MAX_NEURONS {
                acc += self.dense_out[o][i] * self.gru_state[i];
            }
            out[o] = 1.0 / (1.0 + (-acc).exp());
        }
        (out[0], out[1])
    }
}

/// Per-encoder-instance analyzer state. Owns the 100-slot `Info` ring and the fixed-size history arrays
/// the RFC's reference float path maintains between windows.
pub struct Analyzer {
    fft: Arc<dyn Fft<f32>>,
    in_mem: [f32; FOLD_SIZE * 3],
    in_mem_len: usize,
    low_e: [f32; NB_TBANDS],
    high_e: [f32; NB_TBANDS],
    prev_band_log2: [f32; NB_TBANDS],
    info: [AnalysisInfo; DETECT_SIZE],
    write_pos: usize,
    read_pos: usize,
    count: u32,
    classifier: Classifier,
    downmix_state: [f32; 3],
}

impl Analyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Analyzer {
            fft: planner.plan_fft_forward(FFT_SIZE),
            in_mem: [0.0; FOLD_SIZE * 3],
            in_mem_len: FOLD_SIZE, // pre-filled with 240 zeros on first call
            low_e: [0.0; NB_TBANDS],
            high_e: [0.0; NB_TBANDS],
            prev_band_log2: [0.0; NB_TBANDS],
            info: [AnalysisInfo::default(); DETECT_SIZE],
            write_pos: 0,
            read_pos: 0,
            count: 0,
            classifier: Classifier::new(),
            downmix_state: [0.0; 3],
        }
    }

    /// Downmixes to mono, resamples to 24 kHz, and folds 480-sample windows
    /// through the FFT whenever enough new samples have accumulated. API
    /// rates other than 48/24/16 kHz (8/12 kHz) are left un-analyzed: the
    /// written slot stays `valid: false` and the ring cursor does not move.
    pub fn run_analysis(&mut self, pcm: &[f32], channels: u8, api_rate: u32) -> Result<AnalysisInfo, Error> {
        if matches!(api_rate, 8_000 | 12_000) {
            return Ok(AnalysisInfo::default());
        }

        let mono = downmix(pcm, channels);
        let at_24k = resample_to_24k(&mono, api_rate, &mut self.downmix_state)?;

        for chunk in at_24k.chunks(1) {
            self.in_mem[self.in_mem_len] = chunk[0] * 32768.0;
            self.in_mem_len += 1;
            if self.in_mem_len >= FOLD_SIZE * 2 {
                self.fold_and_analyze();
            }
        }

        self.count = self.count.saturating_add(1);
        Ok(self.info[(self.write_pos + DETECT_SIZE - 1) % DETECT_SIZE])
    }

    fn fold_and_analyze(&mut self) {
        let mut spectrum: Vec<Complex32> = (0..FFT_SIZE)
            .map(|i| {
                let window = 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / FFT_SIZE as f32).cos();
                Complex32::new(self.in_mem[i] * window, 0.0)
            })
            .collect();
        self.fft.process(&mut spectrum);

        let mut band_energy = [0.0f32; NB_TBANDS];
        for b in 0..NB_TBANDS {
            let lo = BAND_EDGES[b];
            let hi = BAND_EDGES[b + 1];
            let mut e = 0.0f32;
            for k in lo..hi {
                e += spectrum[k].norm_sqr();
            }
            band_energy[b] = e / (32768.0 * 32768.0) / (FFT_SIZE as f32 * FFT_SIZE as f32);
        }

        for b in 0..NB_TBANDS {
            let e = band_energy[b];
            if e > self.low_e[b] {
                self.low_e[b] += 0.01 * (e - self.low_e[b]).min(15.0);
            } else {
                self.low_e[b] -= 0.01 * (self.low_e[b] - e).min(15.0);
            }
            if e > self.high_e[b] {
                self.high_e[b] += 0.01 * (e - self.high_e[b]).min(15.0);
            } else {
                self.high_e[b] -= 0.01 * (self.high_e[b] - e).min(15.0);
            }
        }

        let tonal_bands = &band_energy[NB_TONAL_SKIP_BANDS..];
        let frame_tonality = tonal_bands
            .iter()
            .enumerate()
            .map(|(i, &e)| e.max(1e-9).ln() * (1.0 + 0.03 * (i as f32 - NB_TBANDS as f32)))
            .sum::<f32>()
            / tonal_bands.len() as f32;
        let tonality = (1.0 / (1.0 + frame_tonality.abs())).clamp(0.0, 1.0);

        let total_energy: f32 = band_energy.iter().sum();
        let loudness = 20.0 * total_energy.max(1e-9).sqrt().log10();

        let root_sum: f32 = band_energy.iter().map(|e| e.max(0.0).sqrt()).sum();
        let stationarity = ((root_sum) / (NB_TBANDS as f32 * total_energy.max(1e-9)).sqrt())
            .clamp(0.0, 0.99)
            .powi(4);

        let below: f32 = spectrum[..64].iter().map(|c| c.norm_sqr()).sum();
        let above: f32 = spectrum[64..FOLD_SIZE].iter().map(|c| c.norm_sqr()).sum();
        let max_pitch_ratio = below / above.max(1e-9);

        let noisiness = (1.0 - tonality).clamp(0.0, 1.0);

        let mut bfcc = [0.0f32; BFCC_COUNT];
        for (k, slot) in bfcc.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (n, &e) in band_energy.iter().enumerate() {
                let log_e = e.max(1e-9).ln();
                acc += log_e
                    * (std::f32::consts::PI * k as f32 * (n as f32 + 0.5) / NB_TBANDS as f32).cos();
            }
            *slot = acc;
        }
        let (music_prob, vad_prob) = self.classifier.run(&bfcc);

        let bandwidth_index = detect_bandwidth(&band_energy, &self.high_e);

        let info = AnalysisInfo {
            valid: true,
            tonality,
            tonality_slope: tonality - self.prev_band_log2.iter().sum::<f32>() / NB_TBANDS as f32,
            noisiness,
            stationarity,
            music_prob,
            music_prob_min: (music_prob - 0.1).max(0.0),
            music_prob_max: (music_prob + 0.1).min(1.0),
            vad_prob,
            bandwidth_index,
            loudness,
            max_pitch_ratio,
        };

        if self.count <= 2 {
            let mut warm = info;
            warm.bandwidth_index = 20;
            self.info[self.write_pos] = warm;
        } else {
            self.info[self.write_pos] = info;
        }
        self.write_pos = (self.write_pos + 1) % DETECT_SIZE;
        self.prev_band_log2 = band_energy.map(|e| e.max(1e-9).ln());

        trace!("analysis: tonality={tonality:.3} music_prob={music_prob:.3} bandwidth_index={bandwidth_index}");

        // Keep the last 240 samples for continuity, discard the consumed fold.
        for i in 0..FOLD_SIZE {
            self.in_mem[i] = self.in_mem[i + FOLD_SIZE];
        }
        self.in_mem_len = FOLD_SIZE;
    }

    /// Chases `read_pos` and returns the lookahead-smoothed info for a frame
    /// of `frame_size` 48 kHz-equivalent samples. Every 8 subframes (960
    /// samples, 20 ms) make up exactly one ring-buffer slot, so a frame
    /// advances the cursor by `frame_size / 960` slots, not by its subframe
    /// count.
    pub fn get_info(&mut self, frame_size: u32) -> AnalysisInfo {
        let slots = (frame_size / 960).max(1) as usize;
        self.read_pos = (self.read_pos + slots) % DETECT_SIZE;
        let pos = (self.read_pos + DETECT_SIZE - 1) % DETECT_SIZE;
        self.info[pos]
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Analyzer::new()
    }
}

fn downmix(pcm: &[f32], channels: u8) -> Vec<f32> {
    if channels == 1 {
        return pcm.to_vec();
    }
    pcm.chunks(channels as usize).map(|f| f.iter().sum::<f32>() / channels as f32).collect()
}

/// Resamples mono PCM at `api_rate` to 24 kHz: a
/// 3-tap half-band high-pass for 48->24, 3x zero-order hold then the same
/// filter for 16->24, identity for 24->24. 8/12 kHz never reach here (
/// [`Analyzer::run_analysis`] returns un-analyzed before calling this).
fn resample_to_24k(mono: &[f32], api_rate: u32, hp_state: &mut [f32; 3]) -> Result<Vec<f32>, Error> {
    match api_rate {
        24_000 => Ok(mono.to_vec()),
        48_000 => {
            let mut out = Vec::with_capacity(mono.len() / 2);
            for pair in mono.chunks(2) {
                let x = pair[0];
                let filtered = 0.25 * hp_state[0] + 0.5 * hp_state[1] + 0.25 * x;
                hp_state[0] = hp_state[1];
                hp_state[1] = x;
                out.push(filtered);
            }
            Ok(out)
        }
        16_000 => {
            let mut held = Vec::with_capacity(mono.len() * 3 / 2);
            for &x in mono {
                held.push(x);
                held.push(x);
                held.push(x);
            }
            let mut out = Vec::with_capacity(held.len() / 2);
            for pair in held.chunks(2) {
                let x = pair[0];
                let filtered = 0.25 * hp_state[0] + 0.5 * hp_state[1] + 0.25 * x;
                hp_state[0] = hp_state[1];
                hp_state[1] = x;
                out.push(filtered);
            }
            Ok(out)
        }
        _ => Err(Error::UnsupportedRate(api_rate)),
    }
}

/// Highest band whose energy survives a noise-floor and spectral-mask
/// test, clamped with the 2-step SWB-forcing fallback.
fn detect_bandwidth(band_energy: &[f32; NB_TBANDS], high_e: &[f32; NB_TBANDS]) -> i32 {
    let max_energy = band_energy.iter().cloned().fold(0.0f32, f32::max).max(1e-9);
    let mut highest = 0i32;
    for (b, &e) in band_energy.iter().enumerate() {
        let noise_floor = high_e[b] * 3.0;
        if e > noise_floor && e > 0.05 * max_energy {
            highest = b as i32;
        }
    }
    match highest {
        0..=8 => 8,
        9..=12 => 12,
        13..=15 => 16,
        16..=17 => 18,
        _ => 20,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_analyzer_reports_invalid_until_warmed_up() {
        let mut analyzer = Analyzer::new();
        let silence = vec![0.0f32; 960];
        let info = analyzer.run_analysis(&silence, 1, 48_000).unwrap();
        assert!(!info.valid);
    }

    #[test]
    fn enough_frames_produce_valid_analysis() {
        let mut analyzer = Analyzer::new();
        let tone: Vec<f32> = (0..96_000).map(|i| 0.3 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48_000.0).sin()).collect();
        let mut last = AnalysisInfo::default();
        for chunk in tone.chunks(960) {
            last = analyzer.run_analysis(chunk, 1, 48_000).unwrap();
        }
        assert!(last.valid);
        assert!(last.music_prob_min <= last.music_prob);
        assert!(last.music_prob <= last.music_prob_max);
        assert!(last.vad_prob >= 0.0 && last.vad_prob <= 1.0);
    }

    #[test]
    fn unsupported_rate_is_rejected() {
        let mut analyzer = Analyzer::new();
        let err = analyzer.run_analysis(&[0.0; 10], 1, 44_100).unwrap_err();
        assert_eq!(err, Error::UnsupportedRate(44_100));
    }

    #[test]
    fn narrowband_input_rates_are_left_unanalyzed() {
        let mut analyzer = Analyzer::new();
        let tone: Vec<f32> = (0..8_000).map(|i| 0.3 * (2.0 * std::f32::consts::PI * 200.0 * i as f32 / 8_000.0).sin()).collect();
        let info = analyzer.run_analysis(&tone, 1, 8_000).unwrap();
        assert!(!info.valid);
        let info = analyzer.run_analysis(&tone, 1, 12_000).unwrap();
        assert!(!info.valid);
        assert_eq!(analyzer.count(), 0, "8/12 kHz input should never advance the analyzer's fold count");
    }

    #[test]
    fn get_info_advances_read_pos() {
        let mut analyzer = Analyzer::new();
        let tone: Vec<f32> = vec![0.1; 48_000];
        for chunk in tone.chunks(960) {
            let _ = analyzer.run_analysis(chunk, 1, 48_000);
        }
        let before = analyzer.read_pos;
        let _ = analyzer.get_info(960);
        assert_ne!(analyzer.read_pos, before);
    }
}
