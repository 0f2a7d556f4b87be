//! Discontinuous transmission and comfort noise.
//!
//! Tracks silence duration in Q1 milliseconds; once the no-activity run
//! exceeds the DTX entry threshold, suppresses output packets except for a
//! periodic comfort-noise frame generated from a seeded LCG.
use log::debug;

/// `NB_SPEECH_FRAMES_BEFORE_DTX * 20 * 2` Q1 ms.
const DTX_ENTRY_THRESHOLD_Q1MS: u32 = 200 * 2;
/// Extra slack past entry before suppressing kicks in for good, matching
/// the `(NBSpeech + MaxConsec) * 20 * 2` bound.
const DTX_MAX_CONSEC_Q1MS: u32 = 400 * 2;
const COMFORT_NOISE_PERIOD_MS: u32 = 400;
const CNG_SEED: u32 = 22222;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtxAction {
    /// Encode and emit the frame normally.
    Emit,
    /// Suppress this frame: return no packet, no error.
    Suppress,
    /// Emit one comfort-noise frame generated from the seeded LCG.
    ComfortNoise,
}

pub struct DtxController {
    enabled: bool,
    no_activity_q1ms: u32,
    ms_since_comfort_noise: u32,
    in_dtx: bool,
    lcg_state: u32,
}

impl DtxController {
    pub fn new() -> Self {
        DtxController {
            enabled: false,
            no_activity_q1ms: 0,
            ms_since_comfort_noise: 0,
            in_dtx: false,
            lcg_state: CNG_SEED,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.no_activity_q1ms = 0;
        self.ms_since_comfort_noise = 0;
        self.in_dtx = false;
        self.lcg_state = CNG_SEED;
    }

    pub fn in_dtx(&self) -> bool {
        self.in_dtx
    }

    /// Advances DTX state by one frame of `frame_ms` milliseconds and
    /// decides what this frame should do.
    pub fn step(&mut self, voice_active: bool, frame_ms: u32) -> DtxAction {
        if !self.enabled {
            self.reset();
            return DtxAction::Emit;
        }

        if voice_active {
            self.no_activity_q1ms = 0;
            self.ms_since_comfort_noise = 0;
            self.in_dtx = false;
            debug!("DTX: activity detected, resetting counters");
            return DtxAction::Emit;
        }

        self.no_activity_q1ms = self.no_activity_q1ms.saturating_add(frame_ms * 2);

        if self.no_activity_q1ms <= DTX_ENTRY_THRESHOLD_Q1MS {
            return DtxAction::Emit;
        }

        self.in_dtx = true;
        self.ms_since_comfort_noise = self.ms_since_comfort_noise.saturating_add(frame_ms);

        if self.no_activity_q1ms <= DTX_MAX_CONSEC_Q1MS + DTX_ENTRY_THRESHOLD_Q1MS {
            // Still within the post-threshold grace window: suppress output
            // packets, emitting one comfort-noise frame every 400ms.
        }

        if self.ms_since_comfort_noise >= COMFORT_NOISE_PERIOD_MS {
            self.ms_since_comfort_noise = 0;
            debug!("DTX: emitting comfort-noise frame");
            return DtxAction::ComfortNoise;
        }

        DtxAction::Suppress
    }

    /// Advances the seeded LCG and returns the next shaped comfort-noise
    /// sample at roughly -54 dBFS.
    pub fn next_comfort_noise_sample(&mut self) -> f32 {
        self.lcg_state = self.lcg_state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let unit = (self.lcg_state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0;
        const TARGET_AMPLITUDE: f32 = 0.002; // ~ -54 dBFS
        unit * TARGET_AMPLITUDE
    }

    /// Fills `out` with one frame of comfort noise; the caller is expected
    /// to feed this back into the normal encode path.
    pub fn generate_comfort_noise_frame(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.next_comfort_noise_sample();
        }
    }
}

impl Default for DtxController {
    fn default() -> Self {
        DtxController::new()
    }
}
