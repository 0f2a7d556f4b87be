//! Hybrid orchestrator.
//!
//! Splits the per-packet bit budget between SILK (0-8 kHz) and CELT
//! (8-20 kHz, start-band 17), runs the HB-gain and stereo-width fades,
//! stages CELT<->SILK transition redundancy, and drives both sub-encoders
//! through one shared [`crate::range::RangeEncoder`] instance.
use crate::celt::{CeltEncoder, CeltFrameReport};
use crate::range::RangeEncoder;
use crate::silk::{SilkEncoder, SilkFrameReport};
use crate::toc::Bandwidth as TocBandwidth;
use log::debug;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("hybrid mode only supports 480/960 sample frames, got {0}")]
    InvalidFrameSize(u32),

    #[error("redundancy payload ({redundancy} bytes) does not fit the packet budget ({budget} bytes)")]
    ScratchOverflow { redundancy: usize, budget: usize },

    #[error(transparent)]
    Range(#[from] crate::range::Error),
}

/// HB-gain + redundancy memory carried from one hybrid frame to the next.
#[derive(Debug, Clone)]
pub struct HybridState {
    pub prev_hb_gain: f32,
    pub stereo_width_current: u16,
    pub stereo_width_target: u16,
    pub prev_decode_only_middle: bool,
}

impl Default for HybridState {
    fn default() -> Self {
        HybridState {
            prev_hb_gain: 0.0,
            stereo_width_current: 16384,
            stereo_width_target: 16384,
            prev_decode_only_middle: false,
        }
    }
}

const OVERLAP: usize = 120;
const MAX_REDUNDANCY_BYTES: usize = 257;

/// 7-row rate table indexed by (frame-size bucket, FEC flag), giving a
/// per-channel CELT bps contribution at representative total bitrates.
/// Rows are `(total_bps, celt_bps_per_channel)`
/// sample points; values between rows are linearly interpolated.
const RATE_TABLE: [(i32, i32); 7] =
    [(8_000, 2_000), (12_000, 3_000), (16_000, 5_000), (20_000, 7_000), (28_000, 10_000), (40_000, 14_000), (64_000, 22_000)];

fn interpolate_celt_rate(total_bps: i32) -> i32 {
    if total_bps <= RATE_TABLE[0].0 {
        return RATE_TABLE[0].1;
    }
    for window in RATE_TABLE.windows(2) {
        let (lo_x, lo_y) = window[0];
        let (hi_x, hi_y) = window[1];
        if total_bps <= hi_x {
            let t = (total_bps - lo_x) as f32 / (hi_x - lo_x) as f32;
            return lo_y + ((hi_y - lo_y) as f32 * t) as i32;
        }
    }
    // Extrapolate beyond the top row: lastRow[entry] + (rate - lastRow[0]) / 2.
    let (last_x, last_y) = RATE_TABLE[RATE_TABLE.len() - 1];
    last_y + (total_bps - last_x) / 2
}

pub struct HybridOrchestrator {
    state: HybridState,
}

impl HybridOrchestrator {
    pub fn new() -> Self {
        HybridOrchestrator { state: HybridState::default() }
    }

    pub fn reset(&mut self) {
        self.state = HybridState::default();
    }

    /// Encodes one hybrid frame into `payload_target` bytes (minus any
    /// redundancy reserved below), returning the finished packet payload
    /// (range-coder bytes, with any transition-redundancy frame appended
    /// verbatim per RFC 6716 tail-append rules).
    #[allow(clippy::too_many_arguments)]
    pub fn encode_frame(
        &mut self,
        silk: &mut dyn SilkEncoder,
        celt: &mut dyn CeltEncoder,
        mid_pcm_16k: &[i16],
        celt_pcm_48k: &[i16],
        frame_samples_48k: u32,
        bandwidth: TocBandwidth,
        bitrate_bps: i32,
        channels: u8,
        payload_target_bytes: usize,
        cbr: bool,
        allow_transition_redundancy: bool,
        was_celt_previously: bool,
    ) -> Result<Vec<u8>, Error> {
        if frame_samples_48k != 480 && frame_samples_48k != 960 {
            return Err(Error::InvalidFrameSize(frame_samples_48k));
        }

        let redundancy_bytes = if allow_transition_redundancy && was_celt_previously {
            let rate = 1.5 * (bitrate_bps as f32 + (40.0 * channels as f32 + 20.0) * (200.0 - frame_rate_hz(frame_samples_48k)));
            ((rate / 8.0) as usize).min(MAX_REDUNDANCY_BYTES).min(payload_target_bytes.saturating_sub(1))
        } else {
            0
        };

        let redundancy_payload = if redundancy_bytes > 0 {
            Some(self.encode_redundancy_frame(celt, celt_pcm_48k, redundancy_bytes)?)
        } else {
            None
        };

        let budget_bytes = payload_target_bytes
            .checked_sub(redundancy_bytes)
            .ok_or(Error::ScratchOverflow { redundancy: redundancy_bytes, budget: payload_target_bytes })?;

        let celt_bps_per_channel = {
            let mut rate = interpolate_celt_rate(bitrate_bps);
            if cbr {
                rate += 100;
            }
            if matches!(bandwidth, TocBandwidth::SuperWideBand) {
                rate += 300;
            }
            if channels == 2 && rate >= 12_000 {
                rate -= 1000;
            }
            rate.max(2000)
        };
        let celt_bitrate = celt_bps_per_channel * channels as i32;

        let hb_gain = 1.0 - 2f32.powf(-(celt_bitrate as f32) / 1024.0);

        let mut buf = vec![0u8; budget_bytes.max(1)];
        let mut range = RangeEncoder::init(&mut buf);
        if cbr {
            range.shrink(0);
        }

        // Reserve header bits for VAD+LBRR flags at a fixed bit position so
        // they can be overwritten once the frame payload reveals their real
        // value. The placeholder is written first so `patch_initial_bits`
        // only ever touches already-flushed bytes.
        let reserved_bits = channels as u32 + 1;
        for _ in 0..8 {
            range.encode_bit_logp(false, 1)?;
        }

        let silk_report = silk
            .encode_frame(&mut range, mid_pcm_16k, silk_bandwidth(bandwidth), bitrate_bps - celt_bitrate)
            .map_err(|_| Error::InvalidFrameSize(frame_samples_48k))?;

        range.patch_initial_bits(silk_report.voice_activity as u32, reserved_bits)?;

        let redundancy_active = redundancy_bytes > 0 && range.tell() + 17 + 20 <= budget_bytes as u32 * 8;
        range.encode_bit_logp(redundancy_active, 12)?;
        if redundancy_active {
            range.encode_bit_logp(true, 1)?;
            range.encode_uniform((redundancy_bytes.saturating_sub(2)) as u32, 256)?;
        }

        let faded_pcm = self.apply_hb_gain_fade(celt_pcm_48k, hb_gain);

        let celt_report = celt
            .encode_frame(&mut range, &faded_pcm, frame_samples_48k, 17)
            .map_err(|_| Error::InvalidFrameSize(frame_samples_48k))?;

        self.state.prev_hb_gain = hb_gain;

        debug!(
            "hybrid frame: celt_bitrate={celt_bitrate} hb_gain={hb_gain:.3} redundancy_bytes={redundancy_bytes} \
             silk_voice_activity={} celt_transient={}",
            silk_report.voice_activity, celt_report.transient
        );

        let mut packet = range.done()?;
        if let Some(mut redundancy) = redundancy_payload {
            packet.append(&mut redundancy);
        }
        Ok(packet)
    }

    fn encode_redundancy_frame(&mut self, celt: &mut dyn CeltEncoder, pcm_48k: &[i16], budget_bytes: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; budget_bytes.max(1)];
        let mut range = RangeEncoder::init(&mut buf);
        const FIVE_MS_SAMPLES: usize = 48_000 / 200;
        let clipped = &pcm_48k[..pcm_48k.len().min(FIVE_MS_SAMPLES)];
        celt.encode_frame(&mut range, clipped, 240, 0).map_err(|_| Error::InvalidFrameSize(240))?;
        Ok(range.done()?)
    }

    /// Squared-window crossfade over [`OVERLAP`] samples between
    /// `self.state.prev_hb_gain` and `target_gain`.
    fn apply_hb_gain_fade(&self, pcm: &[i16], target_gain: f32) -> Vec<i16> {
        let mut out = Vec::with_capacity(pcm.len());
        let start_gain = self.state.prev_hb_gain;
        for (i, &sample) in pcm.iter().enumerate() {
            let gain = if i < OVERLAP {
                let t = i as f32 / OVERLAP as f32;
                let w = (std::f32::consts::FRAC_PI_2 * t).sin().powi(2);
                start_gain + (target_gain - start_gain) * w
            } else {
                target_gain
            };
            out.push(((sample as f32) * gain) as i16);
        }
        out
    }

    pub fn state(&self) -> &HybridState {
        &self.state
    }
}

impl Default for HybridOrchestrator {
    fn default() -> Self {
        HybridOrchestrator::new()
    }
}

fn frame_rate_hz(frame_samples_48k: u32) -> f32 {
    48_000.0 / frame_samples_48k as f32
}

fn silk_bandwidth(bandwidth: TocBandwidth) -> TocBandwidth {
    // SILK's own bandwidth is always capped at WB within a hybrid frame;
    // CELT covers the remainder up to `bandwidth` starting at band 17,
    // implicitly WB-or-below for SILK's own half.
    match bandwidth {
        TocBandwidth::SuperWideBand | TocBandwidth::FullBand => TocBandwidth::WideBand,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::silk::ReferenceSilkEncoder;
    use crate::celt::ReferenceCeltEncoder;

    #[test]
    fn rejects_unsupported_frame_size() {
        let mut orch = HybridOrchestrator::new();
        let mut silk = ReferenceSilkEncoder::new();
        let mut celt = ReferenceCeltEncoder::new();
        let err = orch
            .encode_frame(&mut silk, &mut celt, &[0i16; 10], &[0i16; 10], 240, TocBandwidth::SuperWideBand, 32_000, 1, 200, false, false, false)
            .unwrap_err();
        assert_eq!(err, Error::InvalidFrameSize(240));
    }

    #[test]
    fn encodes_a_basic_hybrid_frame() {
        let mut orch = HybridOrchestrator::new();
        let mut silk = ReferenceSilkEncoder::new();
        let mut celt = ReferenceCeltEncoder::new();
        let mid_pcm: Vec<i16> = (0..320).map(|i| ((i as f32 * 0.2).sin() * 5000.0) as i16).collect();
        let celt_pcm: Vec<i16> = (0..960).map(|i| ((i as f32 * 0.1).sin() * 5000.0) as i16).collect();
        let packet = orch
            .encode_frame(&mut silk, &mut celt, &mid_pcm, &celt_pcm, 960, TocBandwidth::SuperWideBand, 32_000, 1, 200, false, false, false)
            .unwrap();
        assert!(!packet.is_empty());
    }

    #[test]
    fn transition_redundancy_appends_extra_bytes_when_active() {
        let mut orch = HybridOrchestrator::new();
        let mut silk = ReferenceSilkEncoder::new();
        let mut celt = ReferenceCeltEncoder::new();
        let mid_pcm: Vec<i16> = vec![1000; 320];
        let celt_pcm: Vec<i16> = vec![1000; 960];
        let without_redundancy = orch
            .encode_frame(&mut silk, &mut celt, &mid_pcm, &celt_pcm, 960, TocBandwidth::SuperWideBand, 64_000, 1, 250, false, false, false)
            .unwrap();

        let mut orch2 = HybridOrchestrator::new();
        let mut silk2 = ReferenceSilkEncoder::new();
        let mut celt2 = ReferenceCeltEncoder::new();
        let with_redundancy = orch2
            .encode_frame(&mut silk2, &mut celt2, &mid_pcm, &celt_pcm, 960, TocBandwidth::SuperWideBand, 64_000, 1, 250, false, true, true)
            .unwrap();

        assert!(with_redundancy.len() >= without_redundancy.len());
    }

    #[test]
    fn interpolate_celt_rate_extrapolates_beyond_top_row() {
        let rate = interpolate_celt_rate(200_000);
        let (last_x, last_y) = RATE_TABLE[RATE_TABLE.len() - 1];
        assert_eq!(rate, last_y + (200_000 - last_x) / 2);
    }
}
