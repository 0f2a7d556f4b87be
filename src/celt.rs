//! CELT subsystem interface.
//!
//! Mirrors [`crate::silk`]'s posture: bit-exact MDCT/PVQ reproduction is
//! out of scope, so this module defines the narrow
//! contract [`crate::hybrid`] and the top-level encoder need from CELT —
//! encode one frame's high-band (or full-band) contribution into a shared
//! range coder and report the bit spend — and a conservative implementation
//! of it, [`ReferenceCeltEncoder`].
use crate::range::RangeEncoder;
use crate::toc::Bandwidth;
use log::trace;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("CELT frame size must be 120/240/480/960 samples at 48 kHz, got {0}")]
    UnsupportedFrameSize(u32),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CeltFrameReport {
    pub bits_spent: u32,
    /// Whether this frame was coded as a transient (short MDCT blocks),
    /// reported so [`crate::mode_decision`] can track transient history for
    /// the next frame's overlap decisions.
    pub transient: bool,
}

pub trait CeltEncoder {
    /// Encodes one frame, starting at `start_band` (0 for CELT-only mode, the
    /// first band above SILK's coverage for Hybrid mode).
    fn encode_frame(
        &mut self,
        range: &mut RangeEncoder,
        pcm: &[i16],
        frame_samples_48k: u32,
        start_band: u8,
    ) -> Result<CeltFrameReport, Error>;

    /// Resets MDCT overlap and prediction history, used on mode switches and
    /// DTX resume.
    fn reset(&mut self);
}

const MAX_BANDS: u8 = 21;

#[derive(Debug)]
pub struct ReferenceCeltEncoder {
    overlap_energy: [f32; MAX_BANDS as usize],
    prev_transient: bool,
}

impl Default for ReferenceCeltEncoder {
    fn default() -> Self {
        ReferenceCeltEncoder::new()
    }
}

impl ReferenceCeltEncoder {
    pub fn new() -> Self {
        ReferenceCeltEncoder { overlap_energy: [0.0; MAX_BANDS as usize], prev_transient: false }
    }

    fn detect_transient(&self, pcm: &[i16]) -> bool {
        if pcm.len() < 2 {
            return false;
        }
        let half = pcm.len() / 2;
        let energy = |s: &[i16]| -> f64 { s.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>() / s.len() as f64 };
        let first = energy(&pcm[..half]);
        let second = energy(&pcm[half..]);
        second > first * 4.0 + 1.0
    }
}

impl CeltEncoder for ReferenceCeltEncoder {
    fn encode_frame(
        &mut self,
        range: &mut RangeEncoder,
        pcm: &[i16],
        frame_samples_48k: u32,
        start_band: u8,
    ) -> Result<CeltFrameReport, Error> {
        if ![120, 240, 480, 960, 1920, 2880].contains(&frame_samples_48k) {
            return Err(Error::UnsupportedFrameSize(frame_samples_48k));
        }
        if start_band >= MAX_BANDS {
            return Err(Error::UnsupportedFrameSize(frame_samples_48k));
        }

        let transient = self.detect_transient(pcm);
        range
            .encode_bit_logp(transient, 1)
            .map_err(|_| Error::UnsupportedFrameSize(frame_samples_48k))?;

        let mut bits_spent = 1u32;
        for band in start_band..MAX_BANDS {
            let band_start = (band as usize * pcm.len()) / MAX_BANDS as usize;
            let band_end = ((band as usize + 1) * pcm.len()) / MAX_BANDS as usize;
            let slice = &pcm[band_start..band_end.max(band_start)];
            let energy: f32 =
                slice.iter().map(|&s| (s as f32) * (s as f32)).sum::<f32>() / slice.len().max(1) as f32;
            let prev = self.overlap_energy[band as usize];
            let delta = (energy - prev).abs().log2().max(0.0) as u32;
            range
                .encode_icdf(delta.min(15) as usize, &[32, 16, 8, 4, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0], 5)
                .map_err(|_| Error::UnsupportedFrameSize(frame_samples_48k))?;
            bits_spent += 5;
            self.overlap_energy[band as usize] = energy;
        }

        self.prev_transient = transient;
        trace!("CELT frame: frame_samples={frame_samples_48k} start_band={start_band} transient={transient}");
        Ok(CeltFrameReport { bits_spent, transient })
    }

    fn reset(&mut self) {
        self.overlap_energy = [0.0; MAX_BANDS as usize];
        self.prev_transient = false;
    }
}
