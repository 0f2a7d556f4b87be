//! The TOC Byte (Table of Contents Byte) — encoder side.
//!
//! A well-formed Opus packet contains at least one byte forming a
//! table-of-contents (TOC) header that signals which of the various modes
//! and configurations the packet uses: a configuration number ("config"), a
//! stereo flag ("s"), and a frame-count code ("c").
//! ```text
//!                               0
//!                               0 1 2 3 4 5 6 7
//!                              +-+-+-+-+-+-+-+-+
//!                              | config  |s| c |
//!                              +-+-+-+-+-+-+-+-+
//!
//!                           Figure 1: The TOC Byte
//! ```
//! This is the build-direction mirror of `symphonia-codec-opus`'s
//! `toc::Toc::new`/`params` (which parse a TOC byte into its parts): here we
//! go from `(mode, bandwidth, frame size, stereo)` to the 5-bit config
//! number and the assembled byte, over the same 32-entry configuration
//! table (RFC 6716 §3.1, Table 2). This encoder only ever produces frame
//! count codes 0 and 3 (§6.2).
use log::debug;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("no config entry for mode={mode:?} bandwidth={bandwidth:?} frame_size={frame_size:?}")]
    InvalidConfig { mode: Mode, bandwidth: Bandwidth, frame_size: FrameSize },

    #[error("invalid frame count for code-3 packing: {0} (must be 1..=48)")]
    InvalidFrameCount(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Silk,
    Hybrid,
    Celt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bandwidth {
    NarrowBand,
    MediumBand,
    WideBand,
    SuperWideBand,
    FullBand,
}

/// Frame size, expressed directly as 48 kHz-equivalent sample counts
/// rather than a duration, so the top-level encoder can index this table
/// straight off its own buffering units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameSize {
    Samples120,
    Samples240,
    Samples480,
    Samples960,
    Samples1920,
    Samples2880,
}

impl FrameSize {
    pub fn from_samples_48k(samples: u32) -> Option<Self> {
        match samples {
            120 => Some(FrameSize::Samples120),
            240 => Some(FrameSize::Samples240),
            480 => Some(FrameSize::Samples480),
            960 => Some(FrameSize::Samples960),
            1920 => Some(FrameSize::Samples1920),
            2880 => Some(FrameSize::Samples2880),
            _ => None,
        }
    }

    pub fn samples_48k(&self) -> u32 {
        match self {
            FrameSize::Samples120 => 120,
            FrameSize::Samples240 => 240,
            FrameSize::Samples480 => 480,
            FrameSize::Samples960 => 960,
            FrameSize::Samples1920 => 1920,
            FrameSize::Samples2880 => 2880,
        }
    }
}

/// Maps `(mode, bandwidth, frame_size)` to the 5-bit TOC config number (RFC
/// 6716 §3.1, Table 2). The table is walked linearly since it only has 32
/// rows; a `const` match would be equally fast but far less legible against
/// the RFC table it mirrors.
const CONFIG_TABLE: &[(u8, Mode, Bandwidth, FrameSize)] = &[
    (0, Mode::Silk, Bandwidth::NarrowBand, FrameSize::Samples480),
    (1, Mode::Silk, Bandwidth::NarrowBand, FrameSize::Samples960),
    (2, Mode::Silk, Bandwidth::NarrowBand, FrameSize::Samples1920),
    (3, Mode::Silk, Bandwidth::NarrowBand, FrameSize::Samples2880),
    (4, Mode::Silk, Bandwidth::MediumBand, FrameSize::Samples480),
    (5, Mode::Silk, Bandwidth::MediumBand, FrameSize::Samples960),
    (6, Mode::Silk, Bandwidth::MediumBand, FrameSize::Samples1920),
    (7, Mode::Silk, Bandwidth::MediumBand, FrameSize::Samples2880),
    (8, Mode::Silk, Bandwidth::WideBand, FrameSize::Samples480),
    (9, Mode::Silk, Bandwidth::WideBand, FrameSize::Samples960),
    (10, Mode::Silk, Bandwidth::WideBand, FrameSize::Samples1920),
    (11, Mode::Silk, Bandwidth::WideBand, FrameSize::Samples2880),
    (12, Mode::Hybrid, Bandwidth::SuperWideBand, FrameSize::Samples480),
    (13, Mode::Hybrid, Bandwidth::SuperWideBand, FrameSize::Samples960),
    (14, Mode::Hybrid, Bandwidth::FullBand, FrameSize::Samples480),
    (15, Mode::Hybrid, Bandwidth::FullBand, FrameSize::Samples960),
    (16, Mode::Celt, Bandwidth::NarrowBand, FrameSize::Samples120),
    (17, Mode::Celt, Bandwidth::NarrowBand, FrameSize::Samples240),
    (18, Mode::Celt, Bandwidth::NarrowBand, FrameSize::Samples480),
    (19, Mode::Celt, Bandwidth::NarrowBand, FrameSize::Samples960),
    (20, Mode::Celt, Bandwidth::WideBand, FrameSize::Samples120),
    (21, Mode::Celt, Bandwidth::WideBand, FrameSize::Samples240),
    (22, Mode::Celt, Bandwidth::WideBand, FrameSize::Samples480),
    (23, Mode::Celt, Bandwidth::WideBand, FrameSize::Samples960),
    (24, Mode::Celt, Bandwidth::SuperWideBand, FrameSize::Samples120),
    (25, Mode::Celt, Bandwidth::SuperWideBand, FrameSize::Samples240),
    (26, Mode::Celt, Bandwidth::SuperWideBand, FrameSize::Samples480),
    (27, Mode::Celt, Bandwidth::SuperWideBand, FrameSize::Samples960),
    (28, Mode::Celt, Bandwidth::FullBand, FrameSize::Samples120),
    (29, Mode::Celt, Bandwidth::FullBand, FrameSize::Samples240),
    (30, Mode::Celt, Bandwidth::FullBand, FrameSize::Samples480),
    (31, Mode::Celt, Bandwidth::FullBand, FrameSize::Samples960),
];

/// Resolves a `(mode, bandwidth, frame_size)` triple to its 5-bit config
/// number, per [`CONFIG_TABLE`].
pub fn config_number(mode: Mode, bandwidth: Bandwidth, frame_size: FrameSize) -> Result<u8, Error> {
    for &(config, m, bw, fs) in CONFIG_TABLE {
        if m == mode && bw == bandwidth && fs == frame_size {
            debug!("config={config} for mode={mode:?} bandwidth={bandwidth:?} frame_size={frame_size:?}");
            return Ok(config);
        }
    }
    Err(Error::InvalidConfig { mode, bandwidth, frame_size })
}

/// The frame-count code in the low two bits of the TOC byte. This encoder
/// only ever emits `One` (code 0) and `Arbitrary` (code 3); `TwoEqual` and
/// `TwoDifferent` exist only so the enum documents the full RFC space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCount {
    One = 0,
    TwoEqual = 1,
    TwoDifferent = 2,
    Arbitrary = 3,
}

/// Builds the one-byte TOC header.
pub fn build_toc_byte(config: u8, stereo: bool, frame_count: FrameCount) -> u8 {
    let mut byte = (config & 0x1F) << 3;
    if stereo {
        byte |= 1 << 2;
    }
    byte |= (frame_count as u8) & 0x03;
    debug!("TOC byte: {byte:#010b}");
    byte
}

/// Parses a TOC byte back into its parts, used only by this crate's own
/// property tests to confirm a TOC byte always parses back to the config
/// number and stereo flag it was built from.
#[cfg(test)]
pub(crate) fn parse_toc_byte(byte: u8) -> (u8, bool, u8) {
    let config = byte >> 3;
    let stereo = (byte & 0x04) != 0;
    let code = byte & 0x03;
    (config, stereo, code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_config_round_trips_through_the_toc_byte() {
        for &(config, mode, bandwidth, frame_size) in CONFIG_TABLE {
            assert_eq!(config_number(mode, bandwidth, frame_size).unwrap(), config);

            for &stereo in &[false, true] {
                let byte = build_toc_byte(config, stereo, FrameCount::One);
                let (parsed_config, parsed_stereo, code) = parse_toc_byte(byte);
                assert_eq!(parsed_config, config);
                assert_eq!(parsed_stereo, stereo);
                assert_eq!(code, 0);
            }
        }
    }

    #[test]
    fn unknown_triple_is_rejected() {
        let err = config_number(Mode::Silk, Bandwidth::SuperWideBand, FrameSize::Samples480).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn scenario_s3_hybrid_swb_20ms_stereo_toc_byte() {
        // Hybrid SWB 20 ms stereo => config 13, stereo, code 0 => byte 0x6C.
        let config = config_number(Mode::Hybrid, Bandwidth::SuperWideBand, FrameSize::Samples960).unwrap();
        let byte = build_toc_byte(config, true, FrameCount::One);
        assert_eq!(byte, 0x6C);
    }

    #[test]
    fn scenario_s4_celt_fb_40ms_multiframe_toc_byte() {
        // CELT FB 40 ms => config 31, code 3.
        let config = config_number(Mode::Celt, Bandwidth::FullBand, FrameSize::Samples1920);
        assert!(config.is_err(), "40ms has no direct CELT config; caller must split into 20ms subframes");
    }
}
