//! Opus packet assembly — encoder side.
//!
//! Builds the two packet shapes this encoder ever emits (RFC 6716 §3.2,
//! §6.2): a single-frame "code 0" packet, and a variable-or-constant-bitrate
//! multi-frame "code 3" packet used for 40 ms/60 ms long frames split into
//! 20 ms subframes. Code 1 and code 2 packets are never produced.
//!
//! This is the build-direction mirror of `symphonia-codec-opus`'s
//! `packet::FramePacket` (which parses packets apart); the frame-length
//! encoding (1-byte for `<252`, 2-byte for `252..=1275`) is the same table
//! read in reverse.
use crate::toc::{build_toc_byte, FrameCount};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("frame count must be 1..=48 for code-3 packing, got {0}")]
    InvalidFrameCount(usize),

    #[error("frame length {0} exceeds the maximum Opus frame size of 1275 bytes")]
    FrameLengthExceedsMaximum(usize),

    #[error("packet exceeds the maximum Opus packet size of 1275 bytes")]
    PacketTooLarge,
}

pub const MAX_FRAME_LENGTH: usize = 1275;

/// Encodes one frame length using the 252-based one/two-byte scheme (RFC
/// 6716 §3.2.1): lengths below 252 are a single byte; lengths in
/// `[252, 1275]` are two bytes, `(252 + ((len-252) % 4), (len-252) / 4)`.
fn push_frame_length(out: &mut Vec<u8>, len: usize) -> Result<(), Error> {
    if len > MAX_FRAME_LENGTH {
        return Err(Error::FrameLengthExceedsMaximum(len));
    }
    if len < 252 {
        out.push(len as u8);
    } else {
        let rem = len - 252;
        out.push((252 + (rem % 4)) as u8);
        out.push((rem / 4) as u8);
    }
    Ok(())
}

/// Assembles a code-0 packet: TOC byte followed by exactly one frame.
pub fn build_code0(config: u8, stereo: bool, frame: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(1 + frame.len());
    out.push(build_toc_byte(config, stereo, FrameCount::One));
    out.extend_from_slice(frame);
    if out.len() > MAX_FRAME_LENGTH {
        return Err(Error::PacketTooLarge);
    }
    Ok(out)
}

/// Assembles a code-3 packet from `frames`, all belonging to one TOC config.
/// `cbr` selects constant-bitrate framing (all frames
/// equal length, no explicit length table) vs. VBR framing (an explicit
/// `M - 1`-entry length table precedes the frame data). `padding` adds
/// `padding.len()` bytes of zero padding, RFC 6716 §3.2.4 (used by the
/// CBR top-level padding step).
pub fn build_code3(
    config: u8,
    stereo: bool,
    frames: &[&[u8]],
    cbr: bool,
    padding: usize,
) -> Result<Vec<u8>, Error> {
    let m = frames.len();
    if m == 0 || m > 48 {
        return Err(Error::InvalidFrameCount(m));
    }

    let mut out = Vec::new();
    out.push(build_toc_byte(config, stereo, FrameCount::Arbitrary));

    let has_padding = padding > 0;
    let vbr_bit = if cbr { 0 } else { 1 };
    let pad_bit = if has_padding { 1 } else { 0 };
    out.push((vbr_bit << 7) | (pad_bit << 6) | (m as u8 & 0x3F));

    if has_padding {
        // RFC 6716 §3.2.4: padding length itself uses the same 255-based
        // continuation scheme (255 means "more padding follows").
        let mut remaining = padding;
        while remaining >= 255 {
            out.push(255);
            remaining -= 254;
        }
        out.push(remaining as u8);
    }

    if cbr {
        let len = frames[0].len();
        for f in frames {
            if f.len() != len {
                return Err(Error::InvalidFrameCount(m));
            }
            if f.len() > MAX_FRAME_LENGTH {
                return Err(Error::FrameLengthExceedsMaximum(f.len()));
            }
        }
    } else {
        for f in &frames[..m - 1] {
            push_frame_length(&mut out, f.len())?;
        }
    }

    for f in frames {
        out.extend_from_slice(f);
    }

    for _ in 0..padding {
        out.push(0);
    }

    if out.len() > MAX_FRAME_LENGTH {
        return Err(Error::PacketTooLarge);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toc::{config_number, Bandwidth, FrameSize, Mode};

    #[test]
    fn code0_single_frame() {
        let config = config_number(Mode::Celt, Bandwidth::FullBand, FrameSize::Samples480).unwrap();
        let frame = [1u8, 2, 3, 4];
        let packet = build_code0(config, false, &frame).unwrap();
        assert_eq!(packet[0] >> 3, config);
        assert_eq!(&packet[1..], &frame);
    }

    #[test]
    fn scenario_s4_code3_cbr_40ms_header() {
        // 40 ms CELT FB packet split into two 20 ms subframes, CBR framing.
        let config = config_number(Mode::Celt, Bandwidth::FullBand, FrameSize::Samples480).unwrap();
        let frames: [&[u8]; 2] = [&[1, 2, 3], &[4, 5, 6]];
        let packet = build_code3(config, false, &frames, true, 0).unwrap();
        assert_eq!(packet[0] >> 3, 31);
        assert_eq!(packet[0] & 3, 3);
        assert_eq!(packet[1] & 0x3F, 2);
        assert_eq!(packet[1] & 0x80, 0, "CBR packets clear the VBR bit");
        assert_eq!(packet.len(), 2 + 3 + 3);
    }

    #[test]
    fn code3_vbr_length_table_sums_to_payload() {
        let config = config_number(Mode::Celt, Bandwidth::FullBand, FrameSize::Samples480).unwrap();
        let frames: [&[u8]; 3] = [&[0; 10], &[0; 300], &[0; 5]];
        let packet = build_code3(config, false, &frames, false, 0).unwrap();
        assert_eq!(packet[1] & 0x80, 0x80, "VBR packets set the VBR bit");
        // header_size = TOC + frame-count byte + 2 length entries (one 1-byte, one 2-byte)
        let header_size = 2 + 1 + 2;
        let payload: usize = frames.iter().map(|f| f.len()).sum();
        assert_eq!(packet.len(), header_size + payload);
    }

    #[test]
    fn rejects_bad_frame_counts() {
        let config = config_number(Mode::Celt, Bandwidth::FullBand, FrameSize::Samples480).unwrap();
        let empty: [&[u8]; 0] = [];
        assert_eq!(build_code3(config, false, &empty, true, 0).unwrap_err(), Error::InvalidFrameCount(0));

        let frames: Vec<&[u8]> = vec![&[1]; 49];
        assert_eq!(
            build_code3(config, false, &frames, true, 0).unwrap_err(),
            Error::InvalidFrameCount(49)
        );
    }

    #[test]
    fn cbr_requires_equal_frame_lengths() {
        let config = config_number(Mode::Celt, Bandwidth::FullBand, FrameSize::Samples480).unwrap();
        let frames: [&[u8]; 2] = [&[1, 2], &[1, 2, 3]];
        assert!(build_code3(config, false, &frames, true, 0).is_err());
    }
}
