//! Top-level encoder.
//!
//! Buffers PCM plus lookahead, applies DC-reject and LSB quantization,
//! drives the analyzer and mode decision, dispatches to the SILK-only,
//! CELT-only, or hybrid path, and assembles the final Opus packet,
//! including CBR padding and the long-frame (40/60 ms) multi-frame
//! splitter.
use crate::analysis::Analyzer;
use crate::celt::{CeltEncoder, CeltFrameReport, ReferenceCeltEncoder};
use crate::config::{Application, Bandwidth as ConfigBandwidth, BitrateMode, EncoderConfig, Mode};
use crate::dtx::{DtxAction, DtxController};
use crate::error::{Error, Result};
use crate::hybrid::HybridOrchestrator;
use crate::mode_decision::{DecisionInput, ModeDecision};
use crate::packet::{build_code0, build_code3, MAX_FRAME_LENGTH};
use crate::resampler::Resampler;
use crate::silk::{ReferenceSilkEncoder, SilkEncoder};
use crate::toc::{config_number, FrameSize, Mode as TocMode};
use crate::vad::Vad;
use log::{debug, warn};

/// `Fs/400 + Fs/250` samples at 48 kHz.
const LOOKAHEAD_SAMPLES_48K: u32 = 48_000 / 400 + 48_000 / 250;

fn target_bytes_for_bitrate(bitrate_bps: i32, frame_samples_48k: u32) -> usize {
    let frame_rate = 48_000.0 / frame_samples_48k as f32;
    ((bitrate_bps as f32 / 8.0 / frame_rate).round() as usize).min(MAX_FRAME_LENGTH)
}

struct DcReject {
    state: f32,
    coeff: f32,
}

impl DcReject {
    fn new(sample_rate: u32) -> Self {
        DcReject { state: 0.0, coeff: 6.3 * 3.0 / sample_rate as f32 }
    }

    fn process(&mut self, sample: f32) -> f32 {
        self.state += self.coeff * (sample - self.state);
        sample - self.state
    }
}

fn quantize_lsb(sample: f32, depth: u8) -> f32 {
    let scale = (1i64 << (depth - 1)) as f32;
    (sample * scale).round() / scale
}

pub struct Encoder {
    config: EncoderConfig,
    sample_rate: u32,
    channels: u8,
    analyzer: Analyzer,
    mode_decision: ModeDecision,
    dtx: DtxController,
    hybrid: HybridOrchestrator,
    silk: Box<dyn SilkEncoder>,
    celt: Box<dyn CeltEncoder>,
    vad: Vad,
    /// Feeds SILK's 0-8 kHz-equivalent path; CELT
    /// always stays on the full 48 kHz buffer.
    silk_resampler: Resampler,
    dc_reject: Vec<DcReject>,
    input_buffer: Vec<f32>,
    prev_mode: Mode,
    prev_stream_channels: u8,
    hybrid_to_celt_hold: bool,
    first: bool,
}

impl Encoder {
    pub fn new(sample_rate: u32, channels: u8, application: Application) -> Result<Self> {
        if ![8000, 12000, 16000, 24000, 48000].contains(&sample_rate) {
            return Err(Error::InvalidSampleRate(sample_rate));
        }
        if channels != 1 && channels != 2 {
            return Err(Error::InvalidChannels(channels));
        }

        let dc_reject = (0..channels).map(|_| DcReject::new(sample_rate)).collect();

        Ok(Encoder {
            config: EncoderConfig::new(application),
            sample_rate,
            channels,
            analyzer: Analyzer::new(),
            mode_decision: ModeDecision::new(),
            dtx: DtxController::new(),
            hybrid: HybridOrchestrator::new(),
            silk: Box::new(ReferenceSilkEncoder::new()),
            celt: Box::new(ReferenceCeltEncoder::new()),
            vad: Vad::new(sample_rate),
            silk_resampler: Resampler::new(16_000).expect("16 kHz is a supported resample target"),
            dc_reject,
            input_buffer: Vec::new(),
            prev_mode: Mode::Hybrid,
            prev_stream_channels: channels,
            hybrid_to_celt_hold: false,
            first: true,
        })
    }

    pub fn config_mut(&mut self) -> &mut EncoderConfig {
        &mut self.config
    }

    pub fn lookahead(&self) -> u32 {
        LOOKAHEAD_SAMPLES_48K
    }

    pub fn in_dtx(&self) -> bool {
        self.dtx.in_dtx()
    }

    pub fn reset(&mut self) {
        self.analyzer = Analyzer::new();
        self.mode_decision.reset();
        self.dtx.reset();
        self.hybrid.reset();
        self.silk.reset();
        self.celt.reset();
        self.vad.reset();
        self.silk_resampler = Resampler::new(16_000).expect("16 kHz is a supported resample target");
        self.dc_reject = (0..self.channels).map(|_| DcReject::new(self.sample_rate)).collect();
        self.input_buffer.clear();
        self.prev_mode = Mode::Hybrid;
        self.prev_stream_channels = self.channels;
        self.hybrid_to_celt_hold = false;
        self.first = true;
    }

    /// Encodes one frame of `frame_samples_48k`-sized interleaved PCM.
    /// Returns `Ok(None)` for the cold-start buffering case and for DTX
    /// suppression, `Ok(Some(packet))`
    /// otherwise.
    pub fn encode(&mut self, pcm: &[f32], frame_samples_48k: u32) -> Result<Option<Vec<u8>>> {
        if FrameSize::from_samples_48k(frame_samples_48k).is_none() {
            return Err(Error::InvalidFrameSize(frame_samples_48k));
        }
        let expected_len = (frame_samples_48k as usize) * self.channels as usize;
        if pcm.len() != expected_len {
            return Err(Error::EncodingFailed(format!(
                "expected {expected_len} interleaved samples, got {}",
                pcm.len()
            )));
        }

        // DTX only takes effect once the caller has opted in; disabling it
        // mid-stream resets the silence-duration counters.
        self.dtx.set_enabled(self.config.dtx);

        // Step 4: analyzer on the raw input, before DC-reject/LSB-quant. The
        // fold just written by `run_analysis` isn't used directly: `get_info`
        // applies the lookahead-smoothed view over the ring buffer instead.
        self.analyzer.run_analysis(pcm, self.channels, self.sample_rate)?;
        let analysis = self.analyzer.get_info(frame_samples_48k);

        // Steps 1-2: LSB-quantize then DC-reject, per-channel state.
        let mut processed = vec![0.0f32; pcm.len()];
        for (i, &sample) in pcm.iter().enumerate() {
            let ch = i % self.channels as usize;
            let quantized = quantize_lsb(sample, self.config.lsb_depth);
            processed[i] = self.dc_reject[ch].process(quantized);
        }

        // Step 3: buffer; return early if short of frame+lookahead.
        self.input_buffer.extend_from_slice(&processed);
        let needed = expected_len + (self.lookahead() as usize) * self.channels as usize;
        if self.input_buffer.len() < needed && self.first {
            debug!("buffering: have {} need {needed}", self.input_buffer.len());
            return Ok(None);
        }
        self.first = false;

        let mono_i16: Vec<i16> = to_i16(&downmix_to_mono_f32(&processed, self.channels));
        let vad_report = self.vad.process(&mono_i16);

        // Step 5: DTX gate.
        let frame_ms = frame_samples_48k * 1000 / 48_000;
        let dtx_action = self.dtx.step(vad_report.activity, frame_ms.max(1));
        match dtx_action {
            DtxAction::Suppress => {
                debug!("DTX suppressing frame");
                return Ok(None);
            }
            DtxAction::ComfortNoise => {
                debug!("DTX emitting comfort-noise frame");
                let mut cn = vec![0.0f32; pcm.len()];
                self.dtx.generate_comfort_noise_frame(&mut cn);
                return self.encode_active_frame(&cn, frame_samples_48k, &analysis, &vad_report);
            }
            DtxAction::Emit => {}
        }

        self.encode_active_frame(&processed, frame_samples_48k, &analysis, &vad_report)
    }

    fn encode_active_frame(
        &mut self,
        pcm: &[f32],
        frame_samples_48k: u32,
        analysis: &crate::analysis::AnalysisInfo,
        vad_report: &crate::vad::VadReport,
    ) -> Result<Option<Vec<u8>>> {
        // Step 6: resolve signal type.
        let signal_type = self.config.signal_type;

        let frame_rate = 48_000 / frame_samples_48k;
        let input = DecisionInput {
            configured_mode: self.config.mode,
            bitrate_bps: self.config.bitrate,
            is_cbr: matches!(self.config.bitrate_mode, BitrateMode::Cbr),
            complexity: self.config.complexity,
            signal_type,
            force_channels: self.config.force_channels,
            channels: self.channels,
            frame_rate,
            frame_samples_48k,
            sample_rate: self.sample_rate,
            max_bandwidth: self.config.max_bandwidth,
            user_bandwidth: self.config.bandwidth,
            fec_enabled: self.config.fec,
            packet_loss_percent: self.config.packet_loss_percent,
            dtx: self.config.dtx,
            lfe: self.config.lfe,
            low_delay: self.config.low_delay,
            analysis,
        };

        // Step 7: mode selection.
        let decision = self.mode_decision.decide(&input);
        let _ = vad_report;

        // Step 8: dispatch, with the one-frame Hybrid->CELT transition hold.
        let mut mode = decision.mode;
        if matches!(self.prev_mode, Mode::Hybrid) && matches!(mode, Mode::Celt) && frame_samples_48k >= 480 {
            if !self.hybrid_to_celt_hold {
                self.hybrid_to_celt_hold = true;
                mode = Mode::Hybrid;
            } else {
                self.hybrid_to_celt_hold = false;
            }
        } else {
            self.hybrid_to_celt_hold = false;
        }

        let stereo = decision.stream_channels == 2;
        let mono_f32 = downmix_to_mono_f32(pcm, self.channels);
        let celt_pcm: Vec<i16> = to_i16(&mono_f32);

        let packet = match mode {
            Mode::Celt => self.encode_celt_only(&celt_pcm, frame_samples_48k, decision.bandwidth, stereo)?,
            Mode::Silk => {
                let silk_pcm = to_i16(&self.silk_resampler.process(&mono_f32));
                self.encode_silk_only(&silk_pcm, frame_samples_48k, decision.bandwidth, stereo, decision.fec_on)?
            }
            Mode::Hybrid => {
                let silk_pcm = to_i16(&self.silk_resampler.process(&mono_f32));
                self.encode_hybrid(&silk_pcm, &celt_pcm, frame_samples_48k, decision.bandwidth, stereo)?
            }
            Mode::Auto => unreachable!("mode decision never returns Auto"),
        };

        // Step 10: CBR padding / CVBR constraint.
        let final_packet = self.apply_rate_constraint(packet, frame_samples_48k);

        // Step 11: advance hysteresis.
        self.prev_mode = mode;
        self.prev_stream_channels = decision.stream_channels;

        Ok(Some(final_packet))
    }

    fn encode_celt_only(&mut self, pcm: &[i16], frame_samples_48k: u32, bandwidth: ConfigBandwidth, stereo: bool) -> Result<Vec<u8>> {
        if frame_samples_48k <= 960 {
            let frame_size = FrameSize::from_samples_48k(frame_samples_48k).ok_or(Error::InvalidFrameSize(frame_samples_48k))?;
            let config = config_number(TocMode::Celt, bandwidth.to_toc(), frame_size)?;
            let mut buf = vec![0u8; MAX_FRAME_LENGTH];
            let frame = self.run_celt_into_buffer(pcm, frame_samples_48k, &mut buf)?;
            return Ok(build_code0(config, stereo, &frame)?);
        }

        // 40/60 ms: split into 2/3 x 20ms subframes at 3*bitrate/5.
        let subframe_count = (frame_samples_48k / 960) as usize;
        let sub_config = config_number(TocMode::Celt, bandwidth.to_toc(), FrameSize::Samples960)?;
        let subframe_len = pcm.len() / subframe_count;
        let mut frames = Vec::with_capacity(subframe_count);
        for i in 0..subframe_count {
            let slice = &pcm[i * subframe_len..(i + 1) * subframe_len];
            let mut buf = vec![0u8; MAX_FRAME_LENGTH];
            let frame = self.run_celt_into_buffer(slice, 960, &mut buf)?;
            frames.push(frame);
        }
        let frame_refs: Vec<&[u8]> = frames.iter().map(|f| f.as_slice()).collect();
        let cbr = frame_refs.windows(2).all(|w| w[0].len() == w[1].len());
        Ok(build_code3(sub_config, stereo, &frame_refs, cbr, 0)?)
    }

    fn run_celt_into_buffer(&mut self, pcm: &[i16], frame_samples_48k: u32, buf: &mut [u8]) -> Result<Vec<u8>> {
        let mut range = crate::range::RangeEncoder::init(buf);
        let _report: CeltFrameReport = self
            .celt
            .encode_frame(&mut range, pcm, frame_samples_48k, 0)
            .map_err(|_| Error::EncodingFailed("CELT encode failed".into()))?;
        Ok(range.done()?)
    }

    fn encode_silk_only(&mut self, pcm: &[i16], frame_samples_48k: u32, bandwidth: ConfigBandwidth, stereo: bool, fec_on: bool) -> Result<Vec<u8>> {
        let silk_bw = clamp_silk_bandwidth(bandwidth);

        if frame_samples_48k <= 960 {
            let frame_size = FrameSize::from_samples_48k(frame_samples_48k).ok_or(Error::InvalidFrameSize(frame_samples_48k))?;
            let config = config_number(TocMode::Silk, silk_bw.to_toc(), frame_size)?;
            let frame = self.run_silk_into_frame(pcm, silk_bw.to_toc(), fec_on)?;
            return Ok(build_code0(config, stereo, &frame)?);
        }

        // 40/60 ms: a SILK config only ever covers one 20 ms internal
        // frame here, so long frames split into 2/3 x 20ms subframes the
        // same way the CELT-only path does.
        let subframe_count = (frame_samples_48k / 960) as usize;
        let sub_config = config_number(TocMode::Silk, silk_bw.to_toc(), FrameSize::Samples960)?;
        let subframe_len = pcm.len() / subframe_count;
        let mut frames = Vec::with_capacity(subframe_count);
        for i in 0..subframe_count {
            let slice = &pcm[i * subframe_len..(i + 1) * subframe_len];
            let frame = self.run_silk_into_frame(slice, silk_bw.to_toc(), fec_on)?;
            frames.push(frame);
        }
        let frame_refs: Vec<&[u8]> = frames.iter().map(|f| f.as_slice()).collect();
        let cbr = frame_refs.windows(2).all(|w| w[0].len() == w[1].len());
        Ok(build_code3(sub_config, stereo, &frame_refs, cbr, 0)?)
    }

    fn run_silk_into_frame(&mut self, pcm: &[i16], silk_bandwidth: crate::toc::Bandwidth, fec_on: bool) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_FRAME_LENGTH];
        let mut range = crate::range::RangeEncoder::init(&mut buf);
        let report = self
            .silk
            .encode_frame(&mut range, pcm, silk_bandwidth, self.config.bitrate)
            .map_err(|_| Error::EncodingFailed("SILK encode failed".into()))?;

        if fec_on {
            let _lbrr = self
                .silk
                .encode_lbrr(&mut range, pcm, silk_bandwidth)
                .map_err(|_| Error::EncodingFailed("SILK LBRR encode failed".into()))?;
        }

        let mut frame = range.done()?;
        while frame.last() == Some(&0) && frame.len() > 1 {
            frame.pop();
        }
        debug!("SILK frame: voice_activity={} bytes={}", report.voice_activity, frame.len());

        Ok(frame)
    }

    fn encode_hybrid(
        &mut self,
        silk_pcm_16k: &[i16],
        celt_pcm_48k: &[i16],
        frame_samples_48k: u32,
        bandwidth: ConfigBandwidth,
        stereo: bool,
    ) -> Result<Vec<u8>> {
        if frame_samples_48k == 480 || frame_samples_48k == 960 {
            let frame = self.run_hybrid_into_frame(silk_pcm_16k, celt_pcm_48k, frame_samples_48k, bandwidth, true)?;
            let frame_size = FrameSize::from_samples_48k(frame_samples_48k).ok_or(Error::InvalidFrameSize(frame_samples_48k))?;
            let config = config_number(TocMode::Hybrid, bandwidth.to_toc(), frame_size)?;
            return Ok(build_code0(config, stereo, &frame)?);
        }

        // 40/60 ms hybrid: split into 2/3 x 20ms subframes, same shape as
        // the CELT/SILK splitters; only the first subframe may carry
        // CELT<->SILK transition redundancy (RFC 6716 §4.5).
        if frame_samples_48k != 1920 && frame_samples_48k != 2880 {
            return Err(Error::InvalidHybridFrameSize(frame_samples_48k));
        }
        let subframe_count = (frame_samples_48k / 960) as usize;
        let sub_config = config_number(TocMode::Hybrid, bandwidth.to_toc(), FrameSize::Samples960)?;
        let silk_subframe_len = silk_pcm_16k.len() / subframe_count;
        let celt_subframe_len = celt_pcm_48k.len() / subframe_count;
        let mut frames = Vec::with_capacity(subframe_count);
        for i in 0..subframe_count {
            let silk_slice = &silk_pcm_16k[i * silk_subframe_len..(i + 1) * silk_subframe_len];
            let celt_slice = &celt_pcm_48k[i * celt_subframe_len..(i + 1) * celt_subframe_len];
            let frame = self.run_hybrid_into_frame(silk_slice, celt_slice, 960, bandwidth, i == 0)?;
            frames.push(frame);
        }
        let frame_refs: Vec<&[u8]> = frames.iter().map(|f| f.as_slice()).collect();
        let cbr = frame_refs.windows(2).all(|w| w[0].len() == w[1].len());
        Ok(build_code3(sub_config, stereo, &frame_refs, cbr, 0)?)
    }

    fn run_hybrid_into_frame(
        &mut self,
        silk_pcm_16k: &[i16],
        celt_pcm_48k: &[i16],
        frame_samples_48k: u32,
        bandwidth: ConfigBandwidth,
        first_subframe: bool,
    ) -> Result<Vec<u8>> {
        let payload_target = target_bytes_for_bitrate(self.config.bitrate, frame_samples_48k);
        let was_celt_previously = matches!(self.prev_mode, Mode::Celt);

        let frame = self.hybrid.encode_frame(
            self.silk.as_mut(),
            self.celt.as_mut(),
            silk_pcm_16k,
            celt_pcm_48k,
            frame_samples_48k,
            bandwidth.to_toc(),
            self.config.bitrate,
            self.channels,
            payload_target.max(2),
            matches!(self.config.bitrate_mode, BitrateMode::Cbr),
            !self.config.low_delay && first_subframe,
            was_celt_previously,
        )?;

        Ok(frame)
    }

    fn apply_rate_constraint(&self, mut packet: Vec<u8>, frame_samples_48k: u32) -> Vec<u8> {
        match self.config.bitrate_mode {
            BitrateMode::Cbr => {
                let target = target_bytes_for_bitrate(self.config.bitrate, frame_samples_48k);
                if packet.len() < target {
                    packet.resize(target, 0);
                } else if packet.len() > target {
                    warn!("CBR packet ({} bytes) exceeds target ({target} bytes); leaving oversized", packet.len());
                }
            }
            BitrateMode::Cvbr => {
                const CVBR_TOLERANCE: f32 = 0.1;
                let target = target_bytes_for_bitrate(self.config.bitrate, frame_samples_48k);
                let max_len = ((target as f32) * (1.0 + CVBR_TOLERANCE)) as usize;
                if packet.len() > max_len {
                    packet.truncate(max_len.max(1));
                }
            }
            BitrateMode::Vbr => {}
        }
        packet
    }
}

fn downmix_to_mono_f32(pcm: &[f32], channels: u8) -> Vec<f32> {
    if channels == 1 {
        return pcm.to_vec();
    }
    pcm.chunks(channels as usize).map(|frame| frame.iter().sum::<f32>() / channels as f32).collect()
}

fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).collect()
}

fn clamp_silk_bandwidth(bandwidth: ConfigBandwidth) -> ConfigBandwidth {
    match bandwidth {
        ConfigBandwidth::SuperWideBand | ConfigBandwidth::FullBand => ConfigBandwidth::WideBand,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frame_samples: u32, channels: u8, freq: f32) -> Vec<f32> {
        let n = frame_samples as usize * channels as usize;
        (0..n)
            .map(|i| {
                let t = (i / channels as usize) as f32 / 48_000.0;
                0.4 * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    #[test]
    fn rejects_unsupported_sample_rate() {
        let err = Encoder::new(44_100, 1, Application::Audio).unwrap_err();
        assert!(matches!(err, Error::InvalidSampleRate(44_100)));
    }

    #[test]
    fn rejects_unsupported_channel_count() {
        let err = Encoder::new(48_000, 3, Application::Audio).unwrap_err();
        assert!(matches!(err, Error::InvalidChannels(3)));
    }

    #[test]
    fn cold_start_buffers_before_emitting_a_packet() {
        let mut enc = Encoder::new(48_000, 1, Application::Audio).unwrap();
        enc.config_mut().set_mode(Mode::Celt);
        let pcm = sine(480, 1, 440.0);
        let result = enc.encode(&pcm, 480).unwrap();
        assert!(result.is_none(), "first frame should buffer, not emit");
    }

    #[test]
    fn celt_mode_eventually_emits_a_packet() {
        let mut enc = Encoder::new(48_000, 1, Application::Audio).unwrap();
        enc.config_mut().set_mode(Mode::Celt);
        enc.config_mut().set_bitrate(48_000);
        let mut last = None;
        for _ in 0..5 {
            let pcm = sine(480, 1, 440.0);
            last = enc.encode(&pcm, 480).unwrap();
        }
        assert!(last.is_some());
        let packet = last.unwrap();
        assert!(!packet.is_empty());
        assert!((28..=31).contains(&(packet[0] >> 3)));
    }

    #[test]
    fn reset_clears_buffering_state() {
        let mut enc = Encoder::new(48_000, 1, Application::Audio).unwrap();
        enc.config_mut().set_mode(Mode::Celt);
        let pcm = sine(480, 1, 440.0);
        let _ = enc.encode(&pcm, 480).unwrap();
        enc.reset();
        let result = enc.encode(&pcm, 480).unwrap();
        assert!(result.is_none(), "after reset, cold start buffering applies again");
    }

    #[test]
    fn invalid_frame_size_is_rejected() {
        let mut enc = Encoder::new(48_000, 1, Application::Audio).unwrap();
        let pcm = vec![0.0f32; 100];
        let err = enc.encode(&pcm, 100).unwrap_err();
        assert!(matches!(err, Error::InvalidFrameSize(100)));
    }
}
