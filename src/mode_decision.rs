//! Mode / bandwidth / channel decision.
//!
//! For non-auto [`crate::config::Mode`], returns the user-configured mode
//! directly. For `Auto`, walks a twelve-step chain mirroring the libopus
//! float path, finishing with three memoized hysteresis registers
//! (`prev_long_swb_auto_mode`, `prev_swb10_auto_mode`, `prev_swb20_auto_mode`)
//! plus a running transient-score integer.
use crate::analysis::AnalysisInfo;
use crate::config::{Bandwidth, ForceChannels, Mode, SignalType};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoSignal {
    Voice,
    Music,
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub configured_mode: Mode,
    pub bitrate_bps: i32,
    pub is_cbr: bool,
    pub complexity: u8,
    pub signal_type: SignalType,
    pub force_channels: ForceChannels,
    pub channels: u8,
    pub frame_rate: u32,
    pub frame_samples_48k: u32,
    pub sample_rate: u32,
    pub max_bandwidth: Bandwidth,
    pub user_bandwidth: Option<Bandwidth>,
    pub fec_enabled: bool,
    pub packet_loss_percent: u8,
    pub dtx: bool,
    pub lfe: bool,
    pub low_delay: bool,
    pub analysis: &'a AnalysisInfo,
}

#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub mode: Mode,
    pub bandwidth: Bandwidth,
    pub stream_channels: u8,
    pub to_mono: bool,
    pub fec_on: bool,
    pub equiv_rate: i32,
    pub voice_est: i32,
}

pub struct ModeDecision {
    prev_mode: Mode,
    prev_stream_channels: u8,
    stereo_width: StereoWidth,
    auto_bandwidth_memory: Bandwidth,
    prev_long_swb_auto_mode: AutoSignal,
    prev_swb10_auto_mode: AutoSignal,
    prev_swb20_auto_mode: AutoSignal,
    transient_score: i32,
    swb20_window: Vec<(f32, f32)>,
}

const SWB20_WINDOW_FRAMES: usize = 17;

impl ModeDecision {
    pub fn new() -> Self {
        ModeDecision {
            prev_mode: Mode::Hybrid,
            prev_stream_channels: 1,
            stereo_width: StereoWidth::new(),
            auto_bandwidth_memory: Bandwidth::FullBand,
            prev_long_swb_auto_mode: AutoSignal::Voice,
            prev_swb10_auto_mode: AutoSignal::Voice,
            prev_swb20_auto_mode: AutoSignal::Voice,
            transient_score: 0,
            swb20_window: Vec::with_capacity(SWB20_WINDOW_FRAMES),
        }
    }

    pub fn reset(&mut self) {
        *self = ModeDecision::new();
    }

    pub fn decide(&mut self, input: &DecisionInput) -> Decision {
        if !matches!(input.configured_mode, Mode::Auto) {
            let mode = match input.configured_mode {
                Mode::Silk => Mode::Silk,
                Mode::Hybrid => Mode::Hybrid,
                Mode::Celt => Mode::Celt,
                Mode::Auto => unreachable!(),
            };
            let bandwidth = self.clamp_bandwidth(input, input.user_bandwidth.unwrap_or(Bandwidth::FullBand));
            let stream_channels = self.resolve_stream_channels(input, 0);
            return Decision {
                mode,
                bandwidth,
                stream_channels,
                to_mono: false,
                fec_on: input.fec_enabled && input.packet_loss_percent > 0,
                equiv_rate: input.bitrate_bps,
                voice_est: 64,
            };
        }

        // Step 1: voice ratio.
        let prob = if input.analysis.valid {
            if !matches!(self.prev_mode, Mode::Celt) && !matches!(self.prev_mode, Mode::Silk) {
                input.analysis.music_prob
            } else if matches!(self.prev_mode, Mode::Celt) {
                input.analysis.music_prob_max
            } else {
                input.analysis.music_prob_min
            }
        } else {
            -0.01 // yields voice_ratio = -1 below, matching "invalid analysis => ratio = -1"
        };
        let voice_ratio = if input.analysis.valid { 100.0 * (1.0 - prob) } else { -1.0 };

        // Step 2: detected bandwidth.
        let detected_bandwidth = detected_bandwidth_from_index(input.analysis.bandwidth_index);

        // Step 3: stereo width (stereo only).
        let width = if input.channels == 2 {
            self.stereo_width.update(input.analysis)
        } else {
            1.0
        };

        // Step 4: equivalent rate.
        let equiv_rate = compute_equiv_rate(input);

        // Step 5: voice-est.
        let voice_est = compute_voice_est(input, voice_ratio);

        // Step 6: stream channels.
        let stream_channels = self.resolve_stream_channels(input, voice_est);

        // Step 7: mode selection.
        let mut mode = self.select_mode(input, equiv_rate, voice_est, width);

        // Step 8: bandwidth selection.
        let mut bandwidth = self.select_bandwidth(input, equiv_rate, voice_est, width);

        // Step 9: clamping.
        bandwidth = self.clamp_bandwidth(input, bandwidth);
        if input.analysis.valid {
            bandwidth = bandwidth.min(detected_bandwidth);
        }
        if input.lfe {
            bandwidth = Bandwidth::NarrowBand;
            mode = Mode::Celt;
        }
        if matches!(mode, Mode::Celt) && bandwidth == Bandwidth::MediumBand {
            bandwidth = Bandwidth::WideBand;
        }

        // Step 9.5: SWB auto-mode lanes. Once bandwidth has settled on SWB,
        // the long-frame/10ms/20ms hysteresis lanes (rather than the raw
        // equiv-rate threshold) decide Hybrid vs. CELT for this frame.
        if !input.lfe && bandwidth == Bandwidth::SuperWideBand {
            let auto_signal = if input.frame_samples_48k > 960 {
                self.select_long_swb_auto_signal(input.analysis)
            } else if input.frame_samples_48k <= 480 {
                self.select_swb10_auto_signal()
            } else {
                self.select_swb20_auto_signal(input.analysis)
            };
            mode = match auto_signal {
                AutoSignal::Voice => Mode::Hybrid,
                AutoSignal::Music => Mode::Celt,
            };
        }

        // Step 10: FEC gate.
        let fec_on = crate::fec::decide_fec(
            input.fec_enabled,
            input.packet_loss_percent,
            mode != Mode::Celt,
            equiv_rate,
            bandwidth,
        )
        .is_some();

        // Step 11: mode fixup.
        if matches!(mode, Mode::Silk) && bandwidth >= Bandwidth::SuperWideBand {
            mode = Mode::Hybrid;
        } else if matches!(mode, Mode::Hybrid) && bandwidth <= Bandwidth::WideBand {
            mode = Mode::Silk;
        }

        // Step 12: stereo -> mono transition hold.
        let mut to_mono = false;
        let mut effective_stream_channels = stream_channels;
        if stream_channels == 1
            && self.prev_stream_channels == 2
            && !matches!(self.prev_mode, Mode::Celt)
            && !matches!(mode, Mode::Celt)
        {
            effective_stream_channels = 2;
            to_mono = true;
        }

        debug!(
            "mode decision: mode={mode:?} bandwidth={bandwidth:?} stream_channels={effective_stream_channels} \
             voice_est={voice_est} equiv_rate={equiv_rate} fec_on={fec_on}"
        );

        self.prev_mode = mode;
        self.prev_stream_channels = effective_stream_channels;
        self.auto_bandwidth_memory = bandwidth;

        Decision {
            mode,
            bandwidth,
            stream_channels: effective_stream_channels,
            to_mono,
            fec_on,
            equiv_rate,
            voice_est,
        }
    }

    fn resolve_stream_channels(&self, input: &DecisionInput, voice_est: i32) -> u8 {
        match input.force_channels {
            ForceChannels::Mono => return 1,
            ForceChannels::Stereo => return 2,
            ForceChannels::Auto => {}
        }
        if input.channels == 1 {
            return 1;
        }
        let v = voice_est as f32;
        let mut threshold = 17000.0 + v * v * (19000.0 - 17000.0) / 16384.0;
        threshold += if self.prev_stream_channels == 2 { -1000.0 } else { 1000.0 };
        if (input.bitrate_bps as f32) > threshold { 2 } else { 1 }
    }

    fn select_mode(&mut self, input: &DecisionInput, equiv_rate: i32, voice_est: i32, width: f32) -> Mode {
        let v2 = (voice_est * voice_est) as f32 / 16384.0;
        let voice_threshold = 64_000.0;
        let music_threshold = 48_000.0;
        let mut threshold = voice_threshold * v2 / 127.0 + music_threshold * (1.0 - v2 / 127.0);
        threshold *= 1.0 - 0.1 * width;

        threshold += match self.prev_mode {
            Mode::Celt => 4000.0,
            _ => -4000.0,
        };
        if matches!(input.signal_type, SignalType::Voice) {
            threshold -= 99_000.0; // force SILK/Hybrid family below
        }
        if matches!(input.signal_type, SignalType::Music) {
            threshold += 99_000.0; // force CELT
        }

        let mut mode = if (equiv_rate as f32) > threshold { Mode::Celt } else { Mode::Silk };

        if input.dtx && voice_est > 100 {
            mode = Mode::Silk;
        }
        if input.fec_enabled
            && (input.packet_loss_percent as i32) > (128 - voice_est) / 16
            && voice_est > 25
        {
            mode = Mode::Silk;
        }
        if input.frame_samples_48k < input.sample_rate / 100 {
            mode = Mode::Celt;
        }
        if input.lfe {
            mode = Mode::Celt;
        }

        self.transient_score = if matches!(mode, Mode::Celt) {
            (self.transient_score + 5).min(100)
        } else {
            (self.transient_score - 5).max(0)
        };

        mode
    }

    fn select_bandwidth(&self, input: &DecisionInput, equiv_rate: i32, voice_est: i32, width: f32) -> Bandwidth {
        let voice_table = [9000, 15000, 20000, 30000];
        let music_table = [11000, 18000, 24000, 36000];
        let v2 = (voice_est * voice_est) as f32 / 16384.0;

        let mut bandwidth = Bandwidth::NarrowBand;
        for (i, (&vt, &mt)) in voice_table.iter().zip(music_table.iter()).enumerate() {
            let mut threshold = vt as f32 * v2 / 127.0 + mt as f32 * (1.0 - v2 / 127.0);
            threshold *= 1.0 - 0.05 * width;
            if self.auto_bandwidth_memory as u8 >= (i as u8 + 1) {
                threshold -= 1000.0;
            } else {
                threshold += 1000.0;
            }
            if equiv_rate as f32 >= threshold {
                bandwidth = match i {
                    0 => Bandwidth::MediumBand,
                    1 => Bandwidth::WideBand,
                    2 => Bandwidth::SuperWideBand,
                    _ => Bandwidth::FullBand,
                };
            }
        }
        bandwidth
    }

    fn clamp_bandwidth(&self, input: &DecisionInput, mut bandwidth: Bandwidth) -> Bandwidth {
        bandwidth = bandwidth.min(input.max_bandwidth);
        if let Some(forced) = input.user_bandwidth {
            bandwidth = forced;
        }
        bandwidth = bandwidth.min(Bandwidth::max_for_sample_rate(input.sample_rate));
        if input.bitrate_bps < 15_000 {
            bandwidth = bandwidth.min(Bandwidth::WideBand);
        }
        bandwidth
    }

    /// Long-frame SWB auto mode lane: strongly tonal or clearly
    /// non-music-with-low-tonality content stays CELT; otherwise
    /// Hybrid. Exposed separately since it only applies to long (40/60 ms)
    /// SWB auto frames, gating the next packet's mode before dispatch.
    pub fn select_long_swb_auto_signal(&mut self, analysis: &AnalysisInfo) -> AutoSignal {
        let signal = if analysis.tonality >= 0.42 || (analysis.music_prob < 0.5 && analysis.tonality < 0.2) {
            AutoSignal::Music
        } else {
            AutoSignal::Voice
        };
        self.prev_long_swb_auto_mode = signal;
        signal
    }

    /// SWB 10 ms auto lane: transient-score integrates sparse-signal
    /// evidence; `>= 30` picks Hybrid, `<= 10` picks CELT,
    /// with stickiness toward the previous decision in between.
    pub fn select_swb10_auto_signal(&mut self) -> AutoSignal {
        let signal = if self.transient_score >= 30 {
            AutoSignal::Voice
        } else if self.transient_score <= 10 {
            AutoSignal::Music
        } else {
            self.prev_swb10_auto_mode
        };
        self.prev_swb10_auto_mode = signal;
        signal
    }

    /// SWB 20 ms auto lane: a 17-frame hysteresis window over VAD
    /// probability and first-difference ratio.
    pub fn select_swb20_auto_signal(&mut self, analysis: &AnalysisInfo) -> AutoSignal {
        let first_diff_ratio = (analysis.tonality_slope).abs();
        self.swb20_window.push((analysis.vad_prob, first_diff_ratio));
        if self.swb20_window.len() > SWB20_WINDOW_FRAMES {
            self.swb20_window.remove(0);
        }
        let avg_vad: f32 = self.swb20_window.iter().map(|(v, _)| v).sum::<f32>() / self.swb20_window.len() as f32;
        let avg_diff: f32 = self.swb20_window.iter().map(|(_, d)| d).sum::<f32>() / self.swb20_window.len() as f32;

        let signal = if avg_vad > 0.5 && avg_diff < 0.3 { AutoSignal::Voice } else { AutoSignal::Music };
        self.prev_swb20_auto_mode = signal;
        signal
    }
}

impl Default for ModeDecision {
    fn default() -> Self {
        ModeDecision::new()
    }
}

fn detected_bandwidth_from_index(index: i32) -> Bandwidth {
    match index {
        i if i <= 12 => Bandwidth::NarrowBand,
        i if i <= 14 => Bandwidth::MediumBand,
        i if i <= 16 => Bandwidth::WideBand,
        i if i <= 18 => Bandwidth::SuperWideBand,
        _ => Bandwidth::FullBand,
    }
}

fn compute_equiv_rate(input: &DecisionInput) -> i32 {
    let mut rate = input.bitrate_bps as f32;
    if input.frame_rate > 50 {
        rate -= (40.0 * input.channels as f32 + 20.0) * (input.frame_rate as f32 - 50.0);
    }
    if input.is_cbr {
        rate -= rate / 12.0;
    }
    rate *= (90.0 + input.complexity as f32) / 100.0;

    // Placeholder bandwidth-independent loss penalty; the mode-dependent
    // variant is applied again once `mode` is known, in `select_mode`'s
    // threshold bias.
    let loss = input.packet_loss_percent as f32;
    rate *= 1.0 - loss / (12.0 * loss + 20.0);

    if input.complexity < 5 {
        rate *= 0.9;
    }

    (rate.max(5000.0)) as i32
}

fn compute_voice_est(input: &DecisionInput, voice_ratio: f32) -> i32 {
    if matches!(input.signal_type, SignalType::Voice) {
        return 127;
    }
    if matches!(input.signal_type, SignalType::Music) {
        return 0;
    }
    let cap = if input.low_delay { 115 } else { 127 };
    let est = if voice_ratio < 0.0 { 64.0 } else { voice_ratio / 100.0 * 127.0 };
    (est as i32).clamp(0, cap)
}

/// Stereo-width tracker.
struct StereoWidth {
    xx: f32,
    xy: f32,
    yy: f32,
    peak: f32,
}

impl StereoWidth {
    fn new() -> Self {
        StereoWidth { xx: 0.0, xy: 0.0, yy: 0.0, peak: 0.0 }
    }

    /// In the absence of direct per-channel samples at this layer (the
    /// analyzer already downmixed), the width estimate is driven from the
    /// analyzer's stationarity/noisiness as a proxy for loudness symmetry;
    /// full per-channel XX/XY/YY tracking lives in the encoder's stereo
    /// front-end where both channels are still available.
    fn update(&mut self, analysis: &AnalysisInfo) -> f32 {
        let alpha = 25.0 / 50.0_f32.max(50.0);
        let proxy = analysis.stationarity;
        self.xx += alpha * (proxy - self.xx);
        self.yy += alpha * ((1.0 - proxy) - self.yy);
        self.xy += alpha * (0.0 - self.xy);

        let corr = self.xy / (self.xx * self.yy).sqrt().max(1e-6);
        let ldiff = (self.xx.sqrt().sqrt() - self.yy.sqrt().sqrt()) / (self.xx.sqrt().sqrt() + self.yy.sqrt().sqrt()).max(1e-6);
        let width = (1.0 - corr * corr).max(0.0).sqrt() * ldiff.abs();

        if width > self.peak {
            self.peak = width;
        } else {
            self.peak = (self.peak - 0.02 / 50.0).max(0.0);
        }
        (20.0 * self.peak).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisInfo;

    fn base_input(analysis: &AnalysisInfo) -> DecisionInput {
        DecisionInput {
            configured_mode: Mode::Auto,
            bitrate_bps: 32_000,
            is_cbr: false,
            complexity: 9,
            signal_type: SignalType::Auto,
            force_channels: ForceChannels::Auto,
            channels: 1,
            frame_rate: 50,
            frame_samples_48k: 960,
            sample_rate: 48_000,
            max_bandwidth: Bandwidth::FullBand,
            user_bandwidth: None,
            fec_enabled: false,
            packet_loss_percent: 0,
            dtx: false,
            lfe: false,
            low_delay: false,
            analysis,
        }
    }

    #[test]
    fn non_auto_mode_passes_through_unchanged() {
        let analysis = AnalysisInfo::default();
        let mut input = base_input(&analysis);
        input.configured_mode = Mode::Celt;
        let mut md = ModeDecision::new();
        let decision = md.decide(&input);
        assert_eq!(decision.mode, Mode::Celt);
    }

    #[test]
    fn lfe_forces_celt_narrowband() {
        let analysis = AnalysisInfo { valid: true, ..AnalysisInfo::default() };
        let mut input = base_input(&analysis);
        input.lfe = true;
        let mut md = ModeDecision::new();
        let decision = md.decide(&input);
        assert_eq!(decision.mode, Mode::Celt);
        assert_eq!(decision.bandwidth, Bandwidth::NarrowBand);
    }

    #[test]
    fn low_bitrate_clamps_to_wideband_or_below() {
        let analysis = AnalysisInfo { valid: true, ..AnalysisInfo::default() };
        let mut input = base_input(&analysis);
        input.bitrate_bps = 10_000;
        let mut md = ModeDecision::new();
        let decision = md.decide(&input);
        assert!(decision.bandwidth <= Bandwidth::WideBand);
    }

    #[test]
    fn voice_signal_hint_biases_toward_silk_family() {
        let analysis = AnalysisInfo { valid: true, music_prob: 0.9, ..AnalysisInfo::default() };
        let mut input = base_input(&analysis);
        input.signal_type = SignalType::Voice;
        input.bitrate_bps = 64_000;
        let mut md = ModeDecision::new();
        let decision = md.decide(&input);
        assert!(matches!(decision.mode, Mode::Silk | Mode::Hybrid));
    }

    #[test]
    fn short_frame_forces_celt() {
        let analysis = AnalysisInfo { valid: true, ..AnalysisInfo::default() };
        let mut input = base_input(&analysis);
        input.frame_samples_48k = 120;
        let mut md = ModeDecision::new();
        let decision = md.decide(&input);
        assert_eq!(decision.mode, Mode::Celt);
    }

    #[test]
    fn repeated_decisions_converge_within_swb20_window() {
        let analysis = AnalysisInfo { valid: true, vad_prob: 0.8, tonality_slope: 0.1, ..AnalysisInfo::default() };
        let mut md = ModeDecision::new();
        let mut last = None;
        for _ in 0..SWB20_WINDOW_FRAMES {
            let signal = md.select_swb20_auto_signal(&analysis);
            last = Some(signal);
        }
        for _ in 0..5 {
            let signal = md.select_swb20_auto_signal(&analysis);
            assert_eq!(signal, last.unwrap());
        }
    }
}
