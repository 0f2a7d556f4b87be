//! The encoder's configuration surface.
//!
//! All setters are idempotent and take effect on the next `encode()` call.
//! Values are clamped or validated eagerly here; the few errors that can
//! only be detected once PCM arrives (frame-size/sample-rate mismatches) are
//! raised from [`crate::Encoder::encode`] instead.
use log::debug;

/// User-selectable coding mode. `Auto` lets [`crate::mode_decision`] choose
/// per frame; the other variants pin the mode for every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Auto,
    Silk,
    Hybrid,
    Celt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateMode {
    Vbr,
    Cvbr,
    Cbr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Bandwidth {
    NarrowBand,
    MediumBand,
    WideBand,
    SuperWideBand,
    FullBand,
}

impl Bandwidth {
    pub fn to_toc(self) -> crate::toc::Bandwidth {
        match self {
            Bandwidth::NarrowBand => crate::toc::Bandwidth::NarrowBand,
            Bandwidth::MediumBand => crate::toc::Bandwidth::MediumBand,
            Bandwidth::WideBand => crate::toc::Bandwidth::WideBand,
            Bandwidth::SuperWideBand => crate::toc::Bandwidth::SuperWideBand,
            Bandwidth::FullBand => crate::toc::Bandwidth::FullBand,
        }
    }

    /// Nyquist-limited bandwidth achievable at `sample_rate`.
    pub fn max_for_sample_rate(sample_rate: u32) -> Bandwidth {
        match sample_rate {
            0..=8000 => Bandwidth::NarrowBand,
            8001..=12000 => Bandwidth::MediumBand,
            12001..=16000 => Bandwidth::WideBand,
            16001..=24000 => Bandwidth::SuperWideBand,
            _ => Bandwidth::FullBand,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Auto,
    Voice,
    Music,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceChannels {
    Auto,
    Mono,
    Stereo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Application {
    VoIP,
    Audio,
    RestrictedLowDelay,
}

pub const MIN_BITRATE: i32 = 6000;
pub const MAX_BITRATE: i32 = 510_000;

#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub mode: Mode,
    pub bitrate: i32,
    pub bitrate_mode: BitrateMode,
    pub bandwidth: Option<Bandwidth>,
    pub max_bandwidth: Bandwidth,
    pub fec: bool,
    pub packet_loss_percent: u8,
    pub dtx: bool,
    pub complexity: u8,
    pub signal_type: SignalType,
    pub force_channels: ForceChannels,
    pub lsb_depth: u8,
    pub lfe: bool,
    pub low_delay: bool,
    pub phase_inversion_disabled: bool,
    pub prediction_disabled: bool,
    pub application: Application,
}

impl EncoderConfig {
    pub fn new(application: Application) -> Self {
        EncoderConfig {
            mode: Mode::Auto,
            bitrate: 64_000,
            bitrate_mode: BitrateMode::Vbr,
            bandwidth: None,
            max_bandwidth: Bandwidth::FullBand,
            fec: false,
            packet_loss_percent: 0,
            dtx: false,
            complexity: 9,
            signal_type: SignalType::Auto,
            force_channels: ForceChannels::Auto,
            lsb_depth: 24,
            lfe: false,
            low_delay: matches!(application, Application::RestrictedLowDelay),
            phase_inversion_disabled: false,
            prediction_disabled: false,
            application,
        }
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn set_bitrate(&mut self, bps: i32) {
        let clamped = bps.clamp(MIN_BITRATE, MAX_BITRATE);
        if clamped != bps {
            debug!("bitrate {bps} clamped to {clamped}");
        }
        self.bitrate = clamped;
    }

    pub fn set_bitrate_mode(&mut self, mode: BitrateMode) {
        self.bitrate_mode = mode;
    }

    pub fn set_bandwidth(&mut self, bandwidth: Bandwidth) {
        self.bandwidth = Some(bandwidth);
    }

    pub fn clear_bandwidth(&mut self) {
        self.bandwidth = None;
    }

    pub fn set_max_bandwidth(&mut self, bandwidth: Bandwidth) {
        self.max_bandwidth = bandwidth;
    }

    pub fn set_fec(&mut self, on: bool) {
        self.fec = on;
    }

    pub fn set_packet_loss(&mut self, percent: u8) {
        self.packet_loss_percent = percent.min(100);
    }

    pub fn set_dtx(&mut self, on: bool) {
        self.dtx = on;
    }

    pub fn set_complexity(&mut self, complexity: u8) {
        self.complexity = complexity.min(10);
    }

    pub fn set_signal_type(&mut self, signal: SignalType) {
        self.signal_type = signal;
    }

    pub fn set_force_channels(&mut self, force: ForceChannels) {
        self.force_channels = force;
    }

    pub fn set_lsb_depth(&mut self, depth: u8) {
        self.lsb_depth = depth.clamp(8, 24);
    }

    pub fn set_lfe(&mut self, on: bool) {
        self.lfe = on;
    }

    pub fn set_low_delay(&mut self, on: bool) {
        self.low_delay = on;
    }

    pub fn set_phase_inversion_disabled(&mut self, on: bool) {
        self.phase_inversion_disabled = on;
    }

    pub fn set_prediction_disabled(&mut self, on: bool) {
        self.prediction_disabled = on;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_clamps_to_valid_range() {
        let mut cfg = EncoderConfig::new(Application::Audio);
        cfg.set_bitrate(1);
        assert_eq!(cfg.bitrate, MIN_BITRATE);
        cfg.set_bitrate(10_000_000);
        assert_eq!(cfg.bitrate, MAX_BITRATE);
    }

    #[test]
    fn packet_loss_clamps_to_100() {
        let mut cfg = EncoderConfig::new(Application::Audio);
        cfg.set_packet_loss(255);
        assert_eq!(cfg.packet_loss_percent, 100);
    }

    #[test]
    fn low_delay_defaults_from_application() {
        let cfg = EncoderConfig::new(Application::RestrictedLowDelay);
        assert!(cfg.low_delay);
        let cfg = EncoderConfig::new(Application::VoIP);
        assert!(!cfg.low_delay);
    }
}
