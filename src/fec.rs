//! FEC controller.
//!
//! Decides whether the current frame should carry SILK LBRR redundancy,
//! and may step the bandwidth down by one notch if that is what makes FEC
//! affordable at the configured loss rate.
use crate::config::Bandwidth;
use log::debug;

const THRESHOLDS: [(Bandwidth, i32); 5] = [
    (Bandwidth::NarrowBand, 12_000),
    (Bandwidth::MediumBand, 14_000),
    (Bandwidth::WideBand, 16_000),
    (Bandwidth::SuperWideBand, 20_000),
    (Bandwidth::FullBand, 22_000),
];

/// Returns `Some(bandwidth)` with FEC on (possibly at a lower bandwidth
/// than requested) or `None` with FEC off, via a walk-down algorithm.
/// `was_on` carries last frame's FEC state for the ±1000 hysteresis term.
pub fn decide_fec(fec_enabled: bool, loss_percent: u8, mode_allows_fec: bool, equiv_rate: i32, bandwidth: Bandwidth) -> Option<Bandwidth> {
    decide_fec_with_hysteresis(fec_enabled, loss_percent, mode_allows_fec, equiv_rate, bandwidth, false)
}

pub fn decide_fec_with_hysteresis(
    fec_enabled: bool,
    loss_percent: u8,
    mode_allows_fec: bool,
    equiv_rate: i32,
    mut bandwidth: Bandwidth,
    was_on: bool,
) -> Option<Bandwidth> {
    if !fec_enabled || loss_percent == 0 || !mode_allows_fec {
        return None;
    }

    let loss = loss_percent as i32;
    let multiplier = (125 - loss.min(25)) as f32 / 100.0;

    loop {
        let base_threshold = THRESHOLDS.iter().find(|(bw, _)| *bw == bandwidth).map(|(_, t)| *t).unwrap_or(22_000);
        let hysteresis = if was_on { -1000 } else { 1000 };
        let threshold = ((base_threshold + hysteresis) as f32 * multiplier) as i32;

        if equiv_rate > threshold {
            debug!("FEC on at bandwidth={bandwidth:?} equiv_rate={equiv_rate} threshold={threshold}");
            return Some(bandwidth);
        }

        if loss <= 5 {
            debug!("FEC off, loss<=5%, keeping bandwidth={bandwidth:?}");
            return None;
        }

        bandwidth = match bandwidth {
            Bandwidth::FullBand => Bandwidth::SuperWideBand,
            Bandwidth::SuperWideBand => Bandwidth::WideBand,
            Bandwidth::WideBand => Bandwidth::MediumBand,
            Bandwidth::MediumBand => Bandwidth::NarrowBand,
            Bandwidth::NarrowBand => {
                debug!("FEC off, NB reached without threshold match");
                return None;
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_fec_is_always_off() {
        assert_eq!(decide_fec(false, 20, true, 100_000, Bandwidth::FullBand), None);
    }

    #[test]
    fn zero_loss_is_always_off() {
        assert_eq!(decide_fec(true, 0, true, 100_000, Bandwidth::FullBand), None);
    }

    #[test]
    fn celt_mode_is_always_off() {
        assert_eq!(decide_fec(true, 20, false, 100_000, Bandwidth::FullBand), None);
    }

    #[test]
    fn high_rate_turns_fec_on_at_requested_bandwidth() {
        let result = decide_fec(true, 10, true, 100_000, Bandwidth::FullBand);
        assert_eq!(result, Some(Bandwidth::FullBand));
    }

    #[test]
    fn low_loss_stays_off_without_walking_down() {
        let result = decide_fec(true, 3, true, 5_000, Bandwidth::FullBand);
        assert_eq!(result, None);
    }

    #[test]
    fn high_loss_low_rate_walks_down_to_narrowband_then_gives_up() {
        let result = decide_fec(true, 40, true, 1_000, Bandwidth::FullBand);
        assert_eq!(result, None);
    }
}
