use log::debug;

use super::{Detector, Ema, FrameContext, Signal, Stage, gain, ids};
use crate::config::VolumeTuning;
use crate::landmarks::{FrameSize, INDEX_TIP, THUMB_TIP};

/// Pinch-drag volume on the non-dominant hand.
///
/// Thumb+index up (others down) arms the detector and anchors the current
/// pinch span against the current level. While armed, the level follows the
/// span delta. Any of middle/ring/pinky extending disarms, and the pose must
/// then wait `rearm_s` before it can arm again.
#[derive(Debug)]
pub struct VolumeDetector {
    tuning: VolumeTuning,
    frame: FrameSize,
    span: Ema,
    armed: bool,
    anchor_span: f32,
    anchor_level: f32,
    level: u8,
    disarmed_at: Option<f64>,
}

impl VolumeDetector {
    pub fn new(tuning: VolumeTuning, frame: FrameSize) -> Self {
        let level = tuning.initial_level.min(100);
        Self {
            span: Ema::new(tuning.smoothing),
            tuning,
            frame,
            armed: false,
            anchor_span: 0.0,
            anchor_level: level as f32,
            level,
            disarmed_at: None,
        }
    }

    fn disarm(&mut self, now: f64) {
        if self.armed {
            debug!("volume: disarmed at {}%", self.level);
            self.disarmed_at = Some(now);
        }
        self.armed = false;
        self.span.reset();
    }
}

impl Detector for VolumeDetector {
    fn id(&self) -> &'static str {
        ids::VOLUME
    }

    fn gesture_ids(&self) -> &'static [&'static str] {
        &[ids::VOLUME]
    }

    fn stage(&self) -> Stage {
        Stage::NonDominant
    }

    fn process(&mut self, ctx: &FrameContext<'_>) -> Option<Signal> {
        let hand = ctx.hand?;
        let f = hand.fingers();
        if f[2] || f[3] || f[4] {
            self.disarm(ctx.now);
            return None;
        }

        let (tx, ty) = hand.point(THUMB_TIP).to_px(self.frame);
        let (ix, iy) = hand.point(INDEX_TIP).to_px(self.frame);
        let raw = (tx - ix).hypot(ty - iy);

        if !self.armed {
            let pinch_pose = f[0] && f[1];
            let rested = self
                .disarmed_at
                .is_none_or(|t| ctx.now - t >= self.tuning.rearm_s);
            if !pinch_pose || !rested {
                return None;
            }
            self.span.reset();
            self.anchor_span = self.span.update(raw);
            self.anchor_level = self.level as f32;
            self.armed = true;
            debug!("volume: armed at {}% (span {:.1}px)", self.level, self.anchor_span);
            return None;
        }

        let span = self.span.update(raw);
        let range = (self.tuning.max_dist_px - self.tuning.min_dist_px).max(1.0);
        let delta = (span - self.anchor_span) / range * 100.0 * gain(ctx.sensitivity);
        let target = (self.anchor_level + delta).clamp(0.0, 100.0);
        let rounded = ((target / 5.0).round() * 5.0) as u8;
        if rounded == self.level {
            return None;
        }
        self.level = rounded;
        Some(Signal::Volume(rounded))
    }

    fn reset(&mut self) -> Option<Signal> {
        self.armed = false;
        self.span.reset();
        None
    }

    fn level(&self) -> Option<f32> {
        Some(self.level as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gestures::testutil::ctx;
    use crate::landmarks::{HandRecord, Handedness, Point3, synth};

    const PINCH: [bool; 5] = [true, true, false, false, false];

    fn detector() -> VolumeDetector {
        VolumeDetector::new(VolumeTuning::default(), FrameSize::default())
    }

    /// Left hand in pinch pose with the index tip pushed sideways by `spread`.
    fn pinch(spread: f32) -> HandRecord {
        let h = synth::hand(Handedness::Left, PINCH, (0.5, 0.6));
        let tip = h.point(INDEX_TIP);
        synth::with_point(&h, INDEX_TIP, Point3::new(tip.x - spread, tip.y, 0.0))
    }

    fn feed(d: &mut VolumeDetector, hand: &HandRecord, frames: usize, t0: f64) -> Vec<u8> {
        let hands = [hand.clone()];
        (0..frames)
            .filter_map(|i| match d.process(&ctx(&hands, t0 + i as f64 * 0.03)) {
                Some(Signal::Volume(v)) => Some(v),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_arming_frame_emits_nothing() {
        let mut d = detector();
        assert!(feed(&mut d, &pinch(0.0), 5, 0.0).is_empty());
        assert_eq!(d.level(), Some(50.0));
    }

    #[test]
    fn test_spreading_raises_volume_monotonically() {
        let mut d = detector();
        feed(&mut d, &pinch(0.0), 2, 0.0);
        // the left thumb sits at higher x, so moving the index tip left widens the pinch
        let levels = feed(&mut d, &pinch(0.1), 30, 1.0);
        assert!(!levels.is_empty());
        assert!(levels.windows(2).all(|w| w[0] <= w[1]));
        assert!(levels.iter().all(|v| *v > 50 && *v <= 100 && v % 5 == 0));
    }

    #[test]
    fn test_closing_lowers_and_clamps() {
        let mut d = detector();
        feed(&mut d, &pinch(0.0), 2, 0.0);
        let levels = feed(&mut d, &pinch(-0.06), 30, 1.0);
        assert!(levels.iter().all(|v| *v < 50));

        let mut d = detector();
        feed(&mut d, &pinch(0.0), 2, 0.0);
        let levels = feed(&mut d, &pinch(0.9), 40, 1.0);
        assert_eq!(levels.last().copied(), Some(100));
    }

    #[test]
    fn test_open_hand_disarms_and_waits_to_rearm() {
        let mut d = detector();
        feed(&mut d, &pinch(0.0), 2, 0.0);
        let open = synth::hand(Handedness::Left, [true; 5], (0.5, 0.6));
        assert!(d.process(&ctx(&[open], 0.1)).is_none());
        assert!(!d.armed);

        // still inside the re-arm window: the pinch is ignored
        feed(&mut d, &pinch(0.0), 1, 0.2);
        assert!(!d.armed);
        feed(&mut d, &pinch(0.0), 1, 0.7);
        assert!(d.armed);
    }
}
