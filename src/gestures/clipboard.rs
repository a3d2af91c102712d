use super::{Detector, Ema, FrameContext, Signal, Stage, ids, scaled};
use crate::config::ClipboardTuning;
use crate::landmarks::{INDEX_TIP, MIDDLE_TIP, THUMB_TIP};

const POSE: [bool; 5] = [true, true, true, false, false];

/// Three-finger pinch: closing the thumb onto index+middle copies, spreading
/// them pastes. The anchor is the spread when the pose was first seen.
#[derive(Debug)]
pub struct ClipboardDetector {
    tuning: ClipboardTuning,
    spread: Ema,
    anchor: Option<f32>,
    last_fire: Option<f64>,
}

impl ClipboardDetector {
    pub fn new(tuning: ClipboardTuning) -> Self {
        Self {
            spread: Ema::new(tuning.smoothing),
            tuning,
            anchor: None,
            last_fire: None,
        }
    }
}

impl Detector for ClipboardDetector {
    fn id(&self) -> &'static str {
        ids::COPY
    }

    fn gesture_ids(&self) -> &'static [&'static str] {
        &[ids::COPY, ids::PASTE]
    }

    fn stage(&self) -> Stage {
        Stage::Dominant
    }

    fn process(&mut self, ctx: &FrameContext<'_>) -> Option<Signal> {
        let Some(hand) = ctx.hand.filter(|h| h.is_pose(POSE)) else {
            self.reset();
            return None;
        };

        let thumb = hand.point(THUMB_TIP);
        let raw = (thumb.distance(&hand.point(INDEX_TIP)) + thumb.distance(&hand.point(MIDDLE_TIP))) / 2.0;
        let spread = self.spread.update(raw);
        let Some(anchor) = self.anchor else {
            self.anchor = Some(spread);
            return None;
        };

        if self
            .last_fire
            .is_some_and(|t| ctx.now - t < self.tuning.cooldown_s)
        {
            return None;
        }

        let threshold = scaled(self.tuning.trigger_dist, ctx.sensitivity);
        let delta = spread - anchor;
        let signal = if delta < -threshold {
            Signal::Copy
        } else if delta > threshold {
            Signal::Paste
        } else {
            return None;
        };
        self.last_fire = Some(ctx.now);
        self.anchor = Some(spread);
        Some(signal)
    }

    fn reset(&mut self) -> Option<Signal> {
        self.anchor = None;
        self.spread.reset();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gestures::testutil::ctx;
    use crate::landmarks::{HandRecord, Handedness, Point3, synth};

    fn with_thumb(x: f32, y: f32) -> HandRecord {
        let h = synth::hand(Handedness::Right, POSE, (0.5, 0.6));
        synth::with_point(&h, THUMB_TIP, Point3::new(x, y, 0.0))
    }

    fn run(d: &mut ClipboardDetector, h: &HandRecord, frames: usize, t0: f64) -> Vec<Signal> {
        (0..frames)
            .filter_map(|i| d.process(&ctx(std::slice::from_ref(h), t0 + i as f64 * 0.03)))
            .collect()
    }

    #[test]
    fn test_pinching_in_copies() {
        let mut d = ClipboardDetector::new(ClipboardTuning::default());
        let rest = synth::hand(Handedness::Right, POSE, (0.5, 0.6));
        assert!(run(&mut d, &rest, 3, 0.0).is_empty());
        let pinched = with_thumb(0.41, 0.58);
        assert!(pinched.is_pose(POSE));
        assert_eq!(run(&mut d, &pinched, 20, 0.1), vec![Signal::Copy]);
    }

    #[test]
    fn test_spreading_out_pastes() {
        let mut d = ClipboardDetector::new(ClipboardTuning::default());
        let rest = synth::hand(Handedness::Right, POSE, (0.5, 0.6));
        run(&mut d, &rest, 3, 0.0);
        let spread = with_thumb(0.30, 0.66);
        assert_eq!(run(&mut d, &spread, 20, 0.1), vec![Signal::Paste]);
    }

    #[test]
    fn test_pose_break_drops_anchor() {
        let mut d = ClipboardDetector::new(ClipboardTuning::default());
        let rest = synth::hand(Handedness::Right, POSE, (0.5, 0.6));
        run(&mut d, &rest, 3, 0.0);
        let fist = synth::hand(Handedness::Right, [false; 5], (0.5, 0.6));
        run(&mut d, &fist, 1, 0.1);
        assert!(d.anchor.is_none());
        // re-entering the pose already pinched anchors there: nothing fires
        assert!(run(&mut d, &with_thumb(0.41, 0.58), 10, 0.2).is_empty());
    }
}
