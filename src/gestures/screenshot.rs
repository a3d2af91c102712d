use super::{Detector, FrameContext, Signal, Stage, ids, scaled};
use crate::config::ScreenshotTuning;

const POSE: [bool; 5] = [false, true, true, true, true];

/// Single hand, four fingers up with the thumb tucked, pulled down sharply.
#[derive(Debug)]
pub struct ScreenshotDetector {
    tuning: ScreenshotTuning,
    last_fire: Option<f64>,
}

impl ScreenshotDetector {
    pub fn new(tuning: ScreenshotTuning) -> Self {
        Self {
            tuning,
            last_fire: None,
        }
    }
}

impl Detector for ScreenshotDetector {
    fn id(&self) -> &'static str {
        ids::SCREENSHOT
    }

    fn gesture_ids(&self) -> &'static [&'static str] {
        &[ids::SCREENSHOT]
    }

    fn stage(&self) -> Stage {
        Stage::Dominant
    }

    fn process(&mut self, ctx: &FrameContext<'_>) -> Option<Signal> {
        if ctx.hands.len() != 1 || !ctx.hand.is_some_and(|h| h.is_pose(POSE)) {
            return None;
        }
        if ctx.motion.velocity.1 <= scaled(self.tuning.velocity_px, ctx.sensitivity) {
            return None;
        }
        if self
            .last_fire
            .is_some_and(|t| ctx.now - t < self.tuning.cooldown_s)
        {
            return None;
        }
        self.last_fire = Some(ctx.now);
        Some(Signal::Screenshot)
    }

    fn reset(&mut self) -> Option<Signal> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gestures::testutil::ctx;
    use crate::landmarks::{Handedness, synth};

    #[test]
    fn test_downward_pull_captures_once_per_window() {
        let mut d = ScreenshotDetector::new(ScreenshotTuning::default());
        let hands = [synth::hand(Handedness::Right, POSE, (0.5, 0.5))];
        let mut c = ctx(&hands, 0.0);
        c.motion.velocity = (0.0, 40.0);
        assert_eq!(d.process(&c), Some(Signal::Screenshot));
        c.now = 1.0;
        assert_eq!(d.process(&c), None);
        c.now = 1.6;
        assert_eq!(d.process(&c), Some(Signal::Screenshot));
    }

    #[test]
    fn test_requires_pose_direction_and_single_hand() {
        let mut d = ScreenshotDetector::new(ScreenshotTuning::default());
        let open = [synth::hand(Handedness::Right, [true; 5], (0.5, 0.5))];
        let mut c = ctx(&open, 0.0);
        c.motion.velocity = (0.0, 40.0);
        assert_eq!(d.process(&c), None);

        let hands = [synth::hand(Handedness::Right, POSE, (0.5, 0.5))];
        let mut c = ctx(&hands, 0.0);
        c.motion.velocity = (0.0, -40.0);
        assert_eq!(d.process(&c), None);

        let two = [
            synth::hand(Handedness::Right, POSE, (0.6, 0.5)),
            synth::hand(Handedness::Left, POSE, (0.3, 0.5)),
        ];
        let mut c = ctx(&two, 0.0);
        c.motion.velocity = (0.0, 40.0);
        assert_eq!(d.process(&c), None);
    }
}
