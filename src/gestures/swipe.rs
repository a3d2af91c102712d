use super::{Detector, FrameContext, Signal, Stage, SwipeKind, ids, scaled};
use crate::config::SwipeTuning;

/// Open-hand sideways swipe. Four fingers switch tabs, five switch apps.
/// The frame velocity must clear the threshold and the longer-window travel
/// must agree in direction, so a single jittery frame never counts.
#[derive(Debug)]
pub struct SwipeDetector {
    tuning: SwipeTuning,
}

impl SwipeDetector {
    pub fn new(tuning: SwipeTuning) -> Self {
        Self { tuning }
    }
}

impl Detector for SwipeDetector {
    fn id(&self) -> &'static str {
        ids::SWIPE
    }

    fn gesture_ids(&self) -> &'static [&'static str] {
        &[ids::SWIPE]
    }

    fn stage(&self) -> Stage {
        Stage::Dominant
    }

    fn process(&mut self, ctx: &FrameContext<'_>) -> Option<Signal> {
        let fingers = ctx.hand?.extended_count();
        if fingers < 4 {
            return None;
        }
        let vx = ctx.motion.velocity.0;
        if vx.abs() <= scaled(self.tuning.velocity_px, ctx.sensitivity) {
            return None;
        }
        let (tx, _) = ctx.motion.travel?;
        if tx.abs() < self.tuning.min_travel_px || tx.signum() != vx.signum() {
            return None;
        }
        let kind = match (fingers == 5, vx > 0.0) {
            (true, true) => SwipeKind::NextApp,
            (true, false) => SwipeKind::PrevApp,
            (false, true) => SwipeKind::NextTab,
            (false, false) => SwipeKind::PrevTab,
        };
        Some(Signal::Swipe(kind))
    }

    fn reset(&mut self) -> Option<Signal> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gestures::testutil::ctx;
    use crate::landmarks::{FingerState, Handedness, synth};

    fn swipe(pose: FingerState, vx: f32) -> Option<Signal> {
        let mut d = SwipeDetector::new(SwipeTuning::default());
        let hands = [synth::hand(Handedness::Right, pose, (0.5, 0.5))];
        let mut c = ctx(&hands, 0.0);
        c.motion.velocity = (vx, 0.0);
        c.motion.travel = Some((vx * 4.0, 0.0));
        d.process(&c)
    }

    #[test]
    fn test_finger_count_selects_tab_or_app() {
        assert_eq!(swipe([true; 5], 40.0), Some(Signal::Swipe(SwipeKind::NextApp)));
        assert_eq!(
            swipe([false, true, true, true, true], 40.0),
            Some(Signal::Swipe(SwipeKind::NextTab))
        );
        assert_eq!(swipe([true; 5], -40.0), Some(Signal::Swipe(SwipeKind::PrevApp)));
        assert_eq!(
            swipe([false, true, true, true, true], -40.0),
            Some(Signal::Swipe(SwipeKind::PrevTab))
        );
    }

    #[test]
    fn test_three_fingers_never_swipe() {
        assert_eq!(swipe([false, true, true, true, false], 40.0), None);
        assert_eq!(swipe([false, true, true, true, false], 400.0), None);
    }

    #[test]
    fn test_jitter_without_travel_is_ignored() {
        let mut d = SwipeDetector::new(SwipeTuning::default());
        let hands = [synth::hand(Handedness::Right, [true; 5], (0.5, 0.5))];
        let mut c = ctx(&hands, 0.0);
        c.motion.velocity = (40.0, 0.0);
        c.motion.travel = Some((-10.0, 0.0));
        assert_eq!(d.process(&c), None);
        c.motion.travel = None;
        assert_eq!(d.process(&c), None);
    }
}
