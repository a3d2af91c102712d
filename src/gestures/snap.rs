use std::collections::VecDeque;

use super::{Detector, Ema, FrameContext, Signal, Stage, ids, scaled};
use crate::config::SnapTuning;
use crate::landmarks::{MIDDLE_TIP, THUMB_TIP};

/// Thumb-middle finger snap.
///
/// Prepped while the smoothed thumb-middle distance is under `touch_dist`
/// with ring and pinky folded; fires when the distance then opens faster than
/// `snap_velocity` across the sample window. Distances are normalized 3D.
#[derive(Debug)]
pub struct SnapDetector {
    tuning: SnapTuning,
    dist: Ema,
    window: VecDeque<f32>,
    prepped: bool,
}

impl SnapDetector {
    pub fn new(tuning: SnapTuning) -> Self {
        Self {
            dist: Ema::new(tuning.smoothing),
            window: VecDeque::with_capacity(tuning.window),
            prepped: false,
            tuning,
        }
    }
}

impl Detector for SnapDetector {
    fn id(&self) -> &'static str {
        ids::SNAP
    }

    fn gesture_ids(&self) -> &'static [&'static str] {
        &[ids::SNAP]
    }

    fn stage(&self) -> Stage {
        Stage::NonDominant
    }

    fn process(&mut self, ctx: &FrameContext<'_>) -> Option<Signal> {
        let hand = ctx.hand?;
        let f = hand.fingers();
        // ring and pinky up belong to copy/paste and screenshot poses
        if f[3] || f[4] {
            self.reset();
            return None;
        }

        let d = self
            .dist
            .update(hand.point(THUMB_TIP).distance(&hand.point(MIDDLE_TIP)));
        if self.window.len() == self.tuning.window {
            self.window.pop_front();
        }
        self.window.push_back(d);

        if d < self.tuning.touch_dist {
            self.prepped = true;
            return None;
        }
        if !self.prepped {
            return None;
        }
        if d > self.tuning.reset_distance {
            self.prepped = false;
            return None;
        }
        if self.window.len() < self.tuning.window {
            return None;
        }

        let first = self.window.front().copied().unwrap_or(d);
        let velocity = d - first;
        if velocity > scaled(self.tuning.snap_velocity, ctx.sensitivity) {
            self.prepped = false;
            self.window.clear();
            return Some(Signal::Snap);
        }
        None
    }

    fn reset(&mut self) -> Option<Signal> {
        self.prepped = false;
        self.window.clear();
        self.dist.reset();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gestures::testutil::ctx;
    use crate::landmarks::{HandRecord, Handedness, Point3, synth};

    fn thumb_at(offset: f32) -> HandRecord {
        let h = synth::hand(Handedness::Left, [false, false, true, false, false], (0.5, 0.6));
        let m = h.point(MIDDLE_TIP);
        synth::with_point(&h, THUMB_TIP, Point3::new(m.x, m.y + offset, 0.0))
    }

    fn step(d: &mut SnapDetector, h: &HandRecord, t: f64) -> Option<Signal> {
        d.process(&ctx(std::slice::from_ref(h), t))
    }

    #[test]
    fn test_touch_then_flick_snaps_once() {
        let mut d = SnapDetector::new(SnapTuning::default());
        for i in 0..4 {
            assert!(step(&mut d, &thumb_at(0.0), i as f64 * 0.03).is_none());
        }
        assert_eq!(step(&mut d, &thumb_at(0.2), 0.15), Some(Signal::Snap));
        assert!(step(&mut d, &thumb_at(0.2), 0.18).is_none());
    }

    #[test]
    fn test_slow_opening_does_not_snap() {
        let mut d = SnapDetector::new(SnapTuning::default());
        for i in 0..4 {
            step(&mut d, &thumb_at(0.0), i as f64 * 0.03);
        }
        let fired = (1..30).any(|i| step(&mut d, &thumb_at(i as f32 * 0.005), 0.2 + i as f64 * 0.03).is_some());
        assert!(!fired);
    }

    #[test]
    fn test_ring_or_pinky_up_blocks_prep() {
        let mut d = SnapDetector::new(SnapTuning::default());
        let base = synth::hand(Handedness::Left, [false, false, true, true, true], (0.5, 0.6));
        let m = base.point(MIDDLE_TIP);
        let touching = synth::with_point(&base, THUMB_TIP, m);
        let open = synth::with_point(&base, THUMB_TIP, Point3::new(m.x, m.y + 0.2, 0.0));
        for i in 0..4 {
            step(&mut d, &touching, i as f64 * 0.03);
        }
        assert!(step(&mut d, &open, 0.15).is_none());
    }
}
