use std::collections::VecDeque;

use log::debug;

use super::{Detector, FrameContext, Signal, Stage, ids, scaled};
use crate::config::CircularTuning;
use crate::landmarks::{FrameSize, INDEX_TIP};

/// Rotation below this never reads as a circle, whatever the profile says.
const MIN_ROTATION_DEG: f32 = 200.0;

/// Index-finger circle drawing: clockwise redoes, counter-clockwise undoes.
#[derive(Debug)]
pub struct CircularDetector {
    tuning: CircularTuning,
    frame: FrameSize,
    path: VecDeque<(f32, f32)>,
    holdoff: u32,
}

impl CircularDetector {
    pub fn new(tuning: CircularTuning, frame: FrameSize) -> Self {
        Self {
            path: VecDeque::with_capacity(tuning.history),
            tuning,
            frame,
            holdoff: 0,
        }
    }

    fn bounds(&self) -> (f32, f32, f32, f32) {
        self.path.iter().fold(
            (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
            |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        )
    }

    /// Sensitivity only relaxes the size gate; the angle stays fixed.
    fn large_enough(&self, sensitivity: f32) -> bool {
        let (x0, y0, x1, y1) = self.bounds();
        (x1 - x0).min(y1 - y0) >= scaled(self.tuning.min_size_px, sensitivity)
    }

    /// Signed degrees swept around the path's bounding-box center.
    /// Positive is clockwise on screen (image y grows downward).
    fn rotation(&self) -> f32 {
        let (x0, y0, x1, y1) = self.bounds();
        let (cx, cy) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);

        let mut total = 0.0;
        let mut prev: Option<f32> = None;
        for &(x, y) in &self.path {
            let angle = (y - cy).atan2(x - cx).to_degrees();
            if let Some(p) = prev {
                let mut delta = angle - p;
                if delta > 180.0 {
                    delta -= 360.0;
                } else if delta < -180.0 {
                    delta += 360.0;
                }
                if delta.abs() >= self.tuning.jitter_deg {
                    total += delta;
                }
            }
            prev = Some(angle);
        }
        total
    }
}

impl Detector for CircularDetector {
    fn id(&self) -> &'static str {
        ids::CIRCULAR
    }

    fn gesture_ids(&self) -> &'static [&'static str] {
        &[ids::CIRCULAR]
    }

    fn stage(&self) -> Stage {
        Stage::Dominant
    }

    fn process(&mut self, ctx: &FrameContext<'_>) -> Option<Signal> {
        self.holdoff = self.holdoff.saturating_sub(1);
        let Some(hand) = ctx.hand else {
            self.path.clear();
            return None;
        };
        let f = hand.fingers();
        if !(f[1] && !f[2] && !f[3] && !f[4]) {
            self.path.clear();
            return None;
        }

        if self.path.len() == self.tuning.history {
            self.path.pop_front();
        }
        self.path.push_back(hand.point(INDEX_TIP).to_px(self.frame));
        if self.path.len() < self.tuning.min_points || !self.large_enough(ctx.sensitivity) {
            return None;
        }

        let total = self.rotation();
        if total.abs() < self.tuning.rotation_deg.max(MIN_ROTATION_DEG) {
            return None;
        }
        debug!("circular: {total:.0} degrees over {} points", self.path.len());
        self.path.clear();
        self.holdoff = self.tuning.holdoff_frames;
        Some(if total > 0.0 { Signal::Redo } else { Signal::Undo })
    }

    fn reset(&mut self) -> Option<Signal> {
        self.path.clear();
        None
    }

    /// Holds the frame for a short while after firing so the circle's tail
    /// cannot read as a swipe.
    fn engaged(&self) -> bool {
        self.holdoff > 0
    }
}
