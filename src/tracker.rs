//! Smoothed palm-position history for the dominant hand.

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::MotionTuning;
use crate::landmarks::{FrameSize, HandRecord};

pub const HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MotionSample {
    pub x: f32,
    pub y: f32,
}

/// Per-frame motion summary handed to the detectors (pixels per frame).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Motion {
    /// Delta between the two most recent samples.
    pub velocity: (f32, f32),
    /// Delta across the configured long window, once enough samples exist.
    pub travel: Option<(f32, f32)>,
    pub samples: usize,
}

#[derive(Debug)]
pub struct MotionTracker {
    history: VecDeque<MotionSample>,
    alpha: f32,
    window: usize,
    frame: FrameSize,
}

impl MotionTracker {
    pub fn new(tuning: &MotionTuning, frame: FrameSize) -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            alpha: tuning.alpha.clamp(0.0, 0.99),
            window: tuning.window.clamp(1, HISTORY_CAPACITY - 1),
            frame,
        }
    }

    /// Feeds the tracked hand for this frame. `None` (hand not present)
    /// empties the history so nothing carries across a tracking gap.
    pub fn update(&mut self, hand: Option<&HandRecord>) -> Motion {
        let Some(hand) = hand else {
            self.clear();
            return Motion::default();
        };

        let (raw_x, raw_y) = hand.palm_center_px(self.frame);
        let sample = match self.history.back() {
            Some(prev) => MotionSample {
                x: self.alpha * prev.x + (1.0 - self.alpha) * raw_x,
                y: self.alpha * prev.y + (1.0 - self.alpha) * raw_y,
            },
            None => MotionSample { x: raw_x, y: raw_y },
        };
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(sample);
        self.motion()
    }

    pub fn motion(&self) -> Motion {
        let n = self.history.len();
        let delta = |back: usize| {
            let newest = self.history[n - 1];
            let older = self.history[n - 1 - back];
            (newest.x - older.x, newest.y - older.y)
        };
        Motion {
            velocity: if n >= 2 { delta(1) } else { (0.0, 0.0) },
            travel: (n > self.window).then(|| delta(self.window)),
            samples: n,
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn latest(&self) -> Option<MotionSample> {
        self.history.back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{Handedness, synth};

    fn tracker() -> MotionTracker {
        MotionTracker::new(&MotionTuning::default(), FrameSize::default())
    }

    #[test]
    fn test_first_sample_is_raw_then_smoothed() {
        let mut t = tracker();
        let a = synth::hand(Handedness::Right, [true; 5], (0.5, 0.6));
        let b = synth::hand(Handedness::Right, [true; 5], (0.6, 0.6));
        t.update(Some(&a));
        let first = t.latest().unwrap();
        assert!((first.x - 320.0).abs() < 1e-3);

        let m = t.update(Some(&b));
        // 0.7 * 320 + 0.3 * 384
        assert!((t.latest().unwrap().x - 339.2).abs() < 1e-2);
        assert!((m.velocity.0 - 19.2).abs() < 1e-2);
        assert!(m.velocity.1.abs() < 1e-4);
        assert!(m.travel.is_none());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut t = tracker();
        let h = synth::hand(Handedness::Right, [true; 5], (0.5, 0.6));
        for _ in 0..(HISTORY_CAPACITY + 7) {
            t.update(Some(&h));
        }
        assert_eq!(t.motion().samples, HISTORY_CAPACITY);
    }

    #[test]
    fn test_hand_loss_clears_history() {
        let mut t = tracker();
        let h = synth::hand(Handedness::Right, [true; 5], (0.5, 0.6));
        t.update(Some(&h));
        t.update(Some(&h));
        let m = t.update(None);
        assert_eq!(t.motion().samples, 0);
        assert_eq!(m, Motion::default());

        // re-acquisition far away must not produce a velocity spike
        let far = synth::hand(Handedness::Right, [true; 5], (0.1, 0.2));
        let m = t.update(Some(&far));
        assert_eq!(m.velocity, (0.0, 0.0));
    }

    #[test]
    fn test_travel_spans_window() {
        let mut t = tracker();
        for i in 0..8 {
            let h = synth::hand(Handedness::Right, [true; 5], (0.3 + i as f32 * 0.02, 0.6));
            t.update(Some(&h));
        }
        let m = t.motion();
        let (tx, _) = m.travel.unwrap();
        assert!(tx > m.velocity.0);
        assert!(tx > 0.0);
    }
}
