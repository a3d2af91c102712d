use super::{Detector, FrameContext, MouseSignal, Signal, Stage, ids};
use crate::config::MouseTuning;
use crate::landmarks::{FrameSize, HandRecord, INDEX_TIP, MIDDLE_TIP, THUMB_TIP};

/// Virtual mouse on the dominant hand.
///
/// * index+middle up, ring down: scroll by the vertical travel of the middle tip
/// * middle up, thumb pinched onto it: right click (latched until released)
/// * index up, thumb pinched onto it: click on a short pinch, drag on a long one
/// * index up, ring down: pointer follows the index tip
#[derive(Debug)]
pub struct MouseDetector {
    tuning: MouseTuning,
    frame: FrameSize,
    cursor: Option<(f32, f32)>,
    last_sent: Option<(i32, i32)>,
    pinch_start: Option<f64>,
    dragging: bool,
    right_latched: bool,
    scroll_anchor: Option<f32>,
}

impl MouseDetector {
    pub fn new(tuning: MouseTuning, frame: FrameSize) -> Self {
        Self {
            tuning,
            frame,
            cursor: None,
            last_sent: None,
            pinch_start: None,
            dragging: false,
            right_latched: false,
            scroll_anchor: None,
        }
    }

    /// Tip-to-tip distance, normalized units scaled by the frame width.
    fn pinch_px(&self, hand: &HandRecord, a: usize, b: usize) -> f32 {
        let (pa, pb) = (hand.point(a), hand.point(b));
        (pa.x - pb.x).hypot(pa.y - pb.y) * self.frame.width
    }

    /// Safe-zone mapping onto the screen, then 1/smoothing of the way per frame.
    fn track(&mut self, hand: &HandRecord) -> Option<Signal> {
        let (x, y) = hand.point(INDEX_TIP).to_px(self.frame);
        let pad = self.tuning.safe_zone_px;
        let nx = ((x - pad) / (self.frame.width - 2.0 * pad)).clamp(0.0, 1.0);
        let ny = ((y - pad) / (self.frame.height - 2.0 * pad)).clamp(0.0, 1.0);
        let target = (
            nx * self.tuning.screen_width as f32,
            ny * self.tuning.screen_height as f32,
        );
        let pos = match self.cursor {
            Some((cx, cy)) => (
                cx + (target.0 - cx) / self.tuning.smoothing,
                cy + (target.1 - cy) / self.tuning.smoothing,
            ),
            None => target,
        };
        self.cursor = Some(pos);

        let px = (pos.0.round() as i32, pos.1.round() as i32);
        if self.last_sent == Some(px) {
            return None;
        }
        self.last_sent = Some(px);
        Some(Signal::Mouse(MouseSignal::Move { x: px.0, y: px.1 }))
    }
}

impl Detector for MouseDetector {
    fn id(&self) -> &'static str {
        ids::MOUSE
    }

    fn gesture_ids(&self) -> &'static [&'static str] {
        &[ids::MOUSE]
    }

    fn stage(&self) -> Stage {
        Stage::Dominant
    }

    fn process(&mut self, ctx: &FrameContext<'_>) -> Option<Signal> {
        let hand = ctx.hand?;
        let [_, index_up, middle_up, ring_up, _] = hand.fingers();

        if index_up && middle_up && !ring_up {
            let y = hand.point(MIDDLE_TIP).y * self.frame.height;
            let prev = self.scroll_anchor.replace(y)?;
            let dy = prev - y;
            if dy.abs() <= self.tuning.scroll_deadband_px {
                return None;
            }
            let steps = (dy / self.tuning.scroll_step_px) as i32;
            return (steps != 0).then_some(Signal::Mouse(MouseSignal::Scroll(steps)));
        }
        self.scroll_anchor = None;

        if middle_up && self.pinch_px(hand, MIDDLE_TIP, THUMB_TIP) < self.tuning.right_pinch_px {
            if self.right_latched {
                return None;
            }
            self.right_latched = true;
            return Some(Signal::Mouse(MouseSignal::RightClick));
        }
        self.right_latched = false;

        if index_up {
            if self.pinch_px(hand, INDEX_TIP, THUMB_TIP) < self.tuning.pinch_px {
                let start = *self.pinch_start.get_or_insert(ctx.now);
                if !self.dragging && ctx.now - start > self.tuning.drag_hold_s {
                    self.dragging = true;
                    return Some(Signal::Mouse(MouseSignal::DragStart));
                }
            } else if let Some(start) = self.pinch_start.take() {
                if self.dragging {
                    self.dragging = false;
                    return Some(Signal::Mouse(MouseSignal::DragEnd));
                }
                if ctx.now - start < self.tuning.drag_hold_s {
                    return Some(Signal::Mouse(MouseSignal::LeftClick));
                }
            }
        }

        if index_up && !ring_up {
            return self.track(hand);
        }
        None
    }

    fn reset(&mut self) -> Option<Signal> {
        self.scroll_anchor = None;
        self.pinch_start = None;
        self.right_latched = false;
        if self.dragging {
            self.dragging = false;
            return Some(Signal::Mouse(MouseSignal::DragEnd));
        }
        None
    }

    /// Mouse mode replaces every other dominant-hand gesture.
    fn engaged(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gestures::testutil::ctx;
    use crate::landmarks::{Handedness, Point3, synth};

    const POINT: [bool; 5] = [false, true, false, false, false];

    fn detector() -> MouseDetector {
        MouseDetector::new(MouseTuning::default(), FrameSize::default())
    }

    /// Index-only right hand with the index tip at `tip`.
    fn pointing(tip: (f32, f32)) -> HandRecord {
        synth::hand(Handedness::Right, POINT, (tip.0 + 0.03, tip.1 + 0.05))
    }

    fn pinched(h: &HandRecord, finger_tip: usize) -> HandRecord {
        synth::with_point(h, THUMB_TIP, h.point(finger_tip))
    }

    fn step(d: &mut MouseDetector, h: &HandRecord, now: f64) -> Option<Signal> {
        d.process(&ctx(std::slice::from_ref(h), now))
    }

    #[test]
    fn test_pointer_maps_safe_zone_and_smooths() {
        let mut d = detector();
        assert_eq!(
            step(&mut d, &pointing((0.5, 0.5)), 0.0),
            Some(Signal::Mouse(MouseSignal::Move { x: 960, y: 540 }))
        );
        // target x = (384 - 60) / 520 * 1920; one seventh of the way there
        match step(&mut d, &pointing((0.6, 0.5)), 0.03) {
            Some(Signal::Mouse(MouseSignal::Move { x, y })) => {
                assert!((993..=995).contains(&x));
                assert_eq!(y, 540);
            }
            other => panic!("unexpected {other:?}"),
        }
        // no movement, nothing new to send once converged
        let mut last = None;
        for i in 0..200 {
            last = step(&mut d, &pointing((0.6, 0.5)), 0.1 + i as f64 * 0.03);
        }
        assert_eq!(last, None);
    }

    #[test]
    fn test_short_pinch_clicks() {
        let mut d = detector();
        let open = pointing((0.5, 0.5));
        step(&mut d, &open, 0.0);
        step(&mut d, &pinched(&open, INDEX_TIP), 0.1);
        assert_eq!(
            step(&mut d, &open, 0.2),
            Some(Signal::Mouse(MouseSignal::LeftClick))
        );
    }

    #[test]
    fn test_long_pinch_drags_until_release() {
        let mut d = detector();
        let open = pointing((0.5, 0.5));
        let pinch = pinched(&open, INDEX_TIP);
        step(&mut d, &pinch, 0.0);
        assert_eq!(
            step(&mut d, &pinch, 0.5),
            Some(Signal::Mouse(MouseSignal::DragStart))
        );
        assert_eq!(
            step(&mut d, &open, 0.6),
            Some(Signal::Mouse(MouseSignal::DragEnd))
        );
    }

    #[test]
    fn test_reset_releases_drag() {
        let mut d = detector();
        let pinch = pinched(&pointing((0.5, 0.5)), INDEX_TIP);
        step(&mut d, &pinch, 0.0);
        step(&mut d, &pinch, 0.5);
        assert_eq!(d.reset(), Some(Signal::Mouse(MouseSignal::DragEnd)));
        assert_eq!(d.reset(), None);
    }

    #[test]
    fn test_right_click_is_latched() {
        let mut d = detector();
        let middle = synth::hand(Handedness::Right, [false, false, true, false, false], (0.5, 0.5));
        let pinch = pinched(&middle, MIDDLE_TIP);
        assert_eq!(
            step(&mut d, &pinch, 0.0),
            Some(Signal::Mouse(MouseSignal::RightClick))
        );
        assert_eq!(step(&mut d, &pinch, 0.1), None);
        let apart = synth::with_point(&middle, THUMB_TIP, Point3::new(0.3, 0.7, 0.0));
        step(&mut d, &apart, 0.2);
        assert_eq!(
            step(&mut d, &pinch, 0.3),
            Some(Signal::Mouse(MouseSignal::RightClick))
        );
    }

    #[test]
    fn test_two_finger_scroll() {
        let mut d = detector();
        let pose = [false, true, true, false, false];
        assert_eq!(step(&mut d, &synth::hand(Handedness::Right, pose, (0.5, 0.5)), 0.0), None);
        // hand raised by 28.8px, 4px per step
        assert_eq!(
            step(&mut d, &synth::hand(Handedness::Right, pose, (0.5, 0.44)), 0.03),
            Some(Signal::Mouse(MouseSignal::Scroll(7)))
        );
        // small tremor stays inside the deadband
        assert_eq!(
            step(&mut d, &synth::hand(Handedness::Right, pose, (0.5, 0.45)), 0.06),
            None
        );
    }
}
