use std::collections::VecDeque;

use log::debug;

use super::{Detector, Ema, FrameContext, Signal, Stage, ZoomDirection, ids};
use crate::config::ZoomTuning;
use crate::landmarks::{FrameSize, HandRecord, INDEX_MCP, PINKY_MCP, WRIST};

const PALM: [usize; 3] = [WRIST, INDEX_MCP, PINKY_MCP];
const BASE_ZOOM: f32 = 100.0;

fn is_open(h: &HandRecord) -> bool {
    h.extended_count() >= 4
}

/// Two open hands moving apart/together.
///
/// Becomes active once both hands were present and open for a quorum of the
/// recent frames; the palm distance at that moment anchors the current zoom.
#[derive(Debug)]
pub struct ZoomDetector {
    tuning: ZoomTuning,
    frame: FrameSize,
    presence: VecDeque<bool>,
    active: bool,
    dist: Ema,
    zoom: Ema,
    anchor_dist: f32,
    anchor_zoom: f32,
    target: f32,
    current: f32,
    reported: f32,
}

impl ZoomDetector {
    pub fn new(tuning: ZoomTuning, frame: FrameSize) -> Self {
        let base = BASE_ZOOM.clamp(tuning.min_zoom, tuning.max_zoom);
        Self {
            presence: VecDeque::with_capacity(tuning.presence_window),
            dist: Ema::new(tuning.dist_smoothing),
            zoom: Ema::new(tuning.zoom_smoothing),
            tuning,
            frame,
            active: false,
            anchor_dist: 1.0,
            anchor_zoom: base,
            target: base,
            current: base,
            reported: base,
        }
    }

    fn deactivate(&mut self) {
        if self.active {
            debug!("zoom: released at {:.0}%", self.current);
        }
        self.active = false;
        self.dist.reset();
        self.zoom.reset();
    }
}

impl Detector for ZoomDetector {
    fn id(&self) -> &'static str {
        ids::ZOOM
    }

    fn gesture_ids(&self) -> &'static [&'static str] {
        &[ids::ZOOM]
    }

    fn stage(&self) -> Stage {
        Stage::TwoHand
    }

    fn process(&mut self, ctx: &FrameContext<'_>) -> Option<Signal> {
        let both_open = ctx.hands.len() == 2 && ctx.hands.iter().all(is_open);
        if self.presence.len() == self.tuning.presence_window.max(1) {
            self.presence.pop_front();
        }
        self.presence.push_back(both_open);
        let present = self.presence.iter().filter(|p| **p).count();

        if !both_open || present < self.tuning.presence_quorum {
            self.deactivate();
            return None;
        }

        let (ax, ay) = ctx.hands[0].centroid_px(&PALM, self.frame);
        let (bx, by) = ctx.hands[1].centroid_px(&PALM, self.frame);
        let dist = self.dist.update((ax - bx).hypot(ay - by));

        if !self.active {
            self.active = true;
            self.anchor_dist = dist.max(1.0);
            self.anchor_zoom = self.current;
            self.zoom.reset();
            self.zoom.update(self.current);
            debug!("zoom: anchored at {:.1}px, {:.0}%", self.anchor_dist, self.anchor_zoom);
            return None;
        }

        let ratio = dist / self.anchor_dist;
        self.target = (self.anchor_zoom * (1.0 + ctx.sensitivity * (ratio - 1.0)))
            .clamp(self.tuning.min_zoom, self.tuning.max_zoom);
        self.current = self.zoom.update(self.target);

        let level = self.current.round();
        if (level - self.reported).abs() <= self.tuning.report_step {
            return None;
        }
        let direction = if level > self.reported {
            ZoomDirection::In
        } else {
            ZoomDirection::Out
        };
        self.reported = level;
        Some(Signal::Zoom {
            level: level as u32,
            direction,
        })
    }

    fn reset(&mut self) -> Option<Signal> {
        self.presence.clear();
        self.deactivate();
        None
    }

    fn engaged(&self) -> bool {
        self.active
    }

    fn level(&self) -> Option<f32> {
        Some(self.current)
    }
}
