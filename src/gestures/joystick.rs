use log::info;

use super::{Detector, Direction, FrameContext, Signal, Stage, ids};
use crate::config::JoystickTuning;
use crate::landmarks::{FrameSize, INDEX_TIP};

const PEACE: [bool; 5] = [false, true, true, false, false];
const MAX_SPEED: f32 = 5.0;

/// Text-selection joystick. Holding a peace sign toggles text mode; while it
/// is on, the index tip's offset from the frame center steers Shift+arrows.
#[derive(Debug)]
pub struct JoystickDetector {
    tuning: JoystickTuning,
    frame: FrameSize,
    text_mode: bool,
    peace_frames: u32,
}

impl JoystickDetector {
    pub fn new(tuning: JoystickTuning, frame: FrameSize) -> Self {
        Self {
            tuning,
            frame,
            text_mode: false,
            peace_frames: 0,
        }
    }
}

impl Detector for JoystickDetector {
    fn id(&self) -> &'static str {
        ids::TEXT_MODE
    }

    fn gesture_ids(&self) -> &'static [&'static str] {
        &[ids::TEXT_MODE]
    }

    fn stage(&self) -> Stage {
        Stage::Dominant
    }

    fn process(&mut self, ctx: &FrameContext<'_>) -> Option<Signal> {
        let hand = ctx.hand?;
        if hand.is_pose(PEACE) {
            self.peace_frames += 1;
            if self.peace_frames == self.tuning.hold_frames {
                self.text_mode = !self.text_mode;
                info!("text mode {}", if self.text_mode { "on" } else { "off" });
            }
            return None;
        }
        self.peace_frames = 0;
        if !self.text_mode {
            return None;
        }

        let (x, y) = hand.point(INDEX_TIP).to_px(self.frame);
        let (dx, dy) = (x - self.frame.width / 2.0, y - self.frame.height / 2.0);
        let dist = dx.hypot(dy);
        if dist < self.tuning.dead_zone_px {
            return None;
        }
        let direction = if dx.abs() > dy.abs() {
            if dx > 0.0 { Direction::Right } else { Direction::Left }
        } else if dy > 0.0 {
            Direction::Down
        } else {
            Direction::Up
        };
        let reach = dist.min(self.tuning.max_radius_px) / self.tuning.max_radius_px;
        let speed = ((reach * MAX_SPEED) as u8).max(1);
        Some(Signal::Joystick { direction, speed })
    }

    fn reset(&mut self) -> Option<Signal> {
        self.peace_frames = 0;
        None
    }

    fn engaged(&self) -> bool {
        self.text_mode
    }
}
