//! Gesture detectors. Each detector is a small state machine fed one frame at
//! a time through [`Detector::process`]; the arbiter decides which ones run.

mod circular;
mod clipboard;
mod joystick;
mod mouse;
mod screenshot;
mod snap;
mod swipe;
mod volume;
mod zoom;

use serde::Serialize;

use crate::config::Thresholds;
use crate::landmarks::{FrameSize, HandRecord};
use crate::tracker::Motion;

pub use circular::CircularDetector;
pub use clipboard::ClipboardDetector;
pub use joystick::JoystickDetector;
pub use mouse::MouseDetector;
pub use screenshot::ScreenshotDetector;
pub use snap::SnapDetector;
pub use swipe::SwipeDetector;
pub use volume::VolumeDetector;
pub use zoom::ZoomDetector;

/// Gesture ids as stored in the registry.
pub mod ids {
    pub const VOLUME: &str = "volume";
    pub const ZOOM: &str = "zoom";
    pub const SWIPE: &str = "swipe";
    pub const SNAP: &str = "snap";
    pub const COPY: &str = "copy";
    pub const PASTE: &str = "paste";
    pub const SCREENSHOT: &str = "screenshot";
    pub const TEXT_MODE: &str = "text_mode";
    pub const CIRCULAR: &str = "circular";
    pub const MOUSE: &str = "mouse";

    /// Order in which the arbiter tries gestures within a frame.
    pub const ARBITRATION: [&str; 10] = [
        ZOOM, SNAP, VOLUME, MOUSE, TEXT_MODE, COPY, PASTE, SCREENSHOT, CIRCULAR, SWIPE,
    ];

    /// Arbitration position; unknown ids sort last.
    pub fn rank(id: &str) -> usize {
        ARBITRATION.iter().position(|g| *g == id).unwrap_or(ARBITRATION.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoomDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwipeKind {
    NextTab,
    PrevTab,
    NextApp,
    PrevApp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseSignal {
    /// Absolute screen position.
    Move { x: i32, y: i32 },
    Scroll(i32),
    LeftClick,
    RightClick,
    DragStart,
    DragEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Volume(u8),
    Zoom { level: u32, direction: ZoomDirection },
    Snap,
    Undo,
    Redo,
    Copy,
    Paste,
    Screenshot,
    Swipe(SwipeKind),
    Joystick { direction: Direction, speed: u8 },
    Mouse(MouseSignal),
}

impl Signal {
    /// Registry id of the gesture that produced this signal.
    pub fn gesture_id(&self) -> &'static str {
        match self {
            Signal::Volume(_) => ids::VOLUME,
            Signal::Zoom { .. } => ids::ZOOM,
            Signal::Snap => ids::SNAP,
            Signal::Undo | Signal::Redo => ids::CIRCULAR,
            Signal::Copy => ids::COPY,
            Signal::Paste => ids::PASTE,
            Signal::Screenshot => ids::SCREENSHOT,
            Signal::Swipe(_) => ids::SWIPE,
            Signal::Joystick { .. } => ids::TEXT_MODE,
            Signal::Mouse(_) => ids::MOUSE,
        }
    }
}

/// Which hand role a detector listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    TwoHand,
    NonDominant,
    Dominant,
}

/// Everything a detector may look at for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    /// All normalized hands this frame, in detector order.
    pub hands: &'a [HandRecord],
    /// The hand assigned to the detector's role, if present.
    pub hand: Option<&'a HandRecord>,
    pub motion: Motion,
    /// Seconds, monotonic.
    pub now: f64,
    pub frame: FrameSize,
    /// Registry sensitivity for the detector's gesture, in [0,1].
    pub sensitivity: f32,
}

pub trait Detector: Send {
    /// Registry id whose sensitivity drives this detector.
    fn id(&self) -> &'static str;

    /// Every gesture id this detector can emit; it runs while any is enabled.
    fn gesture_ids(&self) -> &'static [&'static str];

    fn stage(&self) -> Stage;

    fn process(&mut self, ctx: &FrameContext<'_>) -> Option<Signal>;

    /// Drops per-gesture state. May return a closing signal (a drag release).
    fn reset(&mut self) -> Option<Signal>;

    /// True while the detector holds the frame exclusively.
    fn engaged(&self) -> bool {
        false
    }

    /// Current analog level (volume percent, zoom percent), if any.
    fn level(&self) -> Option<f32> {
        None
    }
}

/// `value = alpha * previous + (1 - alpha) * raw`; the first sample is taken as is.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    alpha: f32,
    value: Option<f32>,
}

impl Ema {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 0.99),
            value: None,
        }
    }

    pub fn update(&mut self, raw: f32) -> f32 {
        let v = match self.value {
            Some(prev) => self.alpha * prev + (1.0 - self.alpha) * raw,
            None => raw,
        };
        self.value = Some(v);
        v
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Trigger threshold for a sensitivity: higher sensitivity, lower threshold.
/// Sensitivity 0.5 leaves the base value unchanged.
pub fn scaled(base: f32, sensitivity: f32) -> f32 {
    base * (1.5 - sensitivity.clamp(0.0, 1.0))
}

/// Output gain for a sensitivity; the inverse of [`scaled`].
pub fn gain(sensitivity: f32) -> f32 {
    1.0 / (1.5 - sensitivity.clamp(0.0, 1.0))
}

/// All detectors in arbitration order.
pub fn build_detectors(th: &Thresholds, frame: FrameSize) -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(ZoomDetector::new(th.zoom.clone(), frame)),
        Box::new(SnapDetector::new(th.snap.clone())),
        Box::new(VolumeDetector::new(th.volume.clone(), frame)),
        Box::new(MouseDetector::new(th.mouse.clone(), frame)),
        Box::new(JoystickDetector::new(th.joystick.clone(), frame)),
        Box::new(ClipboardDetector::new(th.clipboard.clone())),
        Box::new(ScreenshotDetector::new(th.screenshot.clone())),
        Box::new(CircularDetector::new(th.circular.clone(), frame)),
        Box::new(SwipeDetector::new(th.swipe.clone())),
    ]
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub fn ctx<'a>(hands: &'a [HandRecord], now: f64) -> FrameContext<'a> {
        FrameContext {
            hands,
            hand: hands.first(),
            motion: Motion::default(),
            now,
            frame: FrameSize::default(),
            sensitivity: 0.7,
        }
    }
}
