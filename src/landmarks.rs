//! Landmark normalization: raw detector output → per-frame `HandRecord`s.
//!
//! The hand-pose detector reports 21 points per hand in image-relative
//! coordinates (x, y in [0,1], y growing downward) together with a
//! handedness label. Capture is mirrored for a natural "mirror" view, so the
//! reported label is swapped before any finger or velocity math runs.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::InputError;

pub const LANDMARK_COUNT: usize = 21;

pub const WRIST: usize = 0;
pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_PIP: usize = 6;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const RING_PIP: usize = 14;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_PIP: usize = 18;
pub const PINKY_TIP: usize = 20;

/// Wrist plus the four proximal knuckles.
pub const PALM_INDICES: [usize; 5] = [WRIST, INDEX_MCP, MIDDLE_MCP, RING_MCP, PINKY_MCP];

/// The capture path flips frames horizontally before detection.
pub const MIRRORED_CAPTURE: bool = true;

/// [thumb, index, middle, ring, pinky]; `true` = extended.
pub type FingerState = [bool; 5];

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Point3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Image-plane position in capture pixels.
    pub fn to_px(&self, frame: FrameSize) -> (f32, f32) {
        (self.x * frame.width, self.y * frame.height)
    }
}

/// Capture frame dimensions in pixels; pixel-valued thresholds are relative to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: f32,
    pub height: f32,
}

impl Default for FrameSize {
    fn default() -> Self {
        Self {
            width: 640.0,
            height: 480.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "Left",
            Self::Right => "Right",
        }
    }
}

/// One detected hand for one frame. Built fresh per frame, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct HandRecord {
    landmarks: [Point3; LANDMARK_COUNT],
    handedness: Handedness,
    fingers: FingerState,
}

impl HandRecord {
    pub fn new(landmarks: [Point3; LANDMARK_COUNT], handedness: Handedness) -> Self {
        let fingers = finger_state(&landmarks, handedness);
        Self {
            landmarks,
            handedness,
            fingers,
        }
    }

    pub fn handedness(&self) -> Handedness {
        self.handedness
    }

    pub fn point(&self, idx: usize) -> Point3 {
        self.landmarks[idx]
    }

    pub fn landmarks(&self) -> &[Point3; LANDMARK_COUNT] {
        &self.landmarks
    }

    pub fn fingers(&self) -> FingerState {
        self.fingers
    }

    pub fn extended_count(&self) -> usize {
        self.fingers.iter().filter(|up| **up).count()
    }

    pub fn is_pose(&self, pose: FingerState) -> bool {
        self.fingers == pose
    }

    /// Centroid of the given landmarks in capture pixels.
    pub fn centroid_px(&self, indices: &[usize], frame: FrameSize) -> (f32, f32) {
        let n = indices.len().max(1) as f32;
        let (sx, sy) = indices.iter().fold((0.0, 0.0), |(ax, ay), &i| {
            let p = self.landmarks[i];
            (ax + p.x, ay + p.y)
        });
        (sx / n * frame.width, sy / n * frame.height)
    }

    pub fn palm_center_px(&self, frame: FrameSize) -> (f32, f32) {
        self.centroid_px(&PALM_INDICES, frame)
    }
}

/// Thumb: tip beyond the IP joint on the hand's outer side (mirror view, so a
/// right thumb points toward lower x). Other fingers: tip above the PIP joint.
fn finger_state(lm: &[Point3; LANDMARK_COUNT], handedness: Handedness) -> FingerState {
    let thumb = match handedness {
        Handedness::Right => lm[THUMB_TIP].x < lm[THUMB_IP].x,
        Handedness::Left => lm[THUMB_TIP].x > lm[THUMB_IP].x,
    };
    let up = |tip: usize, pip: usize| lm[tip].y < lm[pip].y;
    [
        thumb,
        up(INDEX_TIP, INDEX_PIP),
        up(MIDDLE_TIP, MIDDLE_PIP),
        up(RING_TIP, RING_PIP),
        up(PINKY_TIP, PINKY_PIP),
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHand {
    #[serde(default)]
    pub handedness: Option<String>,
    pub landmarks: Vec<[f32; 3]>,
}

/// One line of the landmark stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFrame {
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
    #[serde(default)]
    pub hands: Vec<RawHand>,
}

impl RawFrame {
    pub fn parse(line: &str) -> Result<Self, InputError> {
        Ok(serde_json::from_str(line)?)
    }
}

fn to_points(raw: &[[f32; 3]]) -> Result<[Point3; LANDMARK_COUNT], InputError> {
    if raw.len() != LANDMARK_COUNT {
        return Err(InputError::LandmarkCount(raw.len()));
    }
    let mut out = [Point3::default(); LANDMARK_COUNT];
    for (dst, [x, y, z]) in out.iter_mut().zip(raw) {
        *dst = Point3::new(*x, *y, *z);
    }
    Ok(out)
}

/// Hands with a missing/unknown label, a malformed landmark list, or a side
/// already claimed earlier in the same frame are dropped, never guessed.
pub fn normalize_frame(frame: &RawFrame, mirrored: bool) -> Vec<HandRecord> {
    let mut out: Vec<HandRecord> = Vec::with_capacity(frame.hands.len());
    for (idx, raw) in frame.hands.iter().enumerate() {
        let Some(reported) = raw.handedness.as_deref().and_then(Handedness::parse) else {
            debug!("hand {idx}: missing or ambiguous handedness, dropped");
            continue;
        };
        let handedness = if mirrored {
            reported.opposite()
        } else {
            reported
        };
        if out.iter().any(|h| h.handedness == handedness) {
            debug!("hand {idx}: duplicate {} label, dropped", handedness.as_str());
            continue;
        }
        match to_points(&raw.landmarks) {
            Ok(points) => out.push(HandRecord::new(points, handedness)),
            Err(e) => warn!("hand {idx}: {e}"),
        }
    }
    out
}
