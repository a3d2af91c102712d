//! Per-frame arbitration: decides which detectors see which hand, in a fixed
//! order, and collects their signals.
//!
//! 1. Two-hand zoom runs every frame while enabled. With two hands present it
//!    owns the frame and every single-hand detector is reset.
//! 2. Otherwise the first reported hand is the primary hand. A non-dominant
//!    primary feeds snap, then volume.
//! 3. A dominant primary walks the chain mouse → joystick → copy/paste →
//!    screenshot → circular → swipe. The first signal, or a detector that
//!    holds the frame (mouse mode, text mode, circular hold-off), ends it.

use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::config::{Profile, Registry};
use crate::gestures::{self, Detector, FrameContext, Signal, Stage};
use crate::landmarks::{FingerState, FrameSize, HandRecord, Handedness};
use crate::tracker::{Motion, MotionSample, MotionTracker};

#[derive(Debug, Clone, Serialize)]
pub struct HandSummary {
    pub handedness: Handedness,
    pub fingers: FingerState,
    pub palm: (f32, f32),
}

/// What the engine saw and decided for one frame.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameReport {
    pub seq: u64,
    pub timestamp: f64,
    pub hands: Vec<HandSummary>,
    pub signals: Vec<Signal>,
    /// Detectors currently holding the frame (mouse, text mode, zoom, ...).
    pub engaged: Vec<&'static str>,
    pub levels: BTreeMap<&'static str, f32>,
    /// Dominant-hand motion and its smoothed palm position.
    pub motion: Motion,
    pub palm_track: Option<MotionSample>,
    /// Set when the frame could not be processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn is_enabled(d: &dyn Detector, registry: &Registry) -> bool {
    d.gesture_ids().iter().any(|g| registry.is_enabled(g))
}

pub struct Arbiter {
    dominant: Handedness,
    frame: FrameSize,
    tracker: MotionTracker,
    detectors: Vec<Box<dyn Detector>>,
    seq: u64,
}

impl Arbiter {
    pub fn new(profile: &Profile) -> Self {
        let frame = profile.engine.frame_size();
        Self {
            dominant: profile.engine.dominant_hand,
            frame,
            tracker: MotionTracker::new(&profile.thresholds.motion, frame),
            detectors: gestures::build_detectors(&profile.thresholds, frame),
            seq: 0,
        }
    }

    /// Runs one frame. Signals come back in the order they were produced.
    pub fn process(&mut self, hands: &[HandRecord], now: f64, registry: &Registry) -> FrameReport {
        self.seq += 1;
        let mut signals = Vec::new();

        let dominant_hand = hands.iter().find(|h| h.handedness() == self.dominant);
        let motion = self.tracker.update(dominant_hand);

        if hands.is_empty() {
            self.reset_where(|_| true, &mut signals);
            return self.report(hands, now, signals, registry);
        }

        let base = FrameContext {
            hands,
            hand: None,
            motion,
            now,
            frame: self.frame,
            sensitivity: 0.5,
        };

        let mut zoom_enabled = false;
        for d in self.detectors.iter_mut().filter(|d| d.stage() == Stage::TwoHand) {
            if !is_enabled(d.as_ref(), registry) {
                signals.extend(d.reset());
                continue;
            }
            zoom_enabled = true;
            let ctx = FrameContext {
                sensitivity: registry.sensitivity(d.id()),
                ..base
            };
            signals.extend(d.process(&ctx));
        }
        if zoom_enabled && hands.len() >= 2 {
            self.tracker.clear();
            self.reset_where(|s| s != Stage::TwoHand, &mut signals);
            return self.report(hands, now, signals, registry);
        }

        let primary = &hands[0];
        let active_stage = if primary.handedness() == self.dominant {
            Stage::Dominant
        } else {
            Stage::NonDominant
        };
        self.reset_where(
            |s| s != Stage::TwoHand && s != active_stage,
            &mut signals,
        );

        for d in self.detectors.iter_mut().filter(|d| d.stage() == active_stage) {
            if !is_enabled(d.as_ref(), registry) {
                signals.extend(d.reset());
                continue;
            }
            let ctx = FrameContext {
                hand: Some(primary),
                sensitivity: registry.sensitivity(d.id()),
                ..base
            };
            let sig = d.process(&ctx);
            let held = d.engaged();
            if let Some(s) = sig {
                signals.push(s);
            }
            if sig.is_some() || held {
                if held && sig.is_none() {
                    debug!("{} holds the frame", d.id());
                }
                break;
            }
        }

        self.report(hands, now, signals, registry)
    }

    /// Drops all detector and motion state, e.g. after the engine is stopped.
    pub fn reset(&mut self) -> Vec<Signal> {
        let mut signals = Vec::new();
        self.tracker.clear();
        self.reset_where(|_| true, &mut signals);
        signals
    }

    pub fn motion(&self) -> Motion {
        self.tracker.motion()
    }

    fn reset_where(&mut self, pick: impl Fn(Stage) -> bool, out: &mut Vec<Signal>) {
        for d in self.detectors.iter_mut().filter(|d| pick(d.stage())) {
            out.extend(d.reset());
        }
    }

    fn report(
        &self,
        hands: &[HandRecord],
        now: f64,
        signals: Vec<Signal>,
        registry: &Registry,
    ) -> FrameReport {
        FrameReport {
            seq: self.seq,
            timestamp: now,
            hands: hands
                .iter()
                .map(|h| HandSummary {
                    handedness: h.handedness(),
                    fingers: h.fingers(),
                    palm: h.palm_center_px(self.frame),
                })
                .collect(),
            signals,
            engaged: self
                .detectors
                .iter()
                .filter(|d| d.engaged() && is_enabled(d.as_ref(), registry))
                .map(|d| d.id())
                .collect(),
            levels: self
                .detectors
                .iter()
                .filter_map(|d| d.level().map(|l| (d.id(), l)))
                .collect(),
            motion: self.motion(),
            palm_track: self.tracker.latest(),
            error: None,
        }
    }
}
