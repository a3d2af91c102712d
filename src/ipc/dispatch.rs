use log::{debug, info, warn};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::actions::{self, ActionSink, MouseButton};
use crate::config::Registry;
use crate::gestures::{MouseSignal, Signal};

pub const ACTIVITY_CAPACITY: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub id: u64,
    pub gesture_id: String,
    pub gesture: String,
    pub action: String,
    pub detail: String,
    pub timestamp_ms: u64,
}

/// Most recent dispatches, newest first, plus a running total.
#[derive(Debug, Default, Serialize)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    total: u64,
}

impl ActivityLog {
    pub fn record(&mut self, gesture_id: &str, gesture: &str, action: &str, detail: String) {
        self.total += 1;
        self.entries.push_front(ActivityEntry {
            id: self.total,
            gesture_id: gesture_id.to_string(),
            gesture: gesture.to_string(),
            action: action.to_string(),
            detail,
            timestamp_ms: unix_ms(),
        });
        self.entries.truncate(ACTIVITY_CAPACITY);
    }

    pub fn entries(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

pub type SharedActivity = Arc<Mutex<ActivityLog>>;

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Dispatched,
    Disabled,
    CoolingDown,
    Collision,
    Unresolved,
    UnknownGesture,
    Failed,
}

/// Turns gesture signals into executed actions. Owns the per-gesture
/// cooldown clock, which outlives profile reloads.
pub struct Dispatcher {
    screenshot_dir: PathBuf,
    activity: SharedActivity,
    last_fired: HashMap<String, f64>,
}

impl Dispatcher {
    pub fn new(screenshot_dir: PathBuf, activity: SharedActivity) -> Self {
        Self {
            screenshot_dir,
            activity,
            last_fired: HashMap::new(),
        }
    }

    pub fn set_screenshot_dir(&mut self, dir: PathBuf) {
        self.screenshot_dir = dir;
    }

    /// Routes one detector signal. Pointer motion, scroll and drag stream
    /// straight to the sink; everything else goes through `trigger`.
    pub fn handle(
        &mut self,
        registry: &Registry,
        sink: &mut dyn ActionSink,
        signal: &Signal,
        now: f64,
    ) -> Outcome {
        let streamed = match signal {
            Signal::Mouse(MouseSignal::Move { x, y }) => sink.move_cursor(*x, *y),
            Signal::Mouse(MouseSignal::Scroll(steps)) => sink.scroll_vertical(*steps),
            Signal::Mouse(MouseSignal::DragStart) => sink.mouse_button(MouseButton::Left, true),
            Signal::Mouse(MouseSignal::DragEnd) => sink.mouse_button(MouseButton::Left, false),
            _ => return self.trigger(registry, sink, signal.gesture_id(), Some(signal), now),
        };
        match streamed {
            Ok(()) => Outcome::Dispatched,
            Err(e) => {
                warn!("mouse: {e}");
                Outcome::Failed
            }
        }
    }

    /// Fires the action bound to `gesture_id` unless the gesture is disabled,
    /// still cooling down, or an earlier gesture in arbitration order owns the
    /// same action. A failed action still spends the cooldown.
    pub fn trigger(
        &mut self,
        registry: &Registry,
        sink: &mut dyn ActionSink,
        gesture_id: &str,
        signal: Option<&Signal>,
        now: f64,
    ) -> Outcome {
        let Some(setting) = registry.get(gesture_id) else {
            warn!("trigger for unknown gesture '{gesture_id}'");
            return Outcome::UnknownGesture;
        };
        if !setting.enabled {
            debug!("{gesture_id}: disabled");
            return Outcome::Disabled;
        }
        let action = setting.target_action.as_str();
        let Some(resolved) = actions::resolve(action, registry.custom_keys(action)) else {
            warn!("{gesture_id}: no builtin or custom binding for action '{action}'");
            return Outcome::Unresolved;
        };

        if let Some(owner) = registry.owner_of(action) {
            if owner != gesture_id {
                debug!("{gesture_id}: action '{action}' belongs to {owner}");
                return Outcome::Collision;
            }
        }

        if let Some(last) = self.last_fired.get(gesture_id) {
            if now - last <= f64::from(setting.cooldown) {
                debug!("{gesture_id}: cooling down");
                return Outcome::CoolingDown;
            }
        }
        self.last_fired.insert(gesture_id.to_string(), now);

        match actions::perform(sink, &resolved, signal, &self.screenshot_dir) {
            Ok(detail) => {
                info!("{} -> {action} ({detail})", setting.name);
                if let Ok(mut log) = self.activity.lock() {
                    log.record(gesture_id, &setting.name, action, detail);
                }
                Outcome::Dispatched
            }
            Err(e) => {
                warn!("{gesture_id}: action '{action}' failed: {e}");
                Outcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::recording::{Call, RecordingSink};
    use crate::config::{CustomActionBinding, GestureUpdate};
    use crate::gestures::{SwipeKind, ids};

    fn dispatcher() -> (Dispatcher, SharedActivity) {
        let activity = SharedActivity::default();
        (
            Dispatcher::new(std::env::temp_dir(), activity.clone()),
            activity,
        )
    }

    fn retarget(r: &mut Registry, id: &str, action: &str) {
        r.update(
            id,
            &GestureUpdate {
                target_action: Some(action.into()),
                ..Default::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn test_second_trigger_inside_cooldown_is_ignored() {
        let (mut d, activity) = dispatcher();
        let r = Registry::with_defaults();
        let mut sink = RecordingSink::default();

        assert_eq!(d.trigger(&r, &mut sink, ids::COPY, None, 10.0), Outcome::Dispatched);
        assert_eq!(d.trigger(&r, &mut sink, ids::COPY, None, 10.5), Outcome::CoolingDown);
        assert_eq!(sink.chords(), vec!["CTRL+C"]);

        let log = activity.lock().unwrap();
        assert_eq!(log.total(), 1);
        assert_eq!(log.entries().count(), 1);
        drop(log);

        assert_eq!(d.trigger(&r, &mut sink, ids::COPY, None, 11.1), Outcome::Dispatched);
    }

    #[test]
    fn test_earlier_gesture_owns_shared_action() {
        let (mut d, _) = dispatcher();
        let mut r = Registry::with_defaults();
        retarget(&mut r, ids::SNAP, "copy");
        let mut sink = RecordingSink::default();

        assert_eq!(d.trigger(&r, &mut sink, ids::SNAP, None, 5.0), Outcome::Dispatched);
        // copy has never fired, so only ownership stops it
        assert_eq!(d.trigger(&r, &mut sink, ids::COPY, None, 6.0), Outcome::Collision);
        assert_eq!(sink.chords(), vec!["CTRL+C"]);

        r.delete(ids::SNAP).unwrap();
        assert_eq!(d.trigger(&r, &mut sink, ids::COPY, None, 7.0), Outcome::Dispatched);
    }

    #[test]
    fn test_failure_is_swallowed_and_spends_cooldown() {
        let (mut d, activity) = dispatcher();
        let r = Registry::with_defaults();
        let mut sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        assert_eq!(d.trigger(&r, &mut sink, ids::PASTE, None, 1.0), Outcome::Failed);
        sink.fail = false;
        assert_eq!(d.trigger(&r, &mut sink, ids::PASTE, None, 1.5), Outcome::CoolingDown);
        assert_eq!(activity.lock().unwrap().total(), 0);
    }

    #[test]
    fn test_disabled_unknown_and_unbound() {
        let (mut d, _) = dispatcher();
        let mut r = Registry::with_defaults();
        let mut sink = RecordingSink::default();
        assert_eq!(d.trigger(&r, &mut sink, ids::MOUSE, None, 0.0), Outcome::Disabled);
        assert_eq!(d.trigger(&r, &mut sink, "wave", None, 0.0), Outcome::UnknownGesture);

        retarget(&mut r, ids::SNAP, "open_browser");
        assert_eq!(d.trigger(&r, &mut sink, ids::SNAP, None, 0.0), Outcome::Unresolved);
        r.bind(CustomActionBinding {
            action: "open_browser".into(),
            keys: vec!["SUPER".into(), "B".into()],
        })
        .unwrap();
        assert_eq!(d.trigger(&r, &mut sink, ids::SNAP, None, 0.0), Outcome::Dispatched);
        assert_eq!(sink.chords(), vec!["SUPER+B"]);
        assert!(sink.calls.len() == 1);
    }

    #[test]
    fn test_mouse_motion_streams_past_cooldown() {
        let (mut d, activity) = dispatcher();
        let mut r = Registry::with_defaults();
        r.update(
            ids::MOUSE,
            &GestureUpdate {
                enabled: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        let mut sink = RecordingSink::default();
        for (i, sig) in [
            MouseSignal::Move { x: 10, y: 20 },
            MouseSignal::Move { x: 11, y: 20 },
            MouseSignal::DragStart,
            MouseSignal::DragEnd,
            MouseSignal::Scroll(-2),
        ]
        .into_iter()
        .enumerate()
        {
                let out = d.handle(&r, &mut sink, &Signal::Mouse(sig), i as f64 * 0.01);
            assert_eq!(out, Outcome::Dispatched);
        }
        assert_eq!(
            sink.calls,
            vec![
                Call::Move(10, 20),
                Call::Move(11, 20),
                Call::Button(MouseButton::Left, true),
                Call::Button(MouseButton::Left, false),
                Call::Scroll(-2),
            ]
        );
        assert_eq!(activity.lock().unwrap().total(), 0);

        d.handle(&r, &mut sink, &Signal::Mouse(MouseSignal::RightClick), 1.0);
        assert_eq!(sink.calls.last(), Some(&Call::Click(MouseButton::Right)));
        assert_eq!(activity.lock().unwrap().total(), 1);
    }

    #[test]
    fn test_log_keeps_newest_twenty() {
        let (mut d, activity) = dispatcher();
        let r = Registry::with_defaults();
        let mut sink = RecordingSink::default();
        for i in 0..25 {
                let sig = Signal::Swipe(SwipeKind::NextTab);
            d.handle(&r, &mut sink, &sig, i as f64);
        }
        let log = activity.lock().unwrap();
        assert_eq!(log.total(), 25);
        let ids: Vec<u64> = log.entries().map(|e| e.id).collect();
        assert_eq!(ids.len(), ACTIVITY_CAPACITY);
        assert_eq!(ids[0], 25);
        assert_eq!(ids[19], 6);
    }
}
