use anyhow::Result;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    io::BufRead,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use super::dispatch::{Dispatcher, SharedActivity};
use super::server::Shared;
use crate::actions::{ActionSink, HostCommands, UinputSink};
use crate::arbiter::{Arbiter, FrameReport};
use crate::config::{Profile, Registry};
use crate::input::LandmarkSource;
use crate::landmarks::{RawFrame, normalize_frame};

/// Single-slot mailbox holding the latest frame report. Readers never block
/// the worker for longer than a clone.
#[derive(Debug, Clone, Default)]
pub struct FrameSlot(Arc<Mutex<Option<FrameReport>>>);

impl FrameSlot {
    pub fn publish(&self, report: FrameReport) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(report);
        }
    }

    pub fn latest(&self) -> Option<FrameReport> {
        self.0.lock().ok().and_then(|slot| slot.clone())
    }
}

/// One stream line in, one report out: parse, normalize, arbitrate, dispatch.
pub struct Engine {
    mirrored: bool,
    arbiter: Arbiter,
    dispatcher: Dispatcher,
    started: Instant,
}

impl Engine {
    pub fn new(profile: &Profile, activity: SharedActivity) -> Self {
        Self {
            mirrored: profile.engine.mirrored,
            arbiter: Arbiter::new(profile),
            dispatcher: Dispatcher::new(profile.engine.screenshot_dir(), activity),
            started: Instant::now(),
        }
    }

    /// Blank lines yield nothing. A line that fails to parse yields a report
    /// carrying the error and leaves every detector untouched.
    pub fn step(
        &mut self,
        line: &str,
        registry: &Registry,
        sink: &mut dyn ActionSink,
    ) -> Option<FrameReport> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let raw = match RawFrame::parse(line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping landmark frame: {e}");
                return Some(FrameReport {
                    error: Some(e.to_string()),
                    ..FrameReport::default()
                });
            }
        };
        let now = match raw.timestamp_ms {
            Some(ms) => ms as f64 / 1000.0,
            None => self.started.elapsed().as_secs_f64(),
        };
        let hands = normalize_frame(&raw, self.mirrored);
        let report = self.arbiter.process(&hands, now, registry);
        for signal in &report.signals {
            self.dispatcher.handle(registry, sink, signal, now);
        }
        Some(report)
    }

    /// Drops detector state, releasing anything still held (a mouse drag).
    pub fn release(&mut self, registry: &Registry, sink: &mut dyn ActionSink) {
        let now = self.started.elapsed().as_secs_f64();
        for signal in self.arbiter.reset() {
            self.dispatcher.handle(registry, sink, &signal, now);
        }
    }

    /// Swaps in a new profile. Detectors are released and rebuilt; the
    /// cooldown clock carries over.
    pub fn reconfigure(&mut self, profile: &Profile, registry: &Registry, sink: &mut dyn ActionSink) {
        self.release(registry, sink);
        self.mirrored = profile.engine.mirrored;
        self.arbiter = Arbiter::new(profile);
        self.dispatcher.set_screenshot_dir(profile.engine.screenshot_dir());
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ReplaySummary {
    pub frames: usize,
    pub skipped: usize,
    pub signals: usize,
    pub by_gesture: BTreeMap<&'static str, usize>,
}

/// Runs a recorded stream through a fresh engine, synchronously.
pub fn replay(
    reader: impl BufRead,
    profile: &Profile,
    registry: &Registry,
    sink: &mut dyn ActionSink,
) -> Result<ReplaySummary> {
    let mut engine = Engine::new(profile, SharedActivity::default());
    let mut summary = ReplaySummary::default();
    for line in reader.lines() {
        let Some(report) = engine.step(&line?, registry, sink) else {
            continue;
        };
        if report.error.is_some() {
            summary.skipped += 1;
            continue;
        }
        summary.frames += 1;
        summary.signals += report.signals.len();
        for s in &report.signals {
            *summary.by_gesture.entry(s.gesture_id()).or_default() += 1;
        }
    }
    engine.release(registry, sink);
    Ok(summary)
}

/// Background frame worker. It keeps draining the source while the engine
/// is switched off so the producer never stalls; those frames are dropped.
pub struct Worker {
    alive: Arc<AtomicBool>,
    pending: Arc<Mutex<Option<Profile>>>,
    _thread: thread::JoinHandle<()>,
}

impl Worker {
    pub fn start(profile: Profile, source: LandmarkSource, shared: Shared) -> Result<Self> {
        let alive = Arc::new(AtomicBool::new(true));
        let pending = Arc::new(Mutex::new(None));
        let ctx = WorkerCtx {
            alive: alive.clone(),
            pending: pending.clone(),
            source,
            shared,
        };
        let handle = thread::Builder::new()
            .name("handctl-frames".into())
            .spawn(move || ctx.run(profile))?;
        Ok(Self {
            alive,
            pending,
            _thread: handle,
        })
    }

    /// Applied before the next frame. The landmark source is only read at start.
    pub fn update_profile(&self, profile: Profile) {
        if let Ok(mut p) = self.pending.lock() {
            *p = Some(profile);
        }
    }

    /// A worker blocked on a silent FIFO notices this on the next line.
    pub fn stop(&self) {
        self.alive.store(false, Ordering::Relaxed);
    }
}

struct WorkerCtx {
    alive: Arc<AtomicBool>,
    pending: Arc<Mutex<Option<Profile>>>,
    source: LandmarkSource,
    shared: Shared,
}

impl WorkerCtx {
    fn run(self, profile: Profile) {
        let commands = HostCommands::from_engine(&profile.engine);
        let mut sink = UinputSink::new(commands.clone()).unwrap_or_else(|e| {
            error!("uinput unavailable ({e}); actions will be dropped");
            UinputSink::noop(commands)
        });
        let mut engine = Engine::new(&profile, self.shared.activity.clone());
        let mut paused = false;

        while self.alive.load(Ordering::Relaxed) {
            let reader = match self.source.open() {
                Ok(r) => r,
                Err(e) => {
                    warn!("{e}; retrying");
                    thread::sleep(Duration::from_secs(1));
                    continue;
                }
            };
            info!("reading landmarks from {}", self.source);

            for line in reader.lines() {
                if !self.alive.load(Ordering::Relaxed) {
                    break;
                }
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        warn!("landmark source: {e}");
                        break;
                    }
                };
                let registry = self.shared.registry_snapshot();

                if let Some(p) = self.pending.lock().ok().and_then(|mut p| p.take()) {
                    engine.reconfigure(&p, &registry, &mut sink);
                    sink.set_commands(HostCommands::from_engine(&p.engine));
                    info!("frame worker picked up new profile");
                }

                if !self.shared.running.load(Ordering::Relaxed) {
                    if !paused {
                        engine.release(&registry, &mut sink);
                        paused = true;
                        info!("engine paused");
                    }
                    continue;
                }
                if paused {
                    paused = false;
                    info!("engine resumed");
                }

                if let Some(report) = engine.step(&line, &registry, &mut sink) {
                    if !report.signals.is_empty() {
                        debug!("frame {}: {:?}", report.seq, report.signals);
                    }
                    self.shared.slot.publish(report);
                }
            }

            if !self.source.reopenable() {
                info!("landmark stream {} ended", self.source);
                break;
            }
            thread::sleep(Duration::from_millis(200));
        }

        let registry = self.shared.registry_snapshot();
        engine.release(&registry, &mut sink);
        info!("frame worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::recording::RecordingSink;
    use crate::config::GestureUpdate;
    use crate::landmarks::{HandRecord, Handedness, synth};

    /// A stream line for `hands`, labelled the way a mirrored camera reports them.
    fn line(ts_ms: u64, hands: &[HandRecord]) -> String {
        let hands: Vec<_> = hands
            .iter()
            .map(|h| {
                let pts: Vec<[f32; 3]> = h.landmarks().iter().map(|p| [p.x, p.y, p.z]).collect();
                serde_json::json!({
                    "handedness": h.handedness().opposite().as_str(),
                    "landmarks": pts,
                })
            })
            .collect();
        serde_json::json!({"timestamp_ms": ts_ms, "hands": hands}).to_string()
    }

    fn sweep() -> Vec<String> {
        (0..12)
            .map(|i| {
                let h = synth::hand(Handedness::Right, [true; 5], (0.2 + i as f32 * 0.08, 0.5));
                line(1_000 + i * 30, &[h])
            })
            .collect()
    }

    #[test]
    fn test_sweep_switches_app_once_per_cooldown() {
        let profile = Profile::default();
        let registry = Registry::with_defaults();
        let activity = SharedActivity::default();
        let mut engine = Engine::new(&profile, activity.clone());
        let mut sink = RecordingSink::default();
        for l in sweep() {
            engine.step(&l, &registry, &mut sink);
        }
        assert_eq!(sink.chords(), vec!["ALT+TAB"]);
        assert_eq!(activity.lock().unwrap().total(), 1);
    }

    #[test]
    fn test_profile_swap_keeps_cooldowns() {
        let profile = Profile::default();
        let registry = Registry::with_defaults();
        let mut engine = Engine::new(&profile, SharedActivity::default());
        let mut sink = RecordingSink::default();
        for l in sweep() {
            engine.step(&l, &registry, &mut sink);
        }
        engine.reconfigure(&profile, &registry, &mut sink);
        for l in sweep() {
            engine.step(&l, &registry, &mut sink);
        }
        assert_eq!(sink.chords(), vec!["ALT+TAB"]);
    }

    #[test]
    fn test_shared_action_fires_only_for_owner() {
        let profile = Profile::default();
        let mut registry = Registry::with_defaults();
        registry
            .update(
                "circular",
                &GestureUpdate {
                    target_action: Some("switch_tabs".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(registry.owner_of("switch_tabs"), Some("circular"));

        let activity = SharedActivity::default();
        let mut engine = Engine::new(&profile, activity.clone());
        let mut sink = RecordingSink::default();
        let mut swiped = 0;
        for l in sweep() {
            let report = engine.step(&l, &registry, &mut sink).unwrap();
            swiped += report.signals.len();
        }
        // swipe was detected but circular owns its action
        assert!(swiped >= 1);
        assert!(sink.calls.is_empty());
        assert_eq!(activity.lock().unwrap().total(), 0);
    }

    #[test]
    fn test_bad_line_is_reported_and_stream_continues() {
        let profile = Profile::default();
        let registry = Registry::with_defaults();
        let mut engine = Engine::new(&profile, SharedActivity::default());
        let mut sink = RecordingSink::default();

        assert!(engine.step("   ", &registry, &mut sink).is_none());
        let bad = engine.step("{not json", &registry, &mut sink).unwrap();
        assert!(bad.error.is_some());
        assert!(bad.signals.is_empty());

        let h = synth::hand(Handedness::Right, [true; 5], (0.5, 0.5));
        let ok = engine.step(&line(0, &[h]), &registry, &mut sink).unwrap();
        assert!(ok.error.is_none());
        assert_eq!(ok.hands.len(), 1);
        assert_eq!(ok.hands[0].handedness, Handedness::Right);
    }

    #[test]
    fn test_replay_counts_frames_and_signals() {
        let mut text = sweep().join("\n");
        text.push_str("\n\ngarbage\n");
        let mut sink = RecordingSink::default();
        let summary = replay(
            text.as_bytes(),
            &Profile::default(),
            &Registry::with_defaults(),
            &mut sink,
        )
        .unwrap();
        assert_eq!(summary.frames, 12);
        assert_eq!(summary.skipped, 1);
        assert!(summary.signals >= 1);
        assert_eq!(summary.by_gesture.get("swipe"), Some(&summary.signals));
    }

    #[test]
    fn test_frame_slot_keeps_latest() {
        let slot = FrameSlot::default();
        assert!(slot.latest().is_none());
        for seq in 1..=3 {
            slot.publish(FrameReport {
                seq,
                ..FrameReport::default()
            });
        }
        assert_eq!(slot.latest().map(|r| r.seq), Some(3));
    }
}
