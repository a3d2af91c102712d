use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{Value, json};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    collections::BTreeMap,
    fmt::Display,
    io::{self, BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use super::dispatch::SharedActivity;
use super::pipeline::{FrameSlot, Worker};
use super::runtime::{default_landmark_path, socket_path};
use crate::actions::BUILTIN_ACTIONS;
use crate::config::{
    ConfigPaths, CustomActionBinding, DaemonConfigState, GestureUpdate, Profile, Registry,
};
use crate::input::LandmarkSource;

const RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by the socket handlers, the frame worker and the main loop.
#[derive(Clone)]
pub struct Shared {
    pub cfg: Arc<Mutex<DaemonConfigState>>,
    pub registry: Arc<Mutex<Registry>>,
    pub activity: SharedActivity,
    pub slot: FrameSlot,
    /// Engine on/off; the worker checks it before every frame.
    pub running: Arc<AtomicBool>,
    pub source: LandmarkSource,
    pub socket: PathBuf,
}

impl Shared {
    pub fn new(cfg: DaemonConfigState, source: LandmarkSource, socket: PathBuf) -> Self {
        let registry = cfg.build_registry();
        Self {
            cfg: Arc::new(Mutex::new(cfg)),
            registry: Arc::new(Mutex::new(registry)),
            activity: SharedActivity::default(),
            slot: FrameSlot::default(),
            running: Arc::new(AtomicBool::new(true)),
            source,
            socket,
        }
    }

    pub fn registry_snapshot(&self) -> Registry {
        lock(&self.registry).clone()
    }

    /// Mutates the registry and writes the result to disk. A failed write
    /// keeps the in-memory change.
    fn edit_registry<T>(
        &self,
        f: impl FnOnce(&mut Registry) -> Result<T, crate::error::ConfigError>,
    ) -> Result<T> {
        let store = lock(&self.cfg).store.clone();
        let mut reg = lock(&self.registry);
        let out = f(&mut *reg)?;
        if let Err(e) = store.save(&reg) {
            warn!("failed to persist settings to {}: {e}", store.path().display());
        }
        Ok(out)
    }

    /// Runs a profile change; on success the registry is rebuilt and the new
    /// profile returned. On failure the last good configuration stays.
    fn change_profile(
        &self,
        f: impl FnOnce(&mut DaemonConfigState) -> Result<()>,
    ) -> Result<(String, Profile)> {
        let mut cfg = lock(&self.cfg);
        f(&mut *cfg)?;
        *lock(&self.registry) = cfg.build_registry();
        Ok((cfg.active_name.clone(), cfg.profile.clone()))
    }

    /// Re-reads the active profile and persisted settings. The profile comes
    /// back only when it differs from the one the worker already runs.
    fn reload(&self) -> Result<(String, Option<Profile>)> {
        let before = lock(&self.cfg).profile.clone();
        let (name, profile) = self.change_profile(|c| c.reload())?;
        Ok((name, (profile != before).then_some(profile)))
    }
}

pub enum IpcMsg {
    ProfileChanged(Profile),
    ConfigChanged,
    Shutdown,
}

pub fn run_daemon() -> Result<()> {
    let sock = socket_path()?;
    if sock.exists() {
        if UnixStream::connect(&sock).is_ok() {
            return Err(anyhow!("daemon already running at {}", sock.display()));
        }
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    let cfg = DaemonConfigState::load_or_install_default(ConfigPaths::user())?;
    info!("daemon: active profile '{}'", cfg.active_name);
    let source = LandmarkSource::parse(&cfg.profile.engine.source, default_landmark_path()?);
    let config_root = cfg.paths.root.clone();
    let profile = cfg.profile.clone();
    let shared = Shared::new(cfg, source.clone(), sock.clone());

    let (tx, rx) = mpsc::channel::<IpcMsg>();
    let _watcher = match watch_config(&config_root, tx.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("config hot reload disabled: {e}");
            None
        }
    };
    forward_signals(tx.clone())?;

    let worker = Worker::start(profile, source, shared.clone())?;

    listener.set_nonblocking(true)?;
    let mut reload_due: Option<Instant> = None;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                let shared = shared.clone();
                let tx = tx.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, &shared, &tx) {
                        error!("ipc client error: {e}");
                    }
                });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!("accept failed: {e}"),
        }

        while let Ok(msg) = rx.try_recv() {
            match msg {
                IpcMsg::ProfileChanged(p) => worker.update_profile(p),
                IpcMsg::ConfigChanged => reload_due = Some(Instant::now() + RELOAD_DEBOUNCE),
                IpcMsg::Shutdown => {
                    info!("daemon: shutting down");
                    worker.stop();
                    let _ = std::fs::remove_file(&sock);
                    return Ok(());
                }
            }
        }

        if reload_due.is_some_and(|t| Instant::now() >= t) {
            reload_due = None;
            match shared.reload() {
                Ok((name, Some(p))) => {
                    info!("config changed on disk; reloaded profile '{name}'");
                    worker.update_profile(p);
                }
                Ok((name, None)) => debug!("settings reloaded; profile '{name}' unchanged"),
                Err(e) => error!("reload failed, keeping last good config: {e}"),
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}

/// Atomic-write scratch files such as `settings.toml.tmp`.
fn is_scratch(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "tmp")
}

fn watch_config(root: &Path, tx: Sender<IpcMsg>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(ev) => {
                if matches!(
                    ev.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) && ev.paths.iter().any(|p| !is_scratch(p))
                {
                    let _ = tx.send(IpcMsg::ConfigChanged);
                }
            }
            Err(e) => warn!("config watcher: {e}"),
        }
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    info!("watching {} for changes", root.display());
    Ok(watcher)
}

fn forward_signals(tx: Sender<IpcMsg>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("handctl-signals".into())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("received signal {sig}");
                let _ = tx.send(IpcMsg::Shutdown);
            }
        })?;
    Ok(())
}

fn handle_client(mut stream: UnixStream, shared: &Shared, tx: &Sender<IpcMsg>) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let resp = match serde_json::from_str::<Value>(&line) {
        Ok(req) => handle_request(&req, shared, tx),
        Err(e) => err(format!("bad request: {e}")),
    };
    writeln!(stream, "{resp}")?;
    if resp["ok"] == true && resp["data"] == "shutting down" {
        let _ = tx.send(IpcMsg::Shutdown);
    }
    Ok(())
}

fn ok(data: impl Serialize) -> Value {
    json!({"ok": true, "data": data})
}

fn err(msg: impl Display) -> Value {
    json!({"ok": false, "error": msg.to_string()})
}

fn str_arg<'a>(req: &'a Value, key: &str) -> Result<&'a str> {
    req.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing '{key}'"))
}

/// One request, one response. Never panics on bad input.
pub fn handle_request(req: &Value, shared: &Shared, tx: &Sender<IpcMsg>) -> Value {
    let op = req.get("op").and_then(Value::as_str).unwrap_or("");
    match run_op(op, req, shared, tx) {
        Ok(data) => ok(data),
        Err(e) => err(e),
    }
}

fn run_op(op: &str, req: &Value, shared: &Shared, tx: &Sender<IpcMsg>) -> Result<Value> {
    let data = match op {
        "status" => {
            let registry = shared.registry_snapshot();
            let cfg = lock(&shared.cfg);
            let collisions: BTreeMap<String, Vec<String>> =
                registry.collisions().into_iter().collect();
            let frame = shared.slot.latest();
            json!({
                "running": shared.running.load(Ordering::Relaxed),
                "active_profile": cfg.active_name,
                "socket": shared.socket,
                "source": shared.source.to_string(),
                "enabled_gestures": registry.settings().iter().filter(|s| s.enabled).count(),
                "triggers": lock(&shared.activity).total(),
                "collisions": collisions,
                "engaged": frame.as_ref().map(|f| f.engaged.clone()).unwrap_or_default(),
            })
        }
        "engine" => {
            let on = req
                .get("running")
                .and_then(Value::as_bool)
                .ok_or_else(|| anyhow!("missing 'running'"))?;
            shared.running.store(on, Ordering::Relaxed);
            info!("engine {}", if on { "started" } else { "stopped" });
            json!({"running": on})
        }
        "gestures" => serde_json::to_value(shared.registry_snapshot().settings())?,
        "gesture" => {
            let id = str_arg(req, "id")?;
            let registry = shared.registry_snapshot();
            let setting = registry
                .get(id)
                .ok_or_else(|| crate::error::ConfigError::UnknownGesture(id.into()))?;
            serde_json::to_value(setting)?
        }
        "update" => {
            let id = str_arg(req, "id")?;
            let patch: GestureUpdate = serde_json::from_value(req.clone())
                .map_err(|e| anyhow!("bad update: {e}"))?;
            let updated = shared.edit_registry(|r| r.update(id, &patch))?;
            serde_json::to_value(updated)?
        }
        "delete" => {
            let id = str_arg(req, "id")?;
            shared.edit_registry(|r| r.delete(id))?;
            json!({"id": id, "enabled": false})
        }
        "bind" => {
            let action = str_arg(req, "action")?.to_string();
            let keys: Vec<String> = match req.get("keys") {
                Some(Value::String(s)) => s.split('+').map(|k| k.trim().to_string()).collect(),
                Some(v) => serde_json::from_value(v.clone())
                    .map_err(|e| anyhow!("bad 'keys': {e}"))?,
                None => return Err(anyhow!("missing 'keys'")),
            };
            let binding = CustomActionBinding { action, keys };
            shared.edit_registry(|r| r.bind(binding.clone()))?;
            serde_json::to_value(binding)?
        }
        "actions" => {
            let builtin: Vec<&str> = BUILTIN_ACTIONS.iter().map(|(id, _)| *id).collect();
            json!({
                "builtin": builtin,
                "custom": shared.registry_snapshot().custom_actions(),
            })
        }
        "activity" => {
            let log = lock(&shared.activity);
            json!({
                "total": log.total(),
                "entries": log.entries().collect::<Vec<_>>(),
            })
        }
        "frame" => serde_json::to_value(shared.slot.latest())?,
        "reload" => {
            let (name, profile) = shared.reload()?;
            let changed = profile.is_some();
            if let Some(p) = profile {
                let _ = tx.send(IpcMsg::ProfileChanged(p));
            }
            json!({"active_profile": name, "profile_changed": changed})
        }
        "use" => {
            let name = str_arg(req, "profile")?.to_string();
            let (name, profile) = shared.change_profile(|c| c.set_active(&name))?;
            let _ = tx.send(IpcMsg::ProfileChanged(profile));
            json!({"active_profile": name})
        }
        "list" => {
            let cfg = lock(&shared.cfg);
            json!({"profiles": cfg.list_profiles(), "active": cfg.active_name})
        }
        "doctor" => lock(&shared.cfg).doctor_report(shared.source.path()),
        "shutdown" => json!("shutting down"),
        other => return Err(anyhow!("unknown op: {other}")),
    };
    Ok(data)
}
