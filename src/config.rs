use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::actions;
use crate::error::ConfigError;
use crate::gestures::ids;
use crate::landmarks::{FrameSize, Handedness, MIRRORED_CAPTURE};

// ---------------------------------------------------------------------------
// Profile: engine settings + detector tunables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Engine {
    pub dominant_hand: Handedness,
    /// Frames are flipped before detection, so reported labels get swapped.
    pub mirrored: bool,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Landmark stream: a path (file or FIFO), "-" for stdin, "" for the default FIFO.
    pub source: String,
    pub screenshot_dir: Option<PathBuf>,
    /// `{path}` is replaced with the target file.
    pub screenshot_cmd: String,
    /// `{percent}` is replaced with 0..=100.
    pub volume_cmd: String,
    /// When false, volume and screenshot commands are logged instead of run.
    pub allow_commands: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            dominant_hand: Handedness::Right,
            mirrored: MIRRORED_CAPTURE,
            frame_width: 640,
            frame_height: 480,
            source: String::new(),
            screenshot_dir: None,
            screenshot_cmd: "grim {path}".into(),
            volume_cmd: "pactl set-sink-volume @DEFAULT_SINK@ {percent}%".into(),
            allow_commands: true,
        }
    }
}

impl Engine {
    pub fn frame_size(&self) -> FrameSize {
        FrameSize {
            width: self.frame_width as f32,
            height: self.frame_height as f32,
        }
    }

    pub fn screenshot_dir(&self) -> PathBuf {
        self.screenshot_dir
            .clone()
            .unwrap_or_else(|| home_dir().join("Pictures").join("Screenshots"))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MotionTuning {
    /// Weight of history in the palm EMA.
    pub alpha: f32,
    /// Frames spanned by the deliberate-motion travel check.
    pub window: usize,
}

impl Default for MotionTuning {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            window: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VolumeTuning {
    /// Pinch span (px) mapped onto the full 0..100 range.
    pub min_dist_px: f32,
    pub max_dist_px: f32,
    pub smoothing: f32,
    pub rearm_s: f64,
    pub initial_level: u8,
}

impl Default for VolumeTuning {
    fn default() -> Self {
        Self {
            min_dist_px: 30.0,
            max_dist_px: 250.0,
            smoothing: 0.5,
            rearm_s: 0.5,
            initial_level: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ZoomTuning {
    pub min_zoom: f32,
    pub max_zoom: f32,
    pub dist_smoothing: f32,
    pub zoom_smoothing: f32,
    pub presence_window: usize,
    pub presence_quorum: usize,
    /// Minimum change of the reported level before a new step is emitted.
    pub report_step: f32,
}

impl Default for ZoomTuning {
    fn default() -> Self {
        Self {
            min_zoom: 50.0,
            max_zoom: 300.0,
            dist_smoothing: 0.65,
            zoom_smoothing: 0.8,
            presence_window: 5,
            presence_quorum: 3,
            report_step: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SnapTuning {
    pub touch_dist: f32,
    pub snap_velocity: f32,
    pub reset_distance: f32,
    pub smoothing: f32,
    pub window: usize,
}

impl Default for SnapTuning {
    fn default() -> Self {
        Self {
            touch_dist: 0.05,
            snap_velocity: 0.08,
            reset_distance: 0.25,
            smoothing: 0.6,
            window: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircularTuning {
    pub history: usize,
    pub min_points: usize,
    pub min_size_px: f32,
    pub rotation_deg: f32,
    pub jitter_deg: f32,
    /// Frames after a trigger during which swipes stay suppressed.
    pub holdoff_frames: u32,
}

impl Default for CircularTuning {
    fn default() -> Self {
        Self {
            history: 25,
            min_points: 15,
            min_size_px: 50.0,
            rotation_deg: 200.0,
            jitter_deg: 2.0,
            holdoff_frames: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClipboardTuning {
    pub trigger_dist: f32,
    pub smoothing: f32,
    pub cooldown_s: f64,
}

impl Default for ClipboardTuning {
    fn default() -> Self {
        Self {
            trigger_dist: 0.04,
            smoothing: 0.6,
            cooldown_s: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScreenshotTuning {
    pub velocity_px: f32,
    pub cooldown_s: f64,
}

impl Default for ScreenshotTuning {
    fn default() -> Self {
        Self {
            velocity_px: 35.0,
            cooldown_s: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SwipeTuning {
    pub velocity_px: f32,
    pub min_travel_px: f32,
}

impl Default for SwipeTuning {
    fn default() -> Self {
        Self {
            velocity_px: 30.0,
            min_travel_px: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JoystickTuning {
    pub dead_zone_px: f32,
    pub max_radius_px: f32,
    /// Consecutive peace-sign frames that toggle text mode.
    pub hold_frames: u32,
}

impl Default for JoystickTuning {
    fn default() -> Self {
        Self {
            dead_zone_px: 30.0,
            max_radius_px: 120.0,
            hold_frames: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MouseTuning {
    pub screen_width: u32,
    pub screen_height: u32,
    /// Padding of the capture frame excluded from the pointer mapping.
    pub safe_zone_px: f32,
    /// Cursor moves 1/smoothing of the remaining distance per frame.
    pub smoothing: f32,
    pub pinch_px: f32,
    pub right_pinch_px: f32,
    pub drag_hold_s: f64,
    pub scroll_deadband_px: f32,
    pub scroll_step_px: f32,
}

impl Default for MouseTuning {
    fn default() -> Self {
        Self {
            screen_width: 1920,
            screen_height: 1080,
            safe_zone_px: 60.0,
            smoothing: 7.0,
            pinch_px: 30.0,
            right_pinch_px: 50.0,
            drag_hold_s: 0.4,
            scroll_deadband_px: 10.0,
            scroll_step_px: 4.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub motion: MotionTuning,
    pub volume: VolumeTuning,
    pub zoom: ZoomTuning,
    pub snap: SnapTuning,
    pub circular: CircularTuning,
    pub clipboard: ClipboardTuning,
    pub screenshot: ScreenshotTuning,
    pub swipe: SwipeTuning,
    pub joystick: JoystickTuning,
    pub mouse: MouseTuning,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub thresholds: Thresholds,

    // Accept nested/dotted tables and flatten them into "a.b" -> "CHORD"
    #[serde(default, deserialize_with = "deserialize_bindings_flat")]
    pub actions: HashMap<String, String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            meta: Meta::default(),
            engine: Engine::default(),
            thresholds: Thresholds::default(),
            actions: HashMap::new(),
        }
    }
}

// --------- custom bindings deserializer (tolerant) ----------
fn deserialize_bindings_flat<'de, D>(
    de: D,
) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = toml::Value::deserialize(de)?;
    let table = match val {
        toml::Value::Table(t) => t,
        other => {
            return Err(serde::de::Error::custom(format!(
                "actions must be a table, got {:?}",
                other.type_str()
            )));
        }
    };

    let mut out = HashMap::new();
    flatten_table("", &table, &mut out).map_err(serde::de::Error::custom)?;
    Ok(out)
}

fn flatten_table(
    prefix: &str,
    table: &toml::value::Table,
    out: &mut HashMap<String, String>,
) -> std::result::Result<(), String> {
    for (k, v) in table {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        match v {
            toml::Value::String(s) => {
                out.insert(key, s.clone());
            }
            toml::Value::Table(sub) => {
                flatten_table(&key, sub, out)?;
            }
            other => {
                return Err(format!(
                    "action '{}' value must be a key chord string, got {}",
                    key,
                    other.type_str()
                ));
            }
        }
    }
    Ok(())
}
// ------------------------------------------------------------

fn validate_profile(p: &Profile) -> Result<()> {
    let th = &p.thresholds;
    if p.engine.frame_width == 0 || p.engine.frame_height == 0 {
        return Err(anyhow!("engine frame size must be positive"));
    }
    if !(0.0..1.0).contains(&th.motion.alpha) {
        return Err(anyhow!("thresholds.motion.alpha must be in [0,1)"));
    }
    if th.zoom.min_zoom <= 0.0 || th.zoom.min_zoom >= th.zoom.max_zoom {
        return Err(anyhow!("thresholds.zoom needs 0 < min_zoom < max_zoom"));
    }
    if th.zoom.presence_quorum == 0 || th.zoom.presence_quorum > th.zoom.presence_window {
        return Err(anyhow!(
            "thresholds.zoom.presence_quorum must be in 1..=presence_window"
        ));
    }
    if th.volume.max_dist_px <= th.volume.min_dist_px {
        return Err(anyhow!("thresholds.volume needs min_dist_px < max_dist_px"));
    }
    if th.circular.min_points < 3 || th.circular.min_points > th.circular.history {
        return Err(anyhow!(
            "thresholds.circular.min_points must be in 3..=history"
        ));
    }
    if th.snap.window < 2 {
        return Err(anyhow!("thresholds.snap.window must be at least 2"));
    }
    if th.joystick.dead_zone_px >= th.joystick.max_radius_px {
        return Err(anyhow!(
            "thresholds.joystick needs dead_zone_px < max_radius_px"
        ));
    }
    for (name, secs) in [
        ("thresholds.volume.rearm_s", th.volume.rearm_s),
        ("thresholds.clipboard.cooldown_s", th.clipboard.cooldown_s),
        ("thresholds.screenshot.cooldown_s", th.screenshot.cooldown_s),
        ("thresholds.mouse.drag_hold_s", th.mouse.drag_hold_s),
    ] {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(anyhow!("{name} must be a positive duration"));
        }
    }
    if th.mouse.smoothing < 1.0 {
        return Err(anyhow!("thresholds.mouse.smoothing must be >= 1"));
    }
    if 2.0 * th.mouse.safe_zone_px >= p.engine.frame_width.min(p.engine.frame_height) as f32 {
        return Err(anyhow!("thresholds.mouse.safe_zone_px leaves no usable area"));
    }

    for (k, v) in &p.actions {
        if k.trim().is_empty() {
            return Err(anyhow!("empty action id"));
        }
        actions::parse_chord(v).map_err(|e| anyhow!("action '{k}': {e}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Gesture registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureSetting {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub sensitivity: f32,
    /// Seconds between two dispatches of this gesture.
    pub cooldown: f32,
    pub target_action: String,
    pub description: String,
}

impl GestureSetting {
    fn new(
        id: &str,
        name: &str,
        enabled: bool,
        cooldown: f32,
        target_action: &str,
        description: &str,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled,
            sensitivity: 0.7,
            cooldown,
            target_action: target_action.into(),
            description: description.into(),
        }
    }
}

/// Partial update; absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GestureUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_action: Option<String>,
}

impl GestureUpdate {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::InvalidSetting {
            field: field.into(),
            reason: reason.into(),
        };
        if let Some(s) = self.sensitivity {
            if !(0.0..=1.0).contains(&s) {
                return Err(invalid("sensitivity", "must be within [0, 1]"));
            }
        }
        if let Some(c) = self.cooldown {
            if !c.is_finite() || c < 0.0 {
                return Err(invalid("cooldown", "must be >= 0 seconds"));
            }
        }
        if let Some(t) = &self.target_action {
            if t.trim().is_empty() {
                return Err(invalid("target_action", "must not be empty"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomActionBinding {
    pub action: String,
    pub keys: Vec<String>,
}

impl CustomActionBinding {
    pub fn chord(&self) -> String {
        self.keys.join("+")
    }
}

/// Authoritative in-memory gesture settings plus custom action bindings.
/// Settings keep insertion order; that order decides collision ownership.
#[derive(Debug, Clone)]
pub struct Registry {
    settings: Vec<GestureSetting>,
    custom: BTreeMap<String, Vec<String>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Registry {
    pub fn with_defaults() -> Self {
        let settings = vec![
            GestureSetting::new(
                ids::VOLUME,
                "Volume Control",
                true,
                0.1,
                "volume_control",
                "Pinch thumb and index, then spread or close them to set the volume.",
            ),
            GestureSetting::new(
                ids::ZOOM,
                "Two-Hand Zoom",
                true,
                0.2,
                "zoom_control",
                "Move two open hands apart or together to zoom in or out.",
            ),
            GestureSetting::new(
                ids::SWIPE,
                "Swipe Tabs",
                true,
                0.8,
                "switch_tabs",
                "Swipe an open hand sideways: four fingers switch tabs, five switch apps.",
            ),
            GestureSetting::new(
                ids::SNAP,
                "Snap Action",
                true,
                1.5,
                "show_desktop",
                "Snap thumb and middle finger to show the desktop.",
            ),
            GestureSetting::new(
                ids::COPY,
                "Copy Gesture",
                true,
                1.0,
                "copy",
                "Hold thumb, index and middle up, then pinch them together to copy.",
            ),
            GestureSetting::new(
                ids::PASTE,
                "Paste Gesture",
                true,
                1.0,
                "paste",
                "Hold thumb, index and middle up, then spread them apart to paste.",
            ),
            GestureSetting::new(
                ids::SCREENSHOT,
                "Screenshot",
                true,
                2.0,
                "screenshot",
                "Four fingers up with the thumb tucked, move down to capture the screen.",
            ),
            GestureSetting::new(
                ids::TEXT_MODE,
                "Text Joystick",
                true,
                0.15,
                "arrow_keys",
                "Hold a peace sign to toggle text mode, then steer the selection with the index finger.",
            ),
            GestureSetting::new(
                ids::CIRCULAR,
                "Undo/Redo Menu",
                true,
                1.0,
                "undo_redo",
                "Draw a circle: clockwise redoes, counter-clockwise undoes.",
            ),
            GestureSetting::new(
                ids::MOUSE,
                "Virtual Mouse (Beta)",
                false,
                0.3,
                "mouse_click",
                "Drive the pointer with the index finger; pinch to click or drag.",
            ),
        ];
        Self {
            settings,
            custom: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &[GestureSetting] {
        &self.settings
    }

    pub fn get(&self, id: &str) -> Option<&GestureSetting> {
        self.settings.iter().find(|s| s.id == id)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.get(id).is_some_and(|s| s.enabled)
    }

    pub fn sensitivity(&self, id: &str) -> f32 {
        self.get(id).map_or(0.5, |s| s.sensitivity)
    }

    pub fn update(&mut self, id: &str, patch: &GestureUpdate) -> Result<GestureSetting, ConfigError> {
        patch.validate()?;
        let setting = self
            .settings
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ConfigError::UnknownGesture(id.into()))?;
        if let Some(v) = patch.enabled {
            setting.enabled = v;
        }
        if let Some(v) = patch.sensitivity {
            setting.sensitivity = v;
        }
        if let Some(v) = patch.cooldown {
            setting.cooldown = v;
        }
        if let Some(v) = &patch.target_action {
            setting.target_action = v.trim().to_string();
        }
        let updated = setting.clone();
        for (action, owners) in self.collisions() {
            if owners.iter().any(|o| o == id) {
                warn!(
                    "action '{action}' is claimed by {owners:?}; only '{}' will fire it",
                    self.owner_of(&action).unwrap_or_default()
                );
            }
        }
        Ok(updated)
    }

    /// Soft delete: the gesture stays listed but disabled.
    pub fn delete(&mut self, id: &str) -> Result<(), ConfigError> {
        self.update(
            id,
            &GestureUpdate {
                enabled: Some(false),
                ..GestureUpdate::default()
            },
        )
        .map(|_| ())
    }

    pub fn bind(&mut self, binding: CustomActionBinding) -> Result<(), ConfigError> {
        let action = binding.action.trim().to_string();
        if action.is_empty() {
            return Err(ConfigError::InvalidBinding {
                action,
                reason: "empty action id".into(),
            });
        }
        actions::parse_chord(&binding.chord()).map_err(|e| ConfigError::InvalidBinding {
            action: action.clone(),
            reason: e.to_string(),
        })?;
        self.custom.insert(action, binding.keys);
        Ok(())
    }

    pub fn custom_keys(&self, action: &str) -> Option<&[String]> {
        self.custom.get(action).map(Vec::as_slice)
    }

    pub fn custom_actions(&self) -> Vec<CustomActionBinding> {
        self.custom
            .iter()
            .map(|(action, keys)| CustomActionBinding {
                action: action.clone(),
                keys: keys.clone(),
            })
            .collect()
    }

    /// Enabled gesture targeting `action` that the arbiter tries first.
    pub fn owner_of(&self, action: &str) -> Option<&str> {
        self.settings
            .iter()
            .filter(|s| s.enabled && s.target_action == action)
            .min_by_key(|s| ids::rank(&s.id))
            .map(|s| s.id.as_str())
    }

    /// Actions claimed by more than one enabled gesture, owners in arbitration order.
    pub fn collisions(&self) -> Vec<(String, Vec<String>)> {
        let mut by_action: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for s in self.settings.iter().filter(|s| s.enabled) {
            by_action
                .entry(s.target_action.as_str())
                .or_default()
                .push(s.id.clone());
        }
        by_action
            .into_iter()
            .filter(|(_, owners)| owners.len() > 1)
            .map(|(a, mut owners)| {
                owners.sort_by_key(|id| ids::rank(id));
                (a, owners)
            })
            .map(|(a, owners)| (a.to_string(), owners))
            .collect()
    }

    pub fn to_file(&self) -> SettingsFile {
        let gestures = self
            .settings
            .iter()
            .map(|s| {
                (
                    s.id.clone(),
                    GestureUpdate {
                        enabled: Some(s.enabled),
                        sensitivity: Some(s.sensitivity),
                        cooldown: Some(s.cooldown),
                        target_action: Some(s.target_action.clone()),
                    },
                )
            })
            .collect();
        SettingsFile {
            gestures,
            custom_actions: self.custom.clone(),
        }
    }

    /// Unknown ids and invalid entries are skipped with a warning.
    pub fn apply_file(&mut self, file: &SettingsFile) {
        for (id, patch) in &file.gestures {
            if let Err(e) = self.update(id, patch) {
                warn!("settings: skipping '{id}': {e}");
            }
        }
        for (action, keys) in &file.custom_actions {
            let binding = CustomActionBinding {
                action: action.clone(),
                keys: keys.clone(),
            };
            if let Err(e) = self.bind(binding) {
                warn!("settings: {e}");
            }
        }
    }

    /// Profile `[actions]` entries, `"CTRL+SHIFT+S"` split on '+'.
    pub fn apply_profile_actions(&mut self, actions: &HashMap<String, String>) {
        for (action, chord) in actions {
            let binding = CustomActionBinding {
                action: action.clone(),
                keys: chord.split('+').map(|k| k.trim().to_string()).collect(),
            };
            if let Err(e) = self.bind(binding) {
                warn!("profile: {e}");
            }
        }
    }
}

/// Persisted overrides: `~/.config/handctl/settings.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub gestures: BTreeMap<String, GestureUpdate>,
    #[serde(default)]
    pub custom_actions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<SettingsFile> {
        if !self.path.exists() {
            return Ok(SettingsFile::default());
        }
        let txt = fs::read_to_string(&self.path)
            .map_err(|e| anyhow!("failed to read {}: {e}", self.path.display()))?;
        toml::from_str(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", self.path.display()))
    }

    pub fn save(&self, registry: &Registry) -> Result<()> {
        let txt = toml::to_string_pretty(&registry.to_file())?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, txt)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// On-disk layout and daemon config state
// ---------------------------------------------------------------------------

fn home_dir() -> PathBuf {
    UserDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub root: PathBuf,
}

impl ConfigPaths {
    pub fn user() -> Self {
        Self::at(home_dir().join(".config").join("handctl"))
    }

    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    pub fn active_ptr(&self) -> PathBuf {
        self.root.join("active")
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join("settings.toml")
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub paths: ConfigPaths,
    pub store: SettingsStore,
}

impl DaemonConfigState {
    pub fn load_or_install_default(paths: ConfigPaths) -> Result<Self> {
        let profdir = paths.profiles_dir();
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = paths.active_ptr();
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = Self::load_profile(&paths, &active_name)?;
        let store = SettingsStore::new(paths.settings());

        Ok(Self {
            active_name,
            profile,
            paths,
            store,
        })
    }

    pub fn reload(&mut self) -> Result<()> {
        self.profile = Self::load_profile(&self.paths, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.paths.profiles_dir().join(format!("{name}.toml"));
        if !p.exists() {
            return Err(ConfigError::ProfileNotFound(p.display().to_string()).into());
        }
        let profile = Self::load_profile(&self.paths, name)?;
        fs::write(self.paths.active_ptr(), name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(self.paths.profiles_dir()) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    /// Registry seeded from defaults, then profile actions, then persisted overrides.
    pub fn build_registry(&self) -> Registry {
        let mut registry = Registry::with_defaults();
        registry.apply_profile_actions(&self.profile.actions);
        match self.store.load() {
            Ok(file) => registry.apply_file(&file),
            Err(e) => warn!("{e}; using default gesture settings"),
        }
        registry
    }

    fn load_profile(paths: &ConfigPaths, name: &str) -> Result<Profile> {
        let path = paths.profiles_dir().join(format!("{name}.toml"));
        let txt = fs::read_to_string(&path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        let profile: Profile =
            toml::from_str(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))?;
        validate_profile(&profile)?;
        debug!(
            "loaded profile '{}' from {}",
            profile.meta.name.as_deref().unwrap_or(name),
            path.display()
        );
        Ok(profile)
    }

    pub fn doctor_report(&self, source: &Path) -> serde_json::Value {
        let uinput_ok = Path::new("/dev/uinput").exists();
        let in_input_group = check_in_input_group();
        serde_json::json!({
            "uinput_present": uinput_ok,
            "input_group_member": in_input_group,
            "config_dir": self.paths.root,
            "settings_file": self.store.path(),
            "active_profile": self.active_name,
            "landmark_source": source,
            "landmark_source_present": source == Path::new("-") || source.exists(),
            "hints": {
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input",
                "landmark_fifo": format!("mkfifo {}", source.display()),
            }
        })
    }
}

fn check_in_input_group() -> bool {
    if let Ok(s) = fs::read_to_string("/etc/group") {
        let user = whoami::username();
        for line in s.lines() {
            if line.starts_with("input:") {
                if line
                    .split(':')
                    .nth(3)
                    .unwrap_or("")
                    .split(',')
                    .any(|u| u == user)
                {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("handctl-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_default_profile_parses_and_validates() {
        let profile: Profile = toml::from_str(default_profile_text()).unwrap();
        validate_profile(&profile).unwrap();
        assert_eq!(profile.engine.dominant_hand, Handedness::Right);
        assert!(profile.engine.mirrored);
        assert_eq!(profile.actions.get("save_file").map(String::as_str), Some("CTRL+S"));
        assert_eq!(profile.thresholds.joystick.hold_frames, 15);
    }

    #[test]
    fn test_nested_action_tables_flatten() {
        let txt = r#"
            [actions.browser]
            reopen = "CTRL+SHIFT+T"
        "#;
        let profile: Profile = toml::from_str(txt).unwrap();
        assert_eq!(
            profile.actions.get("browser.reopen").map(String::as_str),
            Some("CTRL+SHIFT+T")
        );
    }

    #[test]
    fn test_profile_rejects_unknown_key_tokens() {
        let txt = r#"
            [actions]
            launch = "CTRL+HYPERSPACE"
        "#;
        let profile: Profile = toml::from_str(txt).unwrap();
        assert!(validate_profile(&profile).is_err());
    }

    #[test]
    fn test_profile_rejects_inverted_zoom_range() {
        let txt = r#"
            [thresholds.zoom]
            min_zoom = 300.0
            max_zoom = 50.0
        "#;
        let profile: Profile = toml::from_str(txt).unwrap();
        assert!(validate_profile(&profile).is_err());
    }

    #[test]
    fn test_registry_defaults_in_insertion_order() {
        let r = Registry::with_defaults();
        let order: Vec<&str> = r.settings().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order[0], ids::VOLUME);
        assert_eq!(order.last().copied(), Some(ids::MOUSE));
        assert!(!r.is_enabled(ids::MOUSE));
        assert!(r.collisions().is_empty());
    }

    #[test]
    fn test_update_unknown_gesture_is_not_found() {
        let mut r = Registry::with_defaults();
        let err = r.update("teleport", &GestureUpdate::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownGesture(id) if id == "teleport"));
    }

    #[test]
    fn test_update_validates_ranges() {
        let mut r = Registry::with_defaults();
        let bad = GestureUpdate {
            sensitivity: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(
            r.update(ids::SWIPE, &bad),
            Err(ConfigError::InvalidSetting { .. })
        ));
        let bad = GestureUpdate {
            cooldown: Some(-1.0),
            ..Default::default()
        };
        assert!(r.update(ids::SWIPE, &bad).is_err());
        // rejected patches leave the setting untouched
        assert_eq!(r.get(ids::SWIPE).unwrap().sensitivity, 0.7);
    }

    #[test]
    fn test_soft_delete_keeps_entry() {
        let mut r = Registry::with_defaults();
        r.delete(ids::SNAP).unwrap();
        assert!(r.get(ids::SNAP).is_some());
        assert!(!r.is_enabled(ids::SNAP));
    }

    #[test]
    fn test_collisions_and_owner_follow_arbitration_order() {
        let mut r = Registry::with_defaults();
        r.update(
            ids::SNAP,
            &GestureUpdate {
                target_action: Some("copy".into()),
                ..Default::default()
            },
        )
        .unwrap();
        // snap runs before copy in a frame
        assert_eq!(r.owner_of("copy"), Some(ids::SNAP));
        let collisions = r.collisions();
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].0, "copy");
        assert_eq!(collisions[0].1, vec![ids::SNAP.to_string(), ids::COPY.to_string()]);

        r.delete(ids::SNAP).unwrap();
        assert!(r.collisions().is_empty());
        assert_eq!(r.owner_of("copy"), Some(ids::COPY));

        // swipe is listed before circular but arbitrated after it
        r.update(
            ids::SWIPE,
            &GestureUpdate {
                target_action: Some("undo_redo".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(r.owner_of("undo_redo"), Some(ids::CIRCULAR));
        assert_eq!(
            r.collisions()[0].1,
            vec![ids::CIRCULAR.to_string(), ids::SWIPE.to_string()]
        );
    }

    #[test]
    fn test_bind_validates_keys() {
        let mut r = Registry::with_defaults();
        r.bind(CustomActionBinding {
            action: "reopen_tab".into(),
            keys: vec!["ctrl".into(), "shift".into(), "t".into()],
        })
        .unwrap();
        assert_eq!(r.custom_keys("reopen_tab").map(|k| k.len()), Some(3));
        let err = r
            .bind(CustomActionBinding {
                action: "nope".into(),
                keys: vec!["ctrl".into(), "warp".into()],
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBinding { .. }));
        assert!(r.custom_keys("nope").is_none());
    }

    #[test]
    fn test_settings_store_persists_overrides() {
        let dir = scratch_dir("store");
        let store = SettingsStore::new(dir.join("settings.toml"));
        assert_eq!(store.load().unwrap(), SettingsFile::default());

        let mut r = Registry::with_defaults();
        r.update(
            ids::SWIPE,
            &GestureUpdate {
                cooldown: Some(2.5),
                enabled: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        r.bind(CustomActionBinding {
            action: "lock".into(),
            keys: vec!["super".into(), "l".into()],
        })
        .unwrap();
        store.save(&r).unwrap();

        let mut fresh = Registry::with_defaults();
        fresh.apply_file(&store.load().unwrap());
        let swipe = fresh.get(ids::SWIPE).unwrap();
        assert_eq!(swipe.cooldown, 2.5);
        assert!(!swipe.enabled);
        assert_eq!(fresh.custom_keys("lock"), Some(&["super".to_string(), "l".to_string()][..]));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_install_default_and_switch_profiles() {
        let dir = scratch_dir("profiles");
        let mut state = DaemonConfigState::load_or_install_default(ConfigPaths::at(dir.clone())).unwrap();
        assert_eq!(state.active_name, "default");
        assert_eq!(state.list_profiles(), vec!["default".to_string()]);

        fs::write(
            state.paths.profiles_dir().join("lefty.toml"),
            "[engine]\ndominant_hand = \"Left\"\n",
        )
        .unwrap();
        state.set_active("lefty").unwrap();
        assert_eq!(state.profile.engine.dominant_hand, Handedness::Left);
        assert_eq!(fs::read_to_string(state.paths.active_ptr()).unwrap(), "lefty");

        assert!(state.set_active("missing").is_err());
        assert_eq!(state.active_name, "lefty");

        let registry = state.build_registry();
        assert!(registry.get(ids::VOLUME).is_some());
        let _ = fs::remove_dir_all(&dir);
    }
}
