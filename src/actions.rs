use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::config::Engine;
use crate::gestures::{Direction, MouseSignal, Signal, SwipeKind, ZoomDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "middle" => Ok(Self::Middle),
            other => Err(anyhow!("unknown mouse button: {other}")),
        }
    }
}

/// The host side of every gesture: keys, pointer, audio level and screen capture.
/// Calls are synchronous and best-effort; callers log failures and move on.
pub trait ActionSink: Send {
    /// A chord like "CTRL+EQUAL" or a single "TAB".
    fn key_chord(&mut self, chord: &str) -> Result<()>;
    fn click(&mut self, button: MouseButton) -> Result<()>;
    fn mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<()>;
    /// Absolute screen position.
    fn move_cursor(&mut self, x: i32, y: i32) -> Result<()>;
    fn scroll_vertical(&mut self, steps: i32) -> Result<()>;
    fn set_volume(&mut self, percent: u8) -> Result<()>;
    fn save_screenshot(&mut self, path: &Path) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Key tokens
// ---------------------------------------------------------------------------

fn canonical_key(tok: &str) -> Option<String> {
    let up = tok.trim().to_ascii_uppercase();
    let name = match up.as_str() {
        "CTRL" | "CONTROL" => "CTRL",
        "ALT" | "OPTION" => "ALT",
        "SHIFT" => "SHIFT",
        "SUPER" | "META" | "WIN" | "CMD" | "COMMAND" => "SUPER",
        "TAB" => "TAB",
        "MINUS" | "-" => "MINUS",
        "EQUAL" | "=" | "PLUS" => "EQUAL",
        "ENTER" | "RETURN" => "ENTER",
        "ESC" | "ESCAPE" => "ESC",
        "SPACE" => "SPACE",
        "BACKSPACE" => "BACKSPACE",
        "DELETE" | "DEL" => "DELETE",
        "INSERT" => "INSERT",
        "HOME" => "HOME",
        "END" => "END",
        "PAGEUP" | "PGUP" => "PAGEUP",
        "PAGEDOWN" | "PGDN" => "PAGEDOWN",
        "UP" => "UP",
        "DOWN" => "DOWN",
        "LEFT" => "LEFT",
        "RIGHT" => "RIGHT",
        s if s.len() == 1 && s.chars().all(|c| c.is_ascii_alphanumeric()) => s,
        s if s.starts_with('F')
            && s[1..].parse::<u8>().is_ok_and(|n| (1..=12).contains(&n)) =>
        {
            s
        }
        _ => return None,
    };
    Some(name.to_string())
}

/// Splits and validates a chord, returning canonical token names.
pub fn parse_chord(chord: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    for part in chord.split('+') {
        if part.trim().is_empty() {
            return Err(anyhow!("empty key in chord '{chord}'"));
        }
        let key = canonical_key(part).ok_or_else(|| anyhow!("unsupported key token: {}", part.trim()))?;
        keys.push(key);
    }
    Ok(keys)
}

// ---------------------------------------------------------------------------
// uinput-backed sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HostCommands {
    pub volume_cmd: String,
    pub screenshot_cmd: String,
    pub allow: bool,
}

impl HostCommands {
    pub fn from_engine(engine: &Engine) -> Self {
        Self {
            volume_cmd: engine.volume_cmd.clone(),
            screenshot_cmd: engine.screenshot_cmd.clone(),
            allow: engine.allow_commands,
        }
    }

    /// Starts the command and returns at once. Only a failed spawn is an
    /// error; the exit status is logged by a reaper thread.
    fn run(&self, template: &str, placeholder: &str, value: &str) -> Result<()> {
        let cmd = template.replace(placeholder, value);
        if !self.allow {
            info!("commands disabled; skipping `{cmd}`");
            return Ok(());
        }
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| anyhow!("failed to run `{cmd}`: {e}"))?;
        debug!("spawned `{cmd}` (pid {})", child.id());
        let reaper = thread::Builder::new()
            .name("handctl-cmd".into())
            .spawn(move || match child.wait() {
                Ok(status) if !status.success() => warn!("`{cmd}` exited with {status}"),
                Ok(_) => {}
                Err(e) => warn!("`{cmd}`: {e}"),
            });
        if let Err(e) = reaper {
            warn!("cannot reap host command: {e}");
        }
        Ok(())
    }
}

pub struct UinputSink {
    commands: HostCommands,
    cursor: Option<(i32, i32)>,
    #[allow(dead_code)]
    linux: Option<Box<LinuxUinput>>,
}

impl UinputSink {
    pub fn new(commands: HostCommands) -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let dev = LinuxUinput::create()?;
            return Ok(Self {
                commands,
                cursor: None,
                linux: Some(Box::new(dev)),
            });
        }
        #[allow(unreachable_code)]
        {
            warn!("uinput not available; running in NO-OP mode");
            Ok(Self::noop(commands))
        }
    }

    pub fn noop(commands: HostCommands) -> Self {
        Self {
            commands,
            cursor: None,
            linux: None,
        }
    }

    /// Picks up new volume/screenshot commands after a profile reload.
    pub fn set_commands(&mut self, commands: HostCommands) {
        self.commands = commands;
    }
}

impl ActionSink for UinputSink {
    fn key_chord(&mut self, chord: &str) -> Result<()> {
        let tokens = parse_chord(chord)?;
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            let mut keys = Vec::with_capacity(tokens.len());
            for t in &tokens {
                keys.push(map_key(t)?);
            }
            // press in order
            for k in &keys {
                dev.key_send(*k, 1)?;
            }
            dev.sync()?;
            // release in reverse
            for k in keys.iter().rev() {
                dev.key_send(*k, 0)?;
            }
            dev.sync()?;
        }
        #[cfg(not(target_os = "linux"))]
        let _ = tokens;
        Ok(())
    }

    fn click(&mut self, button: MouseButton) -> Result<()> {
        self.mouse_button(button, true)?;
        self.mouse_button(button, false)
    }

    fn mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.button(button, pressed)?;
        }
        #[cfg(not(target_os = "linux"))]
        let _ = (button, pressed);
        Ok(())
    }

    fn move_cursor(&mut self, x: i32, y: i32) -> Result<()> {
        // The virtual device is relative-only: pin to the top-left corner once,
        // then track the absolute position ourselves.
        let (cx, cy) = match self.cursor {
            Some(c) => c,
            None => {
                #[cfg(target_os = "linux")]
                if let Some(dev) = self.linux.as_mut() {
                    dev.move_relative(-100_000, -100_000)?;
                }
                (0, 0)
            }
        };
        let (dx, dy) = (x - cx, y - cy);
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            if dx != 0 || dy != 0 {
                dev.move_relative(dx, dy)?;
            }
        }
        #[cfg(not(target_os = "linux"))]
        let _ = (dx, dy);
        self.cursor = Some((x, y));
        Ok(())
    }

    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.scroll_vertical(steps)?;
        }
        #[cfg(not(target_os = "linux"))]
        let _ = steps;
        Ok(())
    }

    fn set_volume(&mut self, percent: u8) -> Result<()> {
        let percent = percent.min(100).to_string();
        self.commands.run(&self.commands.volume_cmd, "{percent}", &percent)
    }

    fn save_screenshot(&mut self, path: &Path) -> Result<()> {
        let target = path.display().to_string();
        self.commands.run(&self.commands.screenshot_cmd, "{path}", &target)
    }
}

/// Logs every call instead of touching the host. Used by `replay --dry-run`.
#[derive(Debug, Default)]
pub struct DryRunSink {
    pub calls: usize,
}

impl DryRunSink {
    fn note(&mut self, what: String) -> Result<()> {
        self.calls += 1;
        info!("dry-run: {what}");
        Ok(())
    }
}

impl ActionSink for DryRunSink {
    fn key_chord(&mut self, chord: &str) -> Result<()> {
        parse_chord(chord)?;
        self.note(format!("key {chord}"))
    }
    fn click(&mut self, button: MouseButton) -> Result<()> {
        self.note(format!("click {button:?}"))
    }
    fn mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<()> {
        self.note(format!("button {button:?} pressed={pressed}"))
    }
    fn move_cursor(&mut self, x: i32, y: i32) -> Result<()> {
        self.calls += 1;
        debug!("dry-run: move {x},{y}");
        Ok(())
    }
    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        self.note(format!("scroll {steps}"))
    }
    fn set_volume(&mut self, percent: u8) -> Result<()> {
        self.note(format!("volume {percent}%"))
    }
    fn save_screenshot(&mut self, path: &Path) -> Result<()> {
        self.note(format!("screenshot {}", path.display()))
    }
}

#[cfg(target_os = "linux")]
fn map_key(tok: &str) -> Result<uinput::event::keyboard::Key> {
    use uinput::event::keyboard::Key as K;
    let k = match tok {
        "CTRL" => K::LeftControl,
        "ALT" => K::LeftAlt,
        "SHIFT" => K::LeftShift,
        "SUPER" => K::LeftMeta,
        "TAB" => K::Tab,
        "MINUS" => K::Minus,
        "EQUAL" => K::Equal,
        "ENTER" => K::Enter,
        "ESC" => K::Esc,
        "SPACE" => K::Space,
        "BACKSPACE" => K::BackSpace,
        "DELETE" => K::Delete,
        "INSERT" => K::Insert,
        "HOME" => K::Home,
        "END" => K::End,
        "PAGEUP" => K::PageUp,
        "PAGEDOWN" => K::PageDown,
        "UP" => K::Up,
        "DOWN" => K::Down,
        "LEFT" => K::Left,
        "RIGHT" => K::Right,
        "A" => K::A,
        "B" => K::B,
        "C" => K::C,
        "D" => K::D,
        "E" => K::E,
        "F" => K::F,
        "G" => K::G,
        "H" => K::H,
        "I" => K::I,
        "J" => K::J,
        "K" => K::K,
        "L" => K::L,
        "M" => K::M,
        "N" => K::N,
        "O" => K::O,
        "P" => K::P,
        "Q" => K::Q,
        "R" => K::R,
        "S" => K::S,
        "T" => K::T,
        "U" => K::U,
        "V" => K::V,
        "W" => K::W,
        "X" => K::X,
        "Y" => K::Y,
        "Z" => K::Z,
        "0" => K::_0,
        "1" => K::_1,
        "2" => K::_2,
        "3" => K::_3,
        "4" => K::_4,
        "5" => K::_5,
        "6" => K::_6,
        "7" => K::_7,
        "8" => K::_8,
        "9" => K::_9,
        "F1" => K::F1,
        "F2" => K::F2,
        "F3" => K::F3,
        "F4" => K::F4,
        "F5" => K::F5,
        "F6" => K::F6,
        "F7" => K::F7,
        "F8" => K::F8,
        "F9" => K::F9,
        "F10" => K::F10,
        "F11" => K::F11,
        "F12" => K::F12,
        other => return Err(anyhow!("unsupported key token: {other}")),
    };
    Ok(k)
}

#[cfg(target_os = "linux")]
struct LinuxUinput {
    dev: uinput::device::Device,
}

#[cfg(target_os = "linux")]
impl LinuxUinput {
    fn create() -> Result<Self> {
        use uinput::event::{Keyboard, controller::Mouse, relative};

        let dev = uinput::default()?
            .name("Handctl Virtual Input")?
            .event(relative::Position::X)?
            .event(relative::Position::Y)?
            .event(relative::Wheel::Vertical)?
            .event(Mouse::Left)?
            .event(Mouse::Right)?
            .event(Mouse::Middle)?
            .event(Keyboard::All)?
            .create()?;

        info!("uinput: created virtual device");
        Ok(Self { dev })
    }

    fn sync(&mut self) -> Result<()> {
        self.dev.synchronize()?;
        Ok(())
    }

    fn key_send(&mut self, key: uinput::event::keyboard::Key, val: i32) -> Result<()> {
        self.dev.send(key, val)?;
        Ok(())
    }

    fn button(&mut self, button: MouseButton, pressed: bool) -> Result<()> {
        use uinput::event::controller::Mouse;
        let b = match button {
            MouseButton::Left => Mouse::Left,
            MouseButton::Right => Mouse::Right,
            MouseButton::Middle => Mouse::Middle,
        };
        self.dev.send(b, i32::from(pressed))?;
        self.sync()
    }

    fn move_relative(&mut self, dx: i32, dy: i32) -> Result<()> {
        use uinput::event::relative::Position;
        self.dev.send(Position::X, dx)?;
        self.dev.send(Position::Y, dy)?;
        self.sync()
    }

    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        use uinput::event::relative::Wheel;
        self.dev.send(Wheel::Vertical, steps)?;
        self.sync()
    }
}

// ---------------------------------------------------------------------------
// Action table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Copy,
    Paste,
    SaveFile,
    ShowDesktop,
    VolumeControl,
    ZoomControl,
    ArrowKeys,
    Screenshot,
    UndoRedo,
    Undo,
    Redo,
    SwitchTabs,
    MouseClick,
}

pub const BUILTIN_ACTIONS: &[(&str, Builtin)] = &[
    ("copy", Builtin::Copy),
    ("paste", Builtin::Paste),
    ("save_file", Builtin::SaveFile),
    ("show_desktop", Builtin::ShowDesktop),
    ("volume_control", Builtin::VolumeControl),
    ("zoom_control", Builtin::ZoomControl),
    ("arrow_keys", Builtin::ArrowKeys),
    ("screenshot", Builtin::Screenshot),
    ("undo_redo", Builtin::UndoRedo),
    ("undo", Builtin::Undo),
    ("redo", Builtin::Redo),
    ("switch_tabs", Builtin::SwitchTabs),
    ("mouse_click", Builtin::MouseClick),
];

impl Builtin {
    pub fn lookup(action: &str) -> Option<Self> {
        BUILTIN_ACTIONS
            .iter()
            .find(|(id, _)| *id == action)
            .map(|(_, b)| *b)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAction {
    Custom(String),
    Builtin(Builtin),
}

/// Custom bindings shadow builtins of the same id.
pub fn resolve(action: &str, custom: Option<&[String]>) -> Option<ResolvedAction> {
    if let Some(keys) = custom {
        return Some(ResolvedAction::Custom(keys.join("+")));
    }
    Builtin::lookup(action).map(ResolvedAction::Builtin)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn screenshot_path(dir: &Path, unix: u64) -> PathBuf {
    dir.join(format!("GestureOS_{unix}.png"))
}

fn arrow(direction: Direction) -> &'static str {
    match direction {
        Direction::Left => "SHIFT+LEFT",
        Direction::Right => "SHIFT+RIGHT",
        Direction::Up => "SHIFT+UP",
        Direction::Down => "SHIFT+DOWN",
    }
}

/// Executes a resolved action, shaped by the signal that caused it.
/// Returns a short description for the activity log.
pub fn perform(
    sink: &mut dyn ActionSink,
    action: &ResolvedAction,
    signal: Option<&Signal>,
    screenshot_dir: &Path,
) -> Result<String> {
    let b = match action {
        ResolvedAction::Custom(chord) => {
            sink.key_chord(chord)?;
            return Ok(chord.clone());
        }
        ResolvedAction::Builtin(b) => *b,
    };

    let chord = |sink: &mut dyn ActionSink, c: &str| -> Result<String> {
        sink.key_chord(c)?;
        Ok(c.to_string())
    };

    match b {
        Builtin::Copy => chord(sink, "CTRL+C"),
        Builtin::Paste => chord(sink, "CTRL+V"),
        Builtin::SaveFile => chord(sink, "CTRL+S"),
        Builtin::ShowDesktop => chord(sink, "SUPER+D"),
        Builtin::Undo => chord(sink, "CTRL+Z"),
        Builtin::Redo => chord(sink, "CTRL+Y"),
        Builtin::UndoRedo => match signal {
            Some(Signal::Redo) => chord(sink, "CTRL+Y"),
            _ => chord(sink, "CTRL+Z"),
        },
        Builtin::VolumeControl => match signal {
            Some(Signal::Volume(level)) => {
                sink.set_volume(*level)?;
                Ok(format!("volume {level}%"))
            }
            _ => Err(anyhow!("volume_control needs a volume level")),
        },
        Builtin::ZoomControl => match signal {
            Some(Signal::Zoom {
                direction: ZoomDirection::Out,
                ..
            }) => chord(sink, "CTRL+MINUS"),
            _ => chord(sink, "CTRL+EQUAL"),
        },
        Builtin::ArrowKeys => {
            let (direction, speed) = match signal {
                Some(Signal::Joystick { direction, speed }) => (*direction, *speed),
                _ => (Direction::Right, 1),
            };
            let c = arrow(direction);
            for _ in 0..speed.max(1) {
                sink.key_chord(c)?;
            }
            Ok(format!("{c} x{}", speed.max(1)))
        }
        Builtin::Screenshot => {
            fs::create_dir_all(screenshot_dir)
                .map_err(|e| anyhow!("failed to create {}: {e}", screenshot_dir.display()))?;
            let path = screenshot_path(screenshot_dir, unix_now());
            sink.save_screenshot(&path)?;
            Ok(path.display().to_string())
        }
        Builtin::SwitchTabs => {
            let c = match signal {
                Some(Signal::Swipe(SwipeKind::PrevTab)) => "CTRL+SHIFT+TAB",
                Some(Signal::Swipe(SwipeKind::NextApp)) => "ALT+TAB",
                Some(Signal::Swipe(SwipeKind::PrevApp)) => "ALT+SHIFT+TAB",
                _ => "CTRL+TAB",
            };
            chord(sink, c)
        }
        Builtin::MouseClick => {
            let button = match signal {
                Some(Signal::Mouse(MouseSignal::RightClick)) => MouseButton::Right,
                _ => MouseButton::Left,
            };
            sink.click(button)?;
            Ok(format!("click {button:?}").to_lowercase())
        }
    }
}
