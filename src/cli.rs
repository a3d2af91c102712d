use anyhow::{Result, anyhow};
use log::warn;
use pico_args::Arguments;
use serde_json::{Value, json};
use std::{env, fs, io::BufReader, process::Command};

use crate::actions::{ActionSink, DryRunSink, HostCommands, MouseButton, UinputSink};
use crate::config::{ConfigPaths, DaemonConfigState, Engine};
use crate::ipc;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            match topic {
                Some(t) => print_subcmd_help(&t),
                None => print_help(),
            }
            Ok(())
        }

        Some("start") => {
            let exe = env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("handctl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request(json!({"op": "shutdown"})),
        Some("status") => request(json!({"op": "status"})),
        Some("reload") => request(json!({"op": "reload"})),
        Some("list") => request(json!({"op": "list"})),
        Some("doctor") => request(json!({"op": "doctor"})),
        Some("gestures") => request(json!({"op": "gestures"})),
        Some("actions") => request(json!({"op": "actions"})),
        Some("activity") => request(json!({"op": "activity"})),
        Some("frame") => request(json!({"op": "frame"})),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl use <profile_name>"))?;
            request(json!({"op": "use", "profile": name}))
        }

        Some("engine") => {
            let state: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl engine <on|off>"))?;
            let running = match state.as_str() {
                "on" | "start" => true,
                "off" | "stop" => false,
                other => return Err(anyhow!("expected on or off, got '{other}'")),
            };
            request(json!({"op": "engine", "running": running}))
        }

        Some("set") => {
            let enabled: Option<bool> = pargs.opt_value_from_str("--enabled")?;
            let sensitivity: Option<f32> = pargs.opt_value_from_str("--sensitivity")?;
            let cooldown: Option<f32> = pargs.opt_value_from_str("--cooldown")?;
            let action: Option<String> = pargs.opt_value_from_str("--action")?;
            let id: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl set <gesture> [--enabled true|false] [--sensitivity 0..1] [--cooldown s] [--action id]"))?;
            let mut req = json!({"op": "update", "id": id});
            if let Some(v) = enabled {
                req["enabled"] = json!(v);
            }
            if let Some(v) = sensitivity {
                req["sensitivity"] = json!(v);
            }
            if let Some(v) = cooldown {
                req["cooldown"] = json!(v);
            }
            if let Some(v) = action {
                req["target_action"] = json!(v);
            }
            request(req)
        }

        Some("disable") => {
            let id: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl disable <gesture>"))?;
            request(json!({"op": "delete", "id": id}))
        }

        Some("bind") => {
            let action: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl bind <action> <CHORD>"))?;
            let chord: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl bind <action> <CHORD>"))?;
            request(json!({"op": "bind", "action": action, "keys": chord}))
        }

        Some("replay") => {
            let dry_run = pargs.contains("--dry-run");
            let path: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl replay <file.jsonl> [--dry-run]"))?;
            replay(&path, dry_run)
        }

        Some("emit") => {
            let what: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl emit <click|scroll|key|volume> ..."))?;
            let mut sink = UinputSink::new(local_commands())?;
            match what.as_str() {
                "click" => {
                    let btn: String = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: handctl emit click <left|right|middle>"))?;
                    sink.click(MouseButton::parse(&btn)?)?;
                    println!("ok: clicked {btn}");
                }
                "scroll" => {
                    let steps: i32 = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: handctl emit scroll <steps>"))?;
                    sink.scroll_vertical(steps)?;
                    println!("ok: scrolled vertical {steps}");
                }
                "key" => {
                    let chord: String = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: handctl emit key CTRL+EQUAL"))?;
                    sink.key_chord(&chord)?;
                    println!("ok: sent key chord {chord}");
                }
                "volume" => {
                    let percent: u8 = pargs
                        .free_from_str()
                        .map_err(|_| anyhow!("usage: handctl emit volume <0-100>"))?;
                    sink.set_volume(percent.min(100))?;
                    println!("ok: volume {}%", percent.min(100));
                }
                other => return Err(anyhow!("unknown emit kind: {other}")),
            }
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn request(req: Value) -> Result<()> {
    let r = ipc::client_request(req)?;
    print_response(&r);
    Ok(())
}

/// Host commands from the active profile, falling back to the built-in ones.
fn local_commands() -> HostCommands {
    match DaemonConfigState::load_or_install_default(ConfigPaths::user()) {
        Ok(cfg) => HostCommands::from_engine(&cfg.profile.engine),
        Err(e) => {
            warn!("{e}; using default host commands");
            HostCommands::from_engine(&Engine::default())
        }
    }
}

fn replay(path: &str, dry_run: bool) -> Result<()> {
    let cfg = DaemonConfigState::load_or_install_default(ConfigPaths::user())?;
    let registry = cfg.build_registry();
    let file = fs::File::open(path).map_err(|e| anyhow!("failed to open {path}: {e}"))?;
    let reader = BufReader::new(file);

    let summary = if dry_run {
        let mut sink = DryRunSink::default();
        let s = ipc::replay(reader, &cfg.profile, &registry, &mut sink)?;
        println!("dry-run: {} executor calls", sink.calls);
        s
    } else {
        let mut sink = UinputSink::new(HostCommands::from_engine(&cfg.profile.engine))?;
        ipc::replay(reader, &cfg.profile, &registry, &mut sink)?
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_help() {
    println!(
        r#"handctl - hand gesture control daemon

USAGE:
  handctl help [command]                  Show general or command-specific help
  handctl start                           Start the daemon
  handctl stop                            Stop the daemon
  handctl status                          Show daemon state, trigger count and collisions
  handctl engine <on|off>                 Resume or pause gesture processing
  handctl reload                          Reload active profile and settings
  handctl use <name>                      Switch active profile
  handctl list                            List profiles
  handctl doctor                          Diagnose permissions and the landmark source
  handctl gestures                        List gesture settings
  handctl set <gesture> [options]         Update a gesture setting
  handctl disable <gesture>               Disable a gesture
  handctl bind <action> <CHORD>           Bind an action id to a key chord
  handctl actions                         List builtin and custom actions
  handctl activity                        Show the most recent dispatched actions
  handctl frame                           Show the latest frame report
  handctl replay <file> [--dry-run]       Run a recorded landmark stream through the engine
  handctl emit click <left|right|middle>  Emit a mouse click
  handctl emit scroll <steps>             Emit vertical scroll (+/- steps)
  handctl emit key CTRL+EQUAL             Emit a key or chord
  handctl emit volume <0-100>             Set the system volume

FILES:
  Profiles: ~/.config/handctl/profiles
  Active profile pointer: ~/.config/handctl/active
  Gesture settings: ~/.config/handctl/settings.toml
  Landmark FIFO (default): ~/.local/run/handctl.landmarks
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: handctl start\nStarts the background daemon."),
        "stop" => println!("usage: handctl stop\nStops the running daemon."),
        "status" => println!(
            "usage: handctl status\nShows engine state, active profile, landmark source, trigger count and action collisions."
        ),
        "engine" => println!(
            "usage: handctl engine <on|off>\nPauses or resumes the frame loop; the landmark source keeps being drained."
        ),
        "reload" => println!(
            "usage: handctl reload\nReloads the current profile and settings; keeps last good on error."
        ),
        "use" => {
            println!("usage: handctl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: handctl list\nLists available profiles and the active one."),
        "doctor" => println!(
            "usage: handctl doctor\nChecks /dev/uinput, input group membership, config paths and the landmark source."
        ),
        "gestures" => println!("usage: handctl gestures\nLists every gesture with its settings."),
        "set" => println!(
            "usage: handctl set <gesture> [--enabled true|false] [--sensitivity 0..1] [--cooldown <seconds>] [--action <id>]"
        ),
        "disable" => println!(
            "usage: handctl disable <gesture>\nDisables a gesture; it stays listed and can be re-enabled with set."
        ),
        "bind" => println!(
            "usage: handctl bind <action> <CHORD>\nExample: handctl bind close_tab CTRL+W"
        ),
        "actions" => println!("usage: handctl actions\nLists builtin action ids and custom bindings."),
        "activity" => println!("usage: handctl activity\nShows the last 20 dispatched actions and the total count."),
        "frame" => println!("usage: handctl frame\nPrints the most recent frame report."),
        "replay" => println!(
            "usage: handctl replay <file.jsonl> [--dry-run]\nFeeds recorded frames through the engine using their timestamps; --dry-run logs actions instead of sending them."
        ),
        "emit" => println!(
            "usage:\n  handctl emit click <left|right|middle>\n  handctl emit scroll <steps>\n  handctl emit key CTRL+EQUAL\n  handctl emit volume <0-100>"
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
