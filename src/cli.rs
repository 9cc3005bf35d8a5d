use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{
    env,
    fs::File,
    io::{self, BufRead, BufReader},
    process::Command,
};

use crate::config::DaemonConfigState;
use crate::ingest::SampleGate;
use crate::ipc;
use crate::tracker::Tracker;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    // Flags-based help (-h/--help)
    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("loadctl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => {
            let r = ipc::client_request(serde_json::json!({"op":"shutdown"}))?;
            print_response(&r);
            Ok(())
        }

        Some("status") => {
            let r = ipc::client_request(serde_json::json!({"op":"status"}))?;
            print_response(&r);
            Ok(())
        }

        Some("reload") => {
            let r = ipc::client_request(serde_json::json!({"op":"reload"}))?;
            print_response(&r);
            Ok(())
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: loadctl use <profile_name>"))?;
            let r = ipc::client_request(serde_json::json!({"op":"use","profile":name}))?;
            print_response(&r);
            Ok(())
        }

        Some("list") => {
            let r = ipc::client_request(serde_json::json!({"op":"list"}))?;
            print_response(&r);
            Ok(())
        }

        Some("doctor") => {
            let r = ipc::client_request(serde_json::json!({"op":"doctor"}))?;
            print_response(&r);
            Ok(())
        }

        Some("watch") => {
            let frames = pargs.contains("--frames");
            ipc::client_stream(
                serde_json::json!({"op":"watch","frames":frames}),
                |line| println!("{line}"),
            )
        }

        Some("feed") => {
            let path: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: loadctl feed <file|->"))?;
            feed(&path)
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

/// Offline replay: run snapshot lines from a file (or stdin) through the gate
/// and tracker, print lifecycle events as JSON lines.
fn feed(path: &str) -> Result<()> {
    let cfg = DaemonConfigState::load_or_install_default()?;
    let profile = cfg.profile;
    let mut gate = SampleGate::new(profile.grid);
    let mut tracker = Tracker::new(profile.grid, profile.thresholds.clone());

    let reader: Box<dyn BufRead> = if path == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(path)?))
    };

    let mut accepted: u64 = 0;
    let mut events: u64 = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reading = match gate.admit(&line) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("rejected: {e}");
                continue;
            }
        };
        accepted += 1;
        let obs = tracker.observe(reading)?;
        if let Some(event) = obs.event {
            events += 1;
            println!("{}", serde_json::to_string(&event)?);
        }
    }
    eprintln!(
        "{accepted} accepted, {} rejected, {events} events, {} objects still tracked",
        gate.rejected(),
        tracker.object_count()
    );
    Ok(())
}

fn print_help() {
    println!(
        r#"loadctl — load-cell surface daemon

USAGE:
  loadctl help [command]        Show general or command-specific help
  loadctl start                 Start the daemon
  loadctl stop                  Stop the daemon
  loadctl status                Show daemon state
  loadctl reload                Reload active profile
  loadctl use <name>            Switch active profile
  loadctl list                  List profiles
  loadctl doctor                Diagnose sockets/config
  loadctl watch [--frames]      Stream object events (and frames) as JSON lines
  loadctl feed <file|->         Replay snapshot lines offline, print events

TIPS:
  - Sensor bridges push one JSON snapshot per line to the data socket
  - Profiles: ~/.config/loadctl/profiles
  - Active profile pointer: ~/.config/loadctl/active
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: loadctl start\nStarts the background daemon."),
        "stop" => println!("usage: loadctl stop\nStops the running daemon."),
        "status" => println!(
            "usage: loadctl status\nShows enabled flag, active profile, grid shape, sockets."
        ),
        "reload" => println!(
            "usage: loadctl reload\nReloads the current profile; applies to the next sensor session."
        ),
        "use" => {
            println!("usage: loadctl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => {
            println!("usage: loadctl list\nLists available profiles; marks active with '*'.")
        }
        "doctor" => println!(
            "usage: loadctl doctor\nChecks config and socket state, prints bridge hints."
        ),
        "watch" => println!(
            "usage: loadctl watch [--frames]\nStreams new_obj/del_obj events; --frames adds per-reading grid updates."
        ),
        "feed" => println!(
            "usage: loadctl feed <file|->\nRuns snapshot lines through the tracker offline and prints events."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
