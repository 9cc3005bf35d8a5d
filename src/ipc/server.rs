use anyhow::Result;
use log::{error, info};
use serde::Serialize;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    sync::{Arc, Mutex, mpsc},
    thread,
    time::Duration,
};

use super::pipeline::run_pipeline;
use super::runtime::{data_socket_path, socket_path};
use crate::config::{DaemonConfigState, Profile};
use crate::object::ObjectSnapshot;
use crate::tracker::ObjectEvent;

/// Per-reading display update, pushed to `watch --frames` subscribers so a
/// grid view can refresh continuously between lifecycle events.
#[derive(Debug, Clone, Serialize)]
pub struct FrameUpdate {
    pub weight: f64,
    pub peak: f64,
    pub cells: Vec<Vec<f64>>,
    pub objects: Vec<ObjectSnapshot>,
}

pub enum DaemonEvent {
    Object(ObjectEvent),
    Frame(FrameUpdate),
}

enum IpcMsg {
    Reload,
    UseProfile(String),
    Subscribe { stream: UnixStream, frames: bool },
    Shutdown,
}

struct Subscriber {
    stream: UnixStream,
    frames: bool,
}

pub fn run_daemon() -> Result<()> {
    // socket
    let sock = socket_path();
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    // state
    let mut state = DaemonState::new()?;
    info!("daemon: active profile '{}'", state.cfg.active_name);

    // channels
    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();
    let (tx_evt, rx_evt) = mpsc::channel::<DaemonEvent>();

    // sensor thread
    let mut sensor_thread = SensorThread::start(state.cfg.profile.clone(), tx_evt.clone())?;

    // signals feed the normal shutdown path
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let tx_sig = tx_req.clone();
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("caught signal {sig}, shutting down");
            let _ = tx_sig.send(IpcMsg::Shutdown);
        }
    });

    let mut subscribers: Vec<Subscriber> = Vec::new();

    // accept loop
    listener.set_nonblocking(true)?;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                let tx = tx_req.clone();
                let st_snapshot = state.clone_shallow();
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, st_snapshot, tx) {
                        error!("ipc client error: {e}");
                    }
                });
            }
            Err(_) => {}
        }

        while let Ok(evt) = rx_evt.try_recv() {
            if let DaemonEvent::Object(e) = &evt {
                info!("[event] {}", serde_json::to_string(e).unwrap_or_default());
            }
            broadcast(&mut subscribers, &evt);
        }

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload => {
                    if let Err(e) = state.cfg.reload() {
                        error!("reload failed: {e}");
                    } else {
                        let new_prof = state.cfg.profile.clone();
                        sensor_thread.update_profile(new_prof);
                        info!("profile reloaded (applies to the next sensor session)");
                    }
                }
                IpcMsg::UseProfile(name) => {
                    if let Err(e) = state.cfg.set_active(&name) {
                        error!("use profile failed: {e}");
                    } else {
                        let new_prof = state.cfg.profile.clone();
                        sensor_thread.update_profile(new_prof);
                        info!("switched active profile to {}", state.cfg.active_name);
                    }
                }
                IpcMsg::Subscribe { stream, frames } => {
                    info!("watch client attached (frames: {frames})");
                    subscribers.push(Subscriber { stream, frames });
                }
                IpcMsg::Shutdown => {
                    let _ = std::fs::remove_file(&sock);
                    let _ = std::fs::remove_file(data_socket_path());
                    return Ok(());
                }
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}

fn broadcast(subscribers: &mut Vec<Subscriber>, evt: &DaemonEvent) {
    let (line, frame_only) = match evt {
        DaemonEvent::Object(e) => match serde_json::to_string(e) {
            Ok(s) => (s, false),
            Err(_) => return,
        },
        DaemonEvent::Frame(f) => match serde_json::to_string(&serde_json::json!({ "frame": f })) {
            Ok(s) => (s, true),
            Err(_) => return,
        },
    };
    subscribers.retain_mut(|sub| {
        if frame_only && !sub.frames {
            return true;
        }
        writeln!(sub.stream, "{line}").is_ok()
    });
}

fn handle_client(
    mut stream: UnixStream,
    st: DaemonState,
    tx_req: mpsc::Sender<IpcMsg>,
) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

    let resp = match op {
        "status" => serde_json::json!({"ok": true, "data": {
            "enabled": st.enabled,
            "active_profile": st.cfg.active_name,
            "socket": socket_path(),
            "data_socket": data_socket_path(),
            "grid": {
                "height": st.cfg.profile.grid.height,
                "width": st.cfg.profile.grid.width,
            },
        }}),
        "reload" => {
            let _ = tx_req.send(IpcMsg::Reload);
            serde_json::json!({"ok": true, "data": {"active_profile": st.cfg.active_name}})
        }
        "use" => {
            let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
            let _ = tx_req.send(IpcMsg::UseProfile(name.to_string()));
            serde_json::json!({"ok": true, "data": {"active_profile": name}})
        }
        "list" => {
            let list = st.cfg.list_profiles();
            serde_json::json!({"ok": true, "data": {"profiles": list, "active": st.cfg.active_name}})
        }
        "doctor" => {
            let report = st.cfg.doctor_report();
            serde_json::json!({"ok": true, "data": report})
        }
        "watch" => {
            let frames = req.get("frames").and_then(|v| v.as_bool()).unwrap_or(false);
            write!(
                stream,
                "{}\n",
                serde_json::json!({"ok": true, "data": "watching"})
            )?;
            // hand the connection to the main loop; events stream until the
            // client hangs up
            let _ = tx_req.send(IpcMsg::Subscribe { stream, frames });
            return Ok(());
        }
        "shutdown" => {
            let _ = tx_req.send(IpcMsg::Shutdown);
            serde_json::json!({"ok": true, "data": "shutting down"})
        }
        _ => serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
    };

    write!(stream, "{}\n", resp)?;
    Ok(())
}

struct DaemonState {
    pub enabled: bool,
    pub cfg: DaemonConfigState,
}

impl DaemonState {
    fn new() -> Result<Self> {
        let cfg = DaemonConfigState::load_or_install_default()?;
        Ok(Self { enabled: true, cfg })
    }
    fn clone_shallow(&self) -> Self {
        Self {
            enabled: self.enabled,
            cfg: self.cfg.clone(),
        }
    }
}

struct SensorThread {
    profile: Arc<Mutex<Profile>>,
    _thread: thread::JoinHandle<()>,
}

impl SensorThread {
    fn start(profile: Profile, tx_evt: mpsc::Sender<DaemonEvent>) -> Result<Self> {
        let profile_arc = Arc::new(Mutex::new(profile));
        let prof_clone = profile_arc.clone();
        let handle = thread::spawn(move || {
            if let Err(e) = run_pipeline(prof_clone, tx_evt) {
                error!("sensor pipeline failed: {e}");
            }
        });
        Ok(Self {
            profile: profile_arc,
            _thread: handle,
        })
    }
    fn update_profile(&mut self, new_profile: Profile) {
        if let Ok(mut p) = self.profile.lock() {
            *p = new_profile;
        }
    }
}

// client helpers
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let sock = socket_path();
    if !sock.exists() {
        return Err(anyhow::anyhow!(
            "loadctl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}

/// Like `client_request`, but keeps the connection open and forwards every
/// line the daemon pushes (the `watch` op).
pub fn client_stream(req: serde_json::Value, mut on_line: impl FnMut(&str)) -> Result<()> {
    let sock = socket_path();
    if !sock.exists() {
        return Err(anyhow::anyhow!(
            "loadctl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        on_line(&line?);
    }
    Ok(())
}
