use anyhow::{Result, anyhow};
use log::{error, info, warn};
use std::{
    io::{BufRead, BufReader},
    os::unix::net::UnixListener,
    sync::{Arc, Mutex, mpsc},
};

use super::runtime::data_socket_path;
use super::server::{DaemonEvent, FrameUpdate};
use crate::config::Profile;
use crate::ingest::SampleGate;
use crate::tracker::{Observation, Tracker};

/// Data-socket loop: one sensor bridge at a time pushes JSON snapshot lines;
/// each connection gets a fresh gate and tracker, so a restarted bridge
/// recalibrates from scratch.
pub fn run_pipeline(profile: Arc<Mutex<Profile>>, tx_evt: mpsc::Sender<DaemonEvent>) -> Result<()> {
    let sock = data_socket_path();
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("pipeline: waiting for a sensor bridge on {}", sock.display());

    loop {
        let (stream, _) = listener.accept()?;
        let (shape, thresholds) = {
            let p = profile.lock().unwrap();
            (p.grid, p.thresholds.clone())
        };
        let mut gate = SampleGate::new(shape);
        let mut tracker = Tracker::new(shape, thresholds);
        info!("pipeline: sensor bridge connected, calibrating");

        let mut accepted: u64 = 0;
        for line in BufReader::new(stream).lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!("pipeline: read error: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let reading = match gate.admit(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("pipeline: rejected sample: {e} ({} so far)", gate.rejected());
                    continue;
                }
            };
            accepted += 1;
            match tracker.observe(reading) {
                Ok(obs) => publish(&tx_evt, obs)?,
                Err(e) => {
                    error!("pipeline: tracker fault: {e}; dropping session");
                    break;
                }
            }
        }
        info!(
            "pipeline: sensor bridge disconnected ({accepted} accepted, {} rejected, {} objects, phase {:?})",
            gate.rejected(),
            tracker.object_count(),
            tracker.phase()
        );
    }
}

fn publish(tx_evt: &mpsc::Sender<DaemonEvent>, obs: Observation) -> Result<()> {
    if let Some(event) = obs.event {
        tx_evt
            .send(DaemonEvent::Object(event))
            .map_err(|_| anyhow!("event channel closed"))?;
    }
    let frame = FrameUpdate {
        weight: obs.reading.weight(),
        peak: obs.reading.peak(),
        cells: obs.reading.to_rows(),
        objects: obs.objects,
    };
    tx_evt
        .send(DaemonEvent::Frame(frame))
        .map_err(|_| anyhow!("event channel closed"))?;
    Ok(())
}
