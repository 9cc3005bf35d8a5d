//! Object-tracking state machine: baseline calibration, steady-state
//! averaging, transient-test windowing, nearest-match deletion.

use log::{debug, info};
use serde::Serialize;

use crate::average::RollingAverage;
use crate::config::Thresholds;
use crate::object::{ObjectError, ObjectSnapshot, ObjectStats, TrackedObject};
use crate::reading::{GridReading, GridShape};

/// Lifecycle event emitted when a sustained change resolves.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ObjectEvent {
    #[serde(rename = "new_obj")]
    NewObject(ObjectStats),
    #[serde(rename = "del_obj")]
    DeleteObject(ObjectStats),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Calibrating,
    Steady,
    Testing,
}

/// What one `observe` call hands back: the reading as the tracker saw it
/// (baseline-normalized once calibrated), a snapshot of the tracked set, and
/// at most one lifecycle event.
#[derive(Debug)]
pub struct Observation {
    pub reading: GridReading,
    pub objects: Vec<ObjectSnapshot>,
    pub event: Option<ObjectEvent>,
}

/// Consumes one reading per call; sole owner of all tracking state.
///
/// Readings must arrive in order and fully validated (the ingestion gate does
/// that); nothing in here is expected to fail under valid input except the
/// zero-weight centroid case, which is surfaced rather than swallowed.
#[derive(Debug)]
pub struct Tracker {
    thresholds: Thresholds,
    calibration: Option<RollingAverage>,
    baseline: Option<GridReading>,
    steady: GridReading,
    cycles: u64,
    test: Option<RollingAverage>,
    objects: Vec<TrackedObject>,
    next_id: u64,
}

impl Tracker {
    pub fn new(shape: GridShape, thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            calibration: None,
            baseline: None,
            steady: GridReading::zeroed(shape),
            cycles: 0,
            test: None,
            objects: Vec::new(),
            next_id: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.baseline.is_none() {
            Phase::Calibrating
        } else if self.test.is_some() {
            Phase::Testing
        } else {
            Phase::Steady
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn observe(&mut self, raw: GridReading) -> Result<Observation, ObjectError> {
        let Some(baseline) = &self.baseline else {
            self.calibrate(&raw);
            return Ok(self.observation(raw, None));
        };
        let reading = raw.difference_from(baseline, true);

        let event = match self.test.take() {
            None => {
                let delta = self.steady.distance_to(&reading, false);
                if delta < self.thresholds.new_object {
                    // ordinary drift: fold into the steady state
                    self.cycles += 1;
                    self.steady = self.steady.averaged_with(&reading, self.cycles);
                } else {
                    debug!(
                        "transient started: delta {delta:.1} over {} cycles",
                        self.thresholds.test_cycles
                    );
                    self.test = Some(RollingAverage::new(
                        reading.clone(),
                        self.thresholds.test_cycles,
                    ));
                }
                None
            }
            Some(mut window) => match window.accept(&reading) {
                None => {
                    debug!(
                        "testing sample {} of {}",
                        window.samples(),
                        self.thresholds.test_cycles
                    );
                    self.test = Some(window);
                    None
                }
                Some(result) => self.settle(result)?,
            },
        };

        Ok(self.observation(reading, event))
    }

    fn calibrate(&mut self, raw: &GridReading) {
        match &mut self.calibration {
            None => {
                info!(
                    "calibrating baseline over {} cycles",
                    self.thresholds.calibration_cycles
                );
                self.calibration = Some(RollingAverage::new(
                    raw.clone(),
                    self.thresholds.calibration_cycles,
                ));
            }
            Some(window) => {
                if let Some(done) = window.accept(raw) {
                    info!("calibration complete: baseline weight {:.1}", done.weight());
                    self.baseline = Some(done);
                    self.calibration = None;
                }
            }
        }
    }

    /// A test window just completed: absorb it as the new steady state and
    /// decide whether the transient was an object appearing, one leaving, or
    /// noise.
    fn settle(&mut self, result: GridReading) -> Result<Option<ObjectEvent>, ObjectError> {
        let diff = result.difference_from(&self.steady, false);
        let magnitude = diff.weight();
        self.cycles = 1;
        self.steady = result;

        if magnitude > self.thresholds.new_object {
            let object = TrackedObject::new(self.next_id, diff);
            self.next_id += 1;
            let stats = object.stats()?;
            info!(
                "new object {}: weight {:.1} at ({:.2}, {:.2}), spread {:.2}",
                object.id(),
                stats.weight,
                stats.position.0,
                stats.position.1,
                stats.spread
            );
            self.objects.push(object);
            Ok(Some(ObjectEvent::NewObject(stats)))
        } else if magnitude < -self.thresholds.delete_object {
            self.remove_best_match(&diff)
        } else {
            debug!("transient absorbed without event: magnitude {magnitude:.1}");
            Ok(None)
        }
    }

    /// Score every tracked object's signature against the observed loss; the
    /// candidate whose positive signature best cancels it (lowest additive
    /// distance) is the one that left. First minimum wins on exact ties.
    fn remove_best_match(&mut self, diff: &GridReading) -> Result<Option<ObjectEvent>, ObjectError> {
        let mut best: Option<(usize, f64)> = None;
        for (index, object) in self.objects.iter().enumerate() {
            let score = object.reading().distance_to(diff, true);
            match best {
                Some((_, s)) if score >= s => {}
                _ => best = Some((index, score)),
            }
        }
        let Some((index, score)) = best else {
            debug!("removal signature with nothing tracked; ignored");
            return Ok(None);
        };
        let object = self.objects.remove(index);
        let stats = object.stats()?;
        info!(
            "object {} removed: weight {:.1}, match score {:.1}",
            object.id(),
            stats.weight,
            score
        );
        Ok(Some(ObjectEvent::DeleteObject(stats)))
    }

    fn observation(&self, reading: GridReading, event: Option<ObjectEvent>) -> Observation {
        Observation {
            reading,
            objects: self.objects.iter().map(TrackedObject::snapshot).collect(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: GridShape = GridShape {
        height: 4,
        width: 4,
    };

    fn thresholds() -> Thresholds {
        Thresholds {
            new_object: 140.0,
            delete_object: 80.0,
            calibration_cycles: 2,
            test_cycles: 2,
        }
    }

    fn reading(cells: Vec<f64>) -> GridReading {
        GridReading::from_cells(SHAPE, cells).unwrap()
    }

    fn zeros() -> GridReading {
        GridReading::zeroed(SHAPE)
    }

    fn block(w1: f64, w2: f64) -> GridReading {
        let mut cells = vec![0.0; 16];
        cells[4 + 1] = w1; // (1, 1)
        cells[4 + 2] = w2; // (1, 2)
        reading(cells)
    }

    /// Run the tracker through calibration on a constant reading.
    /// Window of 2: seed, one merge, one completing call.
    fn calibrated(constant: &GridReading) -> Tracker {
        let mut tracker = Tracker::new(SHAPE, thresholds());
        for _ in 0..3 {
            assert_eq!(tracker.phase(), Phase::Calibrating);
            let obs = tracker.observe(constant.clone()).unwrap();
            assert!(obs.event.is_none());
        }
        assert_eq!(tracker.phase(), Phase::Steady);
        tracker
    }

    #[test]
    fn calibration_reaches_steady_exactly_once() {
        let constant = block(40.0, 10.0);
        let mut tracker = Tracker::new(SHAPE, thresholds());
        let mut transitions = 0;
        let mut prev = tracker.phase();
        for _ in 0..10 {
            tracker.observe(constant.clone()).unwrap();
            let phase = tracker.phase();
            if prev == Phase::Calibrating && phase == Phase::Steady {
                transitions += 1;
            }
            prev = phase;
        }
        assert_eq!(transitions, 1);
        // constant input normalizes to zero, so the tracker idles with
        // nothing tracked
        assert_eq!(tracker.phase(), Phase::Steady);
        assert_eq!(tracker.object_count(), 0);
    }

    #[test]
    fn empty_surface_never_fires_events() {
        let mut tracker = calibrated(&zeros());
        for _ in 0..50 {
            let obs = tracker.observe(zeros()).unwrap();
            assert!(obs.event.is_none());
            assert!(obs.objects.is_empty());
            assert_eq!(obs.reading.weight(), 0.0);
        }
        assert_eq!(tracker.phase(), Phase::Steady);
    }

    #[test]
    fn sustained_weight_becomes_one_object_then_one_removal() {
        let mut tracker = calibrated(&zeros());
        let object = block(300.0, 200.0); // weight 500

        let mut events = Vec::new();
        // placement: first deviating reading seeds the test window, one
        // merge, one completing call
        for _ in 0..3 {
            let obs = tracker.observe(object.clone()).unwrap();
            events.extend(obs.event.clone());
        }
        assert_eq!(events.len(), 1);
        let stats = match &events[0] {
            ObjectEvent::NewObject(s) => s,
            other => panic!("expected new_obj, got {other:?}"),
        };
        assert!((stats.weight - 500.0).abs() < 1e-9);
        assert!((stats.position.0 - 1.5).abs() < 1e-9);
        assert!((stats.position.1 - 1.9).abs() < 1e-9);
        assert_eq!(tracker.object_count(), 1);
        assert_eq!(tracker.phase(), Phase::Steady);

        // removal: surface returns to baseline
        let mut events = Vec::new();
        for _ in 0..3 {
            let obs = tracker.observe(zeros()).unwrap();
            events.extend(obs.event.clone());
        }
        assert_eq!(events.len(), 1);
        let stats = match &events[0] {
            ObjectEvent::DeleteObject(s) => s,
            other => panic!("expected del_obj, got {other:?}"),
        };
        assert!((stats.weight - 500.0).abs() < 1e-9);
        assert_eq!(tracker.object_count(), 0);
    }

    #[test]
    fn removal_picks_the_nearest_matching_object() {
        let mut tracker = calibrated(&zeros());
        let first = block(300.0, 0.0);
        let both = block(300.0, 400.0);

        // place two objects back to back
        for _ in 0..3 {
            tracker.observe(first.clone()).unwrap();
        }
        for _ in 0..3 {
            tracker.observe(both.clone()).unwrap();
        }
        assert_eq!(tracker.object_count(), 2);

        // lift the second one (surface falls back to just `first`)
        let mut removed = None;
        for _ in 0..3 {
            let obs = tracker.observe(first.clone()).unwrap();
            if let Some(ObjectEvent::DeleteObject(stats)) = obs.event {
                removed = Some(stats);
            }
        }
        let stats = removed.expect("expected a del_obj event");
        assert!((stats.weight - 400.0).abs() < 1e-9);
        assert_eq!(tracker.object_count(), 1);
    }

    #[test]
    fn removal_with_nothing_tracked_is_a_quiet_no_op() {
        let mut tracker = calibrated(&zeros());
        // weight exactly at the new-object threshold opens the test window but
        // never crosses it, so the steady state rises with nothing tracked
        let ghost = block(140.0, 0.0);
        for _ in 0..3 {
            let obs = tracker.observe(ghost.clone()).unwrap();
            assert!(obs.event.is_none());
        }
        assert_eq!(tracker.object_count(), 0);

        // dropping back to zero resolves as a removal with no candidates
        for _ in 0..3 {
            let obs = tracker.observe(zeros()).unwrap();
            assert!(obs.event.is_none());
        }
        assert_eq!(tracker.object_count(), 0);
        assert_eq!(tracker.phase(), Phase::Steady);
    }

    #[test]
    fn at_most_one_event_per_call() {
        let mut tracker = Tracker::new(SHAPE, thresholds());
        let mut total = 0;
        let sequence = [
            0.0, 0.0, 0.0, 0.0, 500.0, 500.0, 500.0, 0.0, 0.0, 0.0, 500.0,
        ];
        for w in sequence {
            let obs = tracker.observe(block(w, 0.0)).unwrap();
            total += obs.event.iter().count();
            assert!(obs.event.iter().count() <= 1);
        }
        assert_eq!(total, 2); // one placement, one removal
    }

    #[test]
    fn event_wire_format() {
        let event = ObjectEvent::NewObject(ObjectStats {
            weight: 500.0,
            position: (1.5, 1.9),
            spread: 0.49,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "new_obj");
        assert_eq!(json["weight"], 500.0);
        assert_eq!(json["position"][0], 1.5);
        assert_eq!(json["position"][1], 1.9);
        assert_eq!(json["spread"], 0.49);
    }
}
