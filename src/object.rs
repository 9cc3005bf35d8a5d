//! A confirmed object on the surface and its derived spatial statistics.

use std::cell::OnceCell;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::reading::GridReading;

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("centroid undefined for zero-weight object {id}")]
    UndefinedCentroid { id: u64 },
}

/// Lifecycle-event payload: the scalars downstream consumers care about.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectStats {
    pub weight: f64,
    pub position: (f64, f64),
    pub spread: f64,
}

/// Per-call view of one tracked object, safe to hand to display code.
/// A zero-weight ghost snapshots with no position or spread but stays in the
/// tracked set (and stays deletable).
#[derive(Debug, Clone, Serialize)]
pub struct ObjectSnapshot {
    pub id: u64,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread: Option<f64>,
    pub age_ms: u64,
}

/// An object the tracker has confirmed, characterized by the signed difference
/// reading attributed to it when it appeared.
///
/// The attributed reading never changes, so centroid and spread are computed
/// once on first access and memoized.
#[derive(Debug)]
pub struct TrackedObject {
    id: u64,
    reading: GridReading,
    created: Instant,
    centroid: OnceCell<(f64, f64)>,
    spread: OnceCell<f64>,
}

fn sq_eu_dist(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)
}

impl TrackedObject {
    pub fn new(id: u64, reading: GridReading) -> Self {
        Self {
            id,
            reading,
            created: Instant::now(),
            centroid: OnceCell::new(),
            spread: OnceCell::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn reading(&self) -> &GridReading {
        &self.reading
    }

    pub fn age_ms(&self) -> u64 {
        self.created.elapsed().as_millis() as u64
    }

    /// Weight-weighted mean position over (row, col) space, each cell a point
    /// mass at its center.
    pub fn centroid(&self) -> Result<(f64, f64), ObjectError> {
        if let Some(&c) = self.centroid.get() {
            return Ok(c);
        }
        let weight = self.reading.weight();
        if weight == 0.0 {
            return Err(ObjectError::UndefinedCentroid { id: self.id });
        }
        let shape = self.reading.shape();
        let mut acc = (0.0, 0.0);
        for i in 0..shape.height {
            for j in 0..shape.width {
                let cell = self.reading.at(i, j);
                acc.0 += cell * (i as f64 + 0.5);
                acc.1 += cell * (j as f64 + 0.5);
            }
        }
        let c = (acc.0 / weight, acc.1 / weight);
        let _ = self.centroid.set(c);
        Ok(c)
    }

    /// Radius of gyration: sqrt of the |weight|-weighted mean squared distance
    /// of each cell from the centroid.
    pub fn spread(&self) -> Result<f64, ObjectError> {
        if let Some(&s) = self.spread.get() {
            return Ok(s);
        }
        let cm = self.centroid()?;
        let shape = self.reading.shape();
        let mut acc = 0.0;
        for i in 0..shape.height {
            for j in 0..shape.width {
                let cell = self.reading.at(i, j);
                acc += cell.abs() * sq_eu_dist((i as f64 + 0.5, j as f64 + 0.5), cm);
            }
        }
        let s = (acc / self.reading.weight()).sqrt();
        let _ = self.spread.set(s);
        Ok(s)
    }

    pub fn stats(&self) -> Result<ObjectStats, ObjectError> {
        Ok(ObjectStats {
            weight: self.reading.weight(),
            position: self.centroid()?,
            spread: self.spread()?,
        })
    }

    pub fn snapshot(&self) -> ObjectSnapshot {
        ObjectSnapshot {
            id: self.id,
            weight: self.reading.weight(),
            position: self.centroid().ok(),
            spread: self.spread().ok(),
            age_ms: self.age_ms(),
        }
    }
}
