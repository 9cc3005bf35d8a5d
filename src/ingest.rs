//! Validation gate between the raw snapshot stream and the tracker.
//!
//! One JSON line per snapshot, either nested rows or a flat cell array. A
//! malformed sample is rejected here and never reaches the tracker, so a bad
//! line can't leave it half-mutated. Rejections are tallied on the gate
//! itself, not in any global.

use serde::Deserialize;
use thiserror::Error;

use crate::reading::{GridReading, GridShape, ReadingError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unreadable payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Shape(#[from] ReadingError),
    #[error("invalid total weight {weight}")]
    InvalidWeight { weight: f64 },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Nested(Vec<Vec<f64>>),
    Flat(Vec<f64>),
}

#[derive(Debug)]
pub struct SampleGate {
    shape: GridShape,
    rejected: u64,
}

impl SampleGate {
    pub fn new(shape: GridShape) -> Self {
        Self { shape, rejected: 0 }
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Parse and validate one snapshot line. Row structure is not enforced,
    /// only the flattened cell count; the bridge is allowed to chunk however
    /// it likes.
    pub fn admit(&mut self, line: &str) -> Result<GridReading, IngestError> {
        match self.parse(line) {
            Ok(reading) => Ok(reading),
            Err(err) => {
                self.rejected += 1;
                Err(err)
            }
        }
    }

    fn parse(&self, line: &str) -> Result<GridReading, IngestError> {
        let payload: Payload = serde_json::from_str(line)?;
        let cells: Vec<f64> = match payload {
            Payload::Nested(rows) => rows.into_iter().flatten().collect(),
            Payload::Flat(cells) => cells,
        };
        let reading = GridReading::from_cells(self.shape, cells)?;
        if !reading.weight().is_finite() {
            return Err(IngestError::InvalidWeight {
                weight: reading.weight(),
            });
        }
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: GridShape = GridShape {
        height: 2,
        width: 3,
    };

    #[test]
    fn nested_rows_are_accepted() {
        let mut gate = SampleGate::new(SHAPE);
        let r = gate.admit("[[1, 2, 3], [4, 5, 6]]").unwrap();
        assert_eq!(r.weight(), 21.0);
        assert_eq!(r.at(1, 0), 4.0);
        assert_eq!(gate.rejected(), 0);
    }

    #[test]
    fn flat_cells_are_accepted() {
        let mut gate = SampleGate::new(SHAPE);
        let r = gate.admit("[1, 2, 3, 4, 5, 6]").unwrap();
        assert_eq!(r.weight(), 21.0);
    }

    #[test]
    fn ragged_rows_pass_when_the_total_matches() {
        let mut gate = SampleGate::new(SHAPE);
        let r = gate.admit("[[1, 2], [3, 4, 5, 6]]").unwrap();
        assert_eq!(r.weight(), 21.0);
    }

    #[test]
    fn wrong_cell_count_is_rejected_and_counted() {
        let mut gate = SampleGate::new(SHAPE);
        let err = gate.admit("[[1, 2, 3], [4, 5]]").unwrap_err();
        assert!(matches!(err, IngestError::Shape(_)));
        assert_eq!(gate.rejected(), 1);
    }

    #[test]
    fn garbage_lines_are_rejected_and_counted() {
        let mut gate = SampleGate::new(SHAPE);
        assert!(matches!(
            gate.admit("hello").unwrap_err(),
            IngestError::Payload(_)
        ));
        assert!(matches!(
            gate.admit("{\"cells\": 3}").unwrap_err(),
            IngestError::Payload(_)
        ));
        assert_eq!(gate.rejected(), 2);
    }

    #[test]
    fn overflowing_weight_is_rejected() {
        let mut gate = SampleGate::new(SHAPE);
        let err = gate
            .admit("[1e308, 1e308, 1e308, 0, 0, 0]")
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidWeight { .. }));
        assert_eq!(gate.rejected(), 1);
    }

    #[test]
    fn rejects_accumulate_across_samples() {
        let mut gate = SampleGate::new(SHAPE);
        let _ = gate.admit("[]");
        let _ = gate.admit("nope");
        let _ = gate.admit("[[1, 2, 3], [4, 5, 6]]");
        let _ = gate.admit("[1]");
        assert_eq!(gate.rejected(), 3);
    }
}
