//! Windowed incremental-mean accumulator.

use crate::reading::GridReading;

/// Running mean over a fixed number of samples.
///
/// Seeded by its first reading (count 1). Each accepted sample merges into the
/// mean until the window length is reached; from then on `accept` only reports
/// the finalized mean and the triggering sample is not merged. Callers discard
/// the accumulator once it has completed. Calibration and transient testing
/// use the same mechanism with different window lengths.
#[derive(Debug, Clone)]
pub struct RollingAverage {
    mean: GridReading,
    samples: u64,
    window: u64,
}

impl RollingAverage {
    pub fn new(seed: GridReading, window: u64) -> Self {
        Self {
            mean: seed,
            samples: 1,
            window,
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Merge one sample, or report the finalized mean once the window is full.
    pub fn accept(&mut self, sample: &GridReading) -> Option<GridReading> {
        if self.samples < self.window {
            self.mean = self.mean.averaged_with(sample, self.samples);
            self.samples += 1;
            None
        } else {
            Some(self.mean.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::GridShape;

    const SHAPE: GridShape = GridShape {
        height: 2,
        width: 2,
    };

    fn reading(v: f64) -> GridReading {
        GridReading::from_cells(SHAPE, vec![v; 4]).unwrap()
    }

    #[test]
    fn seed_counts_as_first_sample() {
        let avg = RollingAverage::new(reading(1.0), 3);
        assert_eq!(avg.samples(), 1);
    }

    #[test]
    fn completes_at_window_without_merging_the_trigger() {
        let mut avg = RollingAverage::new(reading(6.0), 3);
        assert!(avg.accept(&reading(0.0)).is_none()); // mean 3.0, count 2
        assert!(avg.accept(&reading(3.0)).is_none()); // mean 3.0, count 3
        // window full: this sample must not disturb the mean
        let done = avg.accept(&reading(1000.0)).unwrap();
        assert!(done.cells().iter().all(|&c| (c - 3.0).abs() < 1e-12));
        assert_eq!(avg.samples(), 3);
    }

    #[test]
    fn constant_input_yields_the_constant() {
        let mut avg = RollingAverage::new(reading(7.0), 5);
        for _ in 0..4 {
            assert!(avg.accept(&reading(7.0)).is_none());
        }
        let done = avg.accept(&reading(7.0)).unwrap();
        assert_eq!(done, reading(7.0));
    }
}
