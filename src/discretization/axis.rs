use std::sync::Arc;

use nalgebra::DVector;

use crate::error::{ConfigError, Result};

/// Uniformly spaced, named 1-D coordinate set.
///
/// Cloning is cheap and every clone describes the same grid, so one axis can be
/// shared by any number of fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Axis {
    name: Arc<str>,
    start: f64,
    stop: f64,
    count: usize,
}

impl Axis {
    pub fn new(name: impl Into<Arc<str>>, start: f64, stop: f64, count: usize) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: &str| ConfigError::InvalidAxis {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("name must not be empty").into());
        }
        if !start.is_finite() || !stop.is_finite() {
            return Err(invalid("endpoints must be finite").into());
        }
        if count < 2 {
            return Err(invalid("at least two points are required").into());
        }
        if stop <= start {
            return Err(invalid("stop must be greater than start").into());
        }

        Ok(Self {
            name,
            start,
            stop,
            count,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn stop(&self) -> f64 {
        self.stop
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn spacing(&self) -> f64 {
        (self.stop - self.start) / (self.count - 1) as f64
    }

    /// Coordinate of point `i`. The last point is exactly `stop`.
    pub fn coord(&self, i: usize) -> f64 {
        if i + 1 == self.count {
            self.stop
        } else {
            self.start + i as f64 * self.spacing()
        }
    }

    pub fn coords(&self) -> DVector<f64> {
        DVector::from_fn(self.count, |i, _| self.coord(i))
    }
}
