use std::sync::Arc;

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::error::{ConfigError, Result};
use crate::physics::operator::Operator;

/// Which side of the equation a time derivative lands on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeSide {
    /// The current sample, folded into the governing matrix.
    Lhs,
    /// The past samples, moved to the right-hand side.
    Rhs,
}

#[derive(Clone, Debug)]
pub enum TimeTerm {
    Current(Operator),
    History(HistoryStencil),
}

/// Past-sample part of a backward time stencil.
///
/// Weights are ordered most recent first and are already negated and scaled by
/// `dt^-order`, so `apply` yields the forcing vector that belongs on the
/// right-hand side.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryStencil {
    field: Arc<str>,
    size: usize,
    weights: Vec<f64>,
}

impl HistoryStencil {
    pub(crate) fn new(field: Arc<str>, size: usize, weights: Vec<f64>) -> Self {
        Self {
            field,
            size,
            weights,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Number of past samples the stencil reads.
    pub fn depth(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// `[w_1 I | w_2 I | ...]`, acting on the stacked history vector.
    pub fn matrix(&self) -> CsrMatrix<f64> {
        let n = self.size;
        let mut coo = CooMatrix::new(n, n * self.depth());
        for (lag, &w) in self.weights.iter().enumerate() {
            for i in 0..n {
                coo.push(i, lag * n + i, w);
            }
        }
        CsrMatrix::from(&coo)
    }

    /// Forcing vector from past samples, `past[0]` being the most recent.
    pub fn apply(&self, past: &[DVector<f64>]) -> Result<DVector<f64>> {
        if past.len() < self.depth() {
            return Err(ConfigError::ShapeMismatch {
                context: format!("history depth of field '{}'", self.field),
                expected: self.depth(),
                found: past.len(),
            }
            .into());
        }

        let mut forcing = DVector::zeros(self.size);
        for (&w, sample) in self.weights.iter().zip(past) {
            if sample.len() != self.size {
                return Err(ConfigError::ShapeMismatch {
                    context: format!("history sample of field '{}'", self.field),
                    expected: self.size,
                    found: sample.len(),
                }
                .into());
            }
            forcing.axpy(w, sample, 1.0);
        }
        Ok(forcing)
    }
}
