use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use nalgebra::DVector;

use crate::discretization::time::HistoryStencil;
use crate::error::{ConfigError, Result};
use crate::models::fd_model::Model;
use crate::models::solution::Solution;
use crate::numerics::timing::{finalize_and_print, reset_timing};

/// Past states of one field, most recent first, bounded by the depth of the
/// history stencil it feeds.
#[derive(Clone, Debug)]
pub struct History {
    field: Arc<str>,
    size: usize,
    depth: usize,
    states: VecDeque<DVector<f64>>,
}

impl History {
    pub fn new(stencil: &HistoryStencil, size: usize) -> Self {
        Self {
            field: stencil.field().into(),
            size,
            depth: stencil.depth(),
            states: VecDeque::with_capacity(stencil.depth()),
        }
    }

    /// A full buffer holding `initial` at every lag, the usual cold start.
    pub fn seeded(stencil: &HistoryStencil, initial: DVector<f64>) -> Result<Self> {
        let mut history = Self::new(stencil, initial.len());
        for _ in 0..history.depth {
            history.push(initial.clone())?;
        }
        Ok(history)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Whether enough states are stored to evaluate the stencil.
    pub fn is_ready(&self) -> bool {
        self.states.len() == self.depth
    }

    /// Pushes the newest state, dropping the oldest once full.
    pub fn push(&mut self, state: DVector<f64>) -> Result<()> {
        if state.len() != self.size {
            return Err(ConfigError::ShapeMismatch {
                context: format!("history state of field '{}'", self.field),
                expected: self.size,
                found: state.len(),
            }
            .into());
        }
        if self.states.len() == self.depth {
            self.states.pop_back();
        }
        self.states.push_front(state);
        Ok(())
    }

    pub fn states(&self) -> impl Iterator<Item = &DVector<f64>> {
        self.states.iter()
    }

    /// All states stacked, most recent first; the operand of `HistoryStencil::matrix`.
    pub fn stacked(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.size * self.states.len(),
            self.states.iter().flat_map(|s| s.iter().copied()),
        )
    }

    /// Right-hand-side contribution of the stored states.
    pub fn forcing(&self, stencil: &HistoryStencil) -> Result<DVector<f64>> {
        let past: Vec<DVector<f64>> = self.states.iter().cloned().collect();
        stencil.apply(&past)
    }

    fn record(&mut self, solution: &Solution) -> Result<()> {
        let state = solution
            .values(&self.field)
            .ok_or_else(|| ConfigError::UnknownField(self.field.to_string()))?;
        self.push(state)
    }
}

/// Fixed-step time loop over a linear model.
///
/// The timestep is baked into the time operators of the fields, so `dt` here
/// must match the one the fields were built with.
pub struct TransientSolver {
    pub t_start: f64,
    pub t_end: f64,
    pub dt: f64,
    pub logging: bool,
}

impl Default for TransientSolver {
    fn default() -> Self {
        Self {
            t_start: 0.0,
            t_end: 1.0,
            dt: 1e-3,
            logging: false,
        }
    }
}

impl TransientSolver {
    pub fn new(t_start: f64, t_end: f64, dt: f64) -> Self {
        Self {
            t_start,
            t_end,
            dt,
            ..Self::default()
        }
    }

    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    /// Number of steps needed to reach `t_end`.
    pub fn steps(&self) -> Result<usize> {
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(
                ConfigError::InvalidSchedule(format!("dt must be positive, got {}", self.dt)).into(),
            );
        }
        if !(self.t_end > self.t_start) {
            return Err(ConfigError::InvalidSchedule(format!(
                "t_end {} must come after t_start {}",
                self.t_end, self.t_start
            ))
            .into());
        }
        Ok(((self.t_end - self.t_start) / self.dt - 1e-9).ceil() as usize)
    }

    /// Runs the loop and returns the number of steps taken.
    ///
    /// Each step calls `update(model, t, histories)` to push the entries that
    /// changed (typically right-hand sides built from `History::forcing`), solves,
    /// records the new state into every history and hands it to `callback`.
    /// The first error aborts the loop.
    pub fn run<U, C>(
        &self,
        model: &mut Model,
        histories: &mut [History],
        mut update: U,
        mut callback: C,
    ) -> Result<usize>
    where
        U: FnMut(&mut Model, f64, &[History]) -> Result<()>,
        C: FnMut(f64, &Solution),
    {
        let steps = self.steps()?;
        reset_timing();
        let start = Instant::now();

        if self.logging {
            println!(
                "Starting Transient Simulation: T={:.2} -> {:.2} ({} steps)",
                self.t_start, self.t_end, steps
            );
        }

        for step in 1..=steps {
            let t = self.t_start + step as f64 * self.dt;
            update(model, t, histories)?;

            let solution = match model.solve() {
                Ok(solution) => solution,
                Err(e) => {
                    if self.logging {
                        eprintln!("Step {step:>4} | t = {t:.4e} | FAILED: {e}");
                    }
                    return Err(e);
                }
            };

            if self.logging {
                println!(
                    "Step {:>4} | t = {:.4e} | dt = {:.3e} | residual = {:.2e}",
                    step,
                    t,
                    self.dt,
                    model.stats().last_residual.unwrap_or(0.0)
                );
            }

            for history in histories.iter_mut() {
                history.record(&solution)?;
            }
            callback(t, &solution);
        }

        finalize_and_print(start.elapsed());
        Ok(steps)
    }
}
