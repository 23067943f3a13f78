use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use nalgebra::{DMatrix, DVector};
use num_traits::Float;

use crate::error::{ConfigError, Result};

/// Weights below this magnitude (relative to the largest weight) are snapped to zero.
const WEIGHT_CUTOFF: f64 = 1e-13;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StencilKind {
    Centered,
    Forward,
    Backward,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilKey {
    pub derivative: usize,
    pub accuracy: usize,
    pub kind: StencilKind,
}

impl StencilKey {
    pub fn new(derivative: usize, accuracy: usize, kind: StencilKind) -> Self {
        Self {
            derivative,
            accuracy,
            kind,
        }
    }

    /// Integer offsets of the sample points, ascending.
    pub fn offsets(&self) -> Result<Vec<i64>> {
        let (d, a) = (self.derivative, self.accuracy);
        let unachievable = |reason: &str| ConfigError::UnachievableAccuracy {
            derivative: d,
            accuracy: a,
            reason: reason.to_string(),
        };

        if a == 0 {
            return Err(unachievable("accuracy order must be at least 1").into());
        }

        let offsets = match self.kind {
            StencilKind::Centered => {
                if a % 2 != 0 {
                    return Err(unachievable("centered stencils need an even accuracy order").into());
                }
                let p = ((d + a - 1) / 2) as i64;
                (-p..=p).collect()
            }
            StencilKind::Forward => (0..(d + a) as i64).collect(),
            StencilKind::Backward => (-((d + a - 1) as i64)..=0).collect(),
        };
        Ok(offsets)
    }
}

/// Finite-difference weights on unit spacing. Callers scale by `spacing^-derivative`.
#[derive(Clone, Debug, PartialEq)]
pub struct Stencil {
    derivative: usize,
    offsets: Vec<i64>,
    weights: Vec<f64>,
}

impl Stencil {
    pub fn new(key: StencilKey) -> Result<Self> {
        let offsets = key.offsets()?;
        Self::solve(key.derivative, key.accuracy, offsets)
    }

    /// Weights for an arbitrary set of distinct integer offsets.
    pub fn from_offsets(derivative: usize, offsets: &[i64]) -> Result<Self> {
        let accuracy = offsets.len().saturating_sub(derivative);
        Self::solve(derivative, accuracy, offsets.to_vec())
    }

    // Taylor matching: sum_j w_j s_j^m = d! * delta(m, d) for m < N.
    fn solve(derivative: usize, accuracy: usize, offsets: Vec<i64>) -> Result<Self> {
        let unachievable = |reason: &str| ConfigError::UnachievableAccuracy {
            derivative,
            accuracy,
            reason: reason.to_string(),
        };

        let n = offsets.len();
        if n <= derivative {
            return Err(unachievable("need more sample points than the derivative order").into());
        }
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != n {
            return Err(unachievable("sample offsets must be distinct").into());
        }

        let system = DMatrix::from_fn(n, n, |m, j| (offsets[j] as f64).powi(m as i32));
        let factorial: f64 = (1..=derivative).map(|k| k as f64).product();
        let mut rhs = DVector::zeros(n);
        rhs[derivative] = factorial;

        let mut weights = system
            .lu()
            .solve(&rhs)
            .ok_or_else(|| unachievable("singular Taylor system"))?;

        let largest = weights.amax();
        weights
            .iter_mut()
            .filter(|w| w.abs() < WEIGHT_CUTOFF * largest)
            .for_each(|w| *w = 0.0);

        Ok(Self {
            derivative,
            offsets,
            weights: weights.as_slice().to_vec(),
        })
    }

    pub fn derivative(&self) -> usize {
        self.derivative
    }

    pub fn offsets(&self) -> &[i64] {
        &self.offsets
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn width(&self) -> usize {
        self.offsets.len()
    }

    /// Largest distance from the anchor point on either side.
    pub fn reach(&self) -> usize {
        self.offsets
            .iter()
            .map(|o| o.unsigned_abs() as usize)
            .max()
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.offsets.iter().copied().zip(self.weights.iter().copied())
    }

    /// Weighted sum of `f` sampled at `x + offset * h`, divided by `h^derivative`.
    pub fn apply<T: Float>(&self, f: impl Fn(T) -> T, x: T, h: T) -> T {
        let cast = |v: f64| T::from(v).unwrap_or_else(T::nan);
        let sum = self
            .iter()
            .fold(T::zero(), |acc, (o, w)| acc + cast(w) * f(x + cast(o as f64) * h));
        sum / h.powi(self.derivative as i32)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

/// Append-only stencil memo shared between fields (and threads).
#[derive(Debug, Default)]
pub struct StencilCache {
    entries: Mutex<HashMap<StencilKey, Arc<Stencil>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl StencilCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache used by fields that were not given their own.
    pub fn shared() -> Arc<StencilCache> {
        static SHARED: OnceLock<Arc<StencilCache>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(StencilCache::new())).clone()
    }

    pub fn get(&self, key: StencilKey) -> Result<Arc<Stencil>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stencil) = entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(stencil.clone());
        }

        let stencil = Arc::new(Stencil::new(key)?);
        self.misses.fetch_add(1, Ordering::Relaxed);
        entries.insert(key, stencil.clone());
        Ok(stencil)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
