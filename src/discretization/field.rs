use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::discretization::axis::Axis;
use crate::discretization::stencil::{CacheStats, StencilCache, StencilKey, StencilKind};
use crate::discretization::time::{HistoryStencil, TimeSide, TimeTerm};
use crate::error::{ConfigError, Result};
use crate::physics::bc::RowMask;
use crate::physics::operator::Operator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Start,
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum OperatorKey {
    Spatial {
        axis: usize,
        order: usize,
        accuracy: usize,
    },
    Time {
        order: usize,
        accuracy: usize,
    },
}

#[derive(Clone, Debug)]
struct FieldSpec {
    name: Arc<str>,
    axes: Vec<Axis>,
    shape: Vec<usize>,
    strides: Vec<usize>,
    size: usize,
    accuracy: usize,
    timestep: Option<f64>,
    stencils: Arc<StencilCache>,
}

#[derive(Debug, Default)]
struct OperatorCache {
    entries: RwLock<HashMap<OperatorKey, Arc<CsrMatrix<f64>>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

/// Named scalar unknown sampled on the tensor product of its axes.
///
/// Points are raveled row-major over the axis order (last axis fastest). A field
/// is a cheap handle: clones share the operator cache, which only ever grows.
#[derive(Clone, Debug)]
pub struct Field {
    spec: Arc<FieldSpec>,
    operators: Arc<OperatorCache>,
}

impl Field {
    pub fn new(name: impl Into<Arc<str>>, axes: Vec<Axis>, accuracy: usize) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: &str| ConfigError::InvalidField {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("name must not be empty").into());
        }
        if axes.is_empty() {
            return Err(invalid("at least one axis is required").into());
        }
        if accuracy == 0 {
            return Err(invalid("default accuracy order must be at least 1").into());
        }
        let mut seen = HashSet::new();
        for axis in &axes {
            if !seen.insert(axis.name()) {
                return Err(ConfigError::DuplicateName {
                    kind: "axis",
                    name: axis.name().to_string(),
                }
                .into());
            }
        }

        let shape: Vec<usize> = axes.iter().map(Axis::count).collect();
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        let size = shape.iter().product();

        Ok(Self {
            spec: Arc::new(FieldSpec {
                name,
                axes,
                shape,
                strides,
                size,
                accuracy,
                timestep: None,
                stencils: StencilCache::shared(),
            }),
            operators: Arc::new(OperatorCache::default()),
        })
    }

    /// Enables time derivatives with step `dt`.
    pub fn with_timestep(self, dt: f64) -> Result<Self> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(ConfigError::InvalidField {
                name: self.name().to_string(),
                reason: format!("timestep must be positive and finite, got {dt}"),
            }
            .into());
        }
        Ok(self.respec(|spec| spec.timestep = Some(dt)))
    }

    /// Uses `cache` instead of the process-wide stencil cache.
    pub fn with_stencil_cache(self, cache: Arc<StencilCache>) -> Self {
        self.respec(|spec| spec.stencils = cache)
    }

    fn respec(self, change: impl FnOnce(&mut FieldSpec)) -> Self {
        let mut spec = self.spec.as_ref().clone();
        change(&mut spec);
        Self {
            spec: Arc::new(spec),
            operators: Arc::new(OperatorCache::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub(crate) fn key(&self) -> Arc<str> {
        self.spec.name.clone()
    }

    pub fn axes(&self) -> &[Axis] {
        &self.spec.axes
    }

    pub fn axis(&self, name: &str) -> Result<(usize, &Axis)> {
        self.spec
            .axes
            .iter()
            .enumerate()
            .find(|(_, axis)| axis.name() == name)
            .ok_or_else(|| {
                ConfigError::UnknownAxis {
                    field: self.name().to_string(),
                    axis: name.to_string(),
                }
                .into()
            })
    }

    pub fn shape(&self) -> &[usize] {
        &self.spec.shape
    }

    pub fn size(&self) -> usize {
        self.spec.size
    }

    pub fn accuracy(&self) -> usize {
        self.spec.accuracy
    }

    pub fn timestep(&self) -> Option<f64> {
        self.spec.timestep
    }

    pub fn stencil_cache(&self) -> &Arc<StencilCache> {
        &self.spec.stencils
    }

    /// Operator cache hits and misses of this field.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.operators.hits.load(Ordering::Relaxed),
            misses: self.operators.misses.load(Ordering::Relaxed),
        }
    }

    pub fn identity(&self) -> Operator {
        Operator::single(self.key(), Arc::new(CsrMatrix::identity(self.size())))
    }

    /// `d^order / d axis^order`, with `accuracy` defaulting to the field's.
    ///
    /// Interior rows use the centered stencil; the first and last rows along the
    /// axis fall back to forward and backward stencils of the same accuracy.
    pub fn derivative(&self, axis: &str, order: usize, accuracy: Option<usize>) -> Result<Operator> {
        let (index, axis) = self.axis(axis)?;
        let accuracy = accuracy.unwrap_or(self.spec.accuracy);
        let key = OperatorKey::Spatial {
            axis: index,
            order,
            accuracy,
        };

        let matrix = self.cached(key, || {
            let along = self.derivative_1d(axis, order, accuracy)?;
            Ok(self.embed(index, &along))
        })?;
        Ok(Operator::single(self.key(), matrix))
    }

    pub fn time_derivative(
        &self,
        side: TimeSide,
        order: usize,
        accuracy: Option<usize>,
    ) -> Result<TimeTerm> {
        match side {
            TimeSide::Lhs => self.time_current(order, accuracy).map(TimeTerm::Current),
            TimeSide::Rhs => self.time_history(order, accuracy).map(TimeTerm::History),
        }
    }

    /// Current-sample part of the backward time stencil: identity times its weight.
    pub fn time_current(&self, order: usize, accuracy: Option<usize>) -> Result<Operator> {
        let accuracy = accuracy.unwrap_or(self.spec.accuracy);
        let key = OperatorKey::Time { order, accuracy };
        let matrix = self.cached(key, || {
            let (current, _) = self.time_weights(order, accuracy)?;
            Ok(CsrMatrix::identity(self.size()) * current)
        })?;
        Ok(Operator::single(self.key(), matrix))
    }

    /// Past-sample part of the backward time stencil.
    pub fn time_history(&self, order: usize, accuracy: Option<usize>) -> Result<HistoryStencil> {
        let accuracy = accuracy.unwrap_or(self.spec.accuracy);
        let (_, past) = self.time_weights(order, accuracy)?;
        Ok(HistoryStencil::new(self.key(), self.size(), past))
    }

    // (current weight, negated past weights most recent first), scaled by dt^-order
    fn time_weights(&self, order: usize, accuracy: usize) -> Result<(f64, Vec<f64>)> {
        let dt = self
            .spec
            .timestep
            .ok_or_else(|| ConfigError::MissingTimestep(self.name().to_string()))?;
        if order == 0 {
            return Err(ConfigError::UnachievableAccuracy {
                derivative: order,
                accuracy,
                reason: "time derivative order must be at least 1".into(),
            }
            .into());
        }

        let stencil = self
            .spec
            .stencils
            .get(StencilKey::new(order, accuracy, StencilKind::Backward))?;
        let scale = dt.powi(-(order as i32));
        // offsets run from the oldest sample up to 0 (the current one)
        let mut weights = stencil.weights().iter().rev().map(|w| w * scale);
        let current = weights.next().unwrap_or(0.0);
        let past = weights.map(|w| -w).collect();
        Ok((current, past))
    }

    fn derivative_1d(&self, axis: &Axis, order: usize, accuracy: usize) -> Result<CsrMatrix<f64>> {
        let n = axis.count();
        if order == 0 {
            return Ok(CsrMatrix::identity(n));
        }

        let stencils = &self.spec.stencils;
        let centered = stencils.get(StencilKey::new(order, accuracy, StencilKind::Centered))?;
        let forward = stencils.get(StencilKey::new(order, accuracy, StencilKind::Forward))?;
        let backward = stencils.get(StencilKey::new(order, accuracy, StencilKind::Backward))?;

        // the first `reach` rows use forward stencils anchored at the row itself
        let reach = centered.reach();
        let required = centered.width().max(forward.width() + reach.saturating_sub(1));
        if n < required {
            return Err(ConfigError::StencilTooWide {
                axis: axis.name().to_string(),
                required,
                available: n,
            }
            .into());
        }

        let scale = axis.spacing().powi(-(order as i32));
        let mut coo = CooMatrix::new(n, n);
        for row in 0..n {
            let stencil = if row < reach {
                &forward
            } else if row >= n - reach {
                &backward
            } else {
                &centered
            };
            for (offset, weight) in stencil.iter().filter(|(_, w)| *w != 0.0) {
                let col = (row as i64 + offset) as usize;
                coo.push(row, col, weight * scale);
            }
        }
        Ok(CsrMatrix::from(&coo))
    }

    // I_outer (x) along (x) I_inner
    fn embed(&self, index: usize, along: &CsrMatrix<f64>) -> CsrMatrix<f64> {
        let outer: usize = self.spec.shape[..index].iter().product();
        let inner: usize = self.spec.shape[index + 1..].iter().product();
        if outer == 1 && inner == 1 {
            return along.clone();
        }
        let left = kron(&CsrMatrix::identity(outer), along);
        kron(&left, &CsrMatrix::identity(inner))
    }

    fn cached(
        &self,
        key: OperatorKey,
        build: impl FnOnce() -> Result<CsrMatrix<f64>>,
    ) -> Result<Arc<CsrMatrix<f64>>> {
        let cache = &self.operators;
        if let Some(matrix) = cache
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            cache.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(matrix.clone());
        }

        let mut entries = cache.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(matrix) = entries.get(&key) {
            cache.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(matrix.clone());
        }
        let matrix = Arc::new(build()?);
        cache.misses.fetch_add(1, Ordering::Relaxed);
        entries.insert(key, matrix.clone());
        Ok(matrix)
    }

    /// Flat row of the point with multi-index `index`.
    pub fn flat_index(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.spec.shape.len() {
            return Err(ConfigError::ShapeMismatch {
                context: format!("index dimensions of field '{}'", self.name()),
                expected: self.spec.shape.len(),
                found: index.len(),
            }
            .into());
        }
        let mut flat = 0;
        for ((&i, &n), &stride) in index.iter().zip(&self.spec.shape).zip(&self.spec.strides) {
            if i >= n {
                return Err(self.bad_mask(format!("index {i} is outside an axis of {n} points")));
            }
            flat += i * stride;
        }
        Ok(flat)
    }

    /// Multi-index of flat row `flat`.
    pub fn unravel(&self, flat: usize) -> Vec<usize> {
        self.spec
            .shape
            .iter()
            .zip(&self.spec.strides)
            .map(|(&n, &stride)| (flat / stride) % n)
            .collect()
    }

    /// Every flat row whose coordinate along `axis` has index `index`.
    pub fn rows_at(&self, axis: &str, index: usize) -> Result<Vec<usize>> {
        let (k, ax) = self.axis(axis)?;
        if index >= ax.count() {
            return Err(self.bad_mask(format!(
                "index {index} is outside axis '{}' of {} points",
                ax.name(),
                ax.count()
            )));
        }
        let stride = self.spec.strides[k];
        Ok((0..self.size())
            .filter(|&flat| (flat / stride) % ax.count() == index)
            .collect())
    }

    pub fn edge_rows(&self, axis: &str, edge: Edge) -> Result<Vec<usize>> {
        let (_, ax) = self.axis(axis)?;
        let index = match edge {
            Edge::Start => 0,
            Edge::End => ax.count() - 1,
        };
        self.rows_at(axis, index)
    }

    pub fn mask(&self, rows: impl IntoIterator<Item = usize>) -> Result<RowMask> {
        RowMask::new(self.key(), self.size(), rows.into_iter().collect())
    }

    pub fn edge_mask(&self, axis: &str, edge: Edge) -> Result<RowMask> {
        self.mask(self.edge_rows(axis, edge)?)
    }

    pub fn coords(&self, axis: &str) -> Result<DVector<f64>> {
        Ok(self.axis(axis)?.1.coords())
    }

    /// Coordinate along `axis` at every flat point.
    pub fn meshgrid(&self, axis: &str) -> Result<DVector<f64>> {
        let (k, ax) = self.axis(axis)?;
        let stride = self.spec.strides[k];
        Ok(DVector::from_fn(self.size(), |flat, _| {
            ax.coord((flat / stride) % ax.count())
        }))
    }

    fn bad_mask(&self, reason: String) -> crate::error::FdError {
        ConfigError::InvalidMask {
            field: self.name().to_string(),
            reason,
        }
        .into()
    }
}

fn kron(a: &CsrMatrix<f64>, b: &CsrMatrix<f64>) -> CsrMatrix<f64> {
    let (rows, cols) = (b.nrows(), b.ncols());
    let mut coo = CooMatrix::new(a.nrows() * rows, a.ncols() * cols);
    for (i, j, &v) in a.triplet_iter() {
        for (k, l, &w) in b.triplet_iter() {
            coo.push(i * rows + k, j * cols + l, v * w);
        }
    }
    CsrMatrix::from(&coo)
}
