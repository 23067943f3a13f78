pub mod bc;
pub mod equations;
pub mod operator;
pub(crate) mod table;

use std::sync::Arc;

use nalgebra::DVector;

use crate::discretization::field::Field;
use crate::error::{ConfigError, Result};

/// One slot of a partial update.
///
/// `Keep` leaves whatever the table already stores; `Set` replaces it. A label that
/// was never registered has nothing to keep, so every slot of a new label must be `Set`.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Update<T> {
    #[default]
    Keep,
    Set(T),
}

impl<T> Update<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Update::Keep)
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Update::Keep => None,
            Update::Set(value) => Some(value),
        }
    }
}

/// Right-hand side of an equation or boundary entry.
#[derive(Clone, Debug, PartialEq)]
pub enum Rhs {
    /// Broadcast to every row of the entry.
    Uniform(f64),
    Values(DVector<f64>),
}

impl Rhs {
    pub(crate) fn resolve(&self, rows: usize, label: &str) -> Result<DVector<f64>> {
        match self {
            Rhs::Uniform(value) => Ok(DVector::from_element(rows, *value)),
            Rhs::Values(values) if values.len() == rows => Ok(values.clone()),
            Rhs::Values(values) => Err(ConfigError::ShapeMismatch {
                context: format!("right-hand side of '{label}'"),
                expected: rows,
                found: values.len(),
            }
            .into()),
        }
    }
}

impl From<f64> for Rhs {
    fn from(value: f64) -> Self {
        Rhs::Uniform(value)
    }
}

impl From<DVector<f64>> for Rhs {
    fn from(values: DVector<f64>) -> Self {
        Rhs::Values(values)
    }
}

impl From<Vec<f64>> for Rhs {
    fn from(values: Vec<f64>) -> Self {
        Rhs::Values(DVector::from_vec(values))
    }
}

/// Column layout of a model: each field's offset and size in the global vector.
#[derive(Clone, Debug, Default)]
pub struct FieldLayout {
    slots: Vec<(Arc<str>, usize, usize)>,
    total: usize,
}

impl FieldLayout {
    pub fn new(fields: &[Field]) -> Self {
        let mut slots = Vec::with_capacity(fields.len());
        let mut offset = 0;
        for field in fields {
            slots.push((field.key(), offset, field.size()));
            offset += field.size();
        }
        Self {
            slots,
            total: offset,
        }
    }

    /// `(offset, size)` of the named field.
    pub fn slot(&self, field: &str) -> Option<(usize, usize)> {
        self.slots
            .iter()
            .find(|(name, _, _)| name.as_ref() == field)
            .map(|&(_, offset, size)| (offset, size))
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize, usize)> {
        self.slots
            .iter()
            .map(|(name, offset, size)| (name.as_ref(), *offset, *size))
    }
}
