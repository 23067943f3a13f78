use std::sync::Arc;

use nalgebra::DVector;
use ndarray::{ArrayD, IxDyn};

use crate::discretization::field::Field;
use crate::error::{ConfigError, Result};

/// Solved values, one shaped array per field in model order.
///
/// Arrays are row-major over the field's axes, so `solution.get("T")[[i, j]]`
/// is the value at `x_i, y_j`.
#[derive(Clone, Debug)]
pub struct Solution {
    names: Vec<Arc<str>>,
    arrays: Vec<ArrayD<f64>>,
    flat: DVector<f64>,
}

impl Solution {
    pub(crate) fn from_flat(fields: &[Field], flat: DVector<f64>) -> Result<Self> {
        let total: usize = fields.iter().map(Field::size).sum();
        if flat.len() != total {
            return Err(ConfigError::ShapeMismatch {
                context: "solution vector".into(),
                expected: total,
                found: flat.len(),
            }
            .into());
        }

        let mut names = Vec::with_capacity(fields.len());
        let mut arrays = Vec::with_capacity(fields.len());
        let mut offset = 0;
        for field in fields {
            let values: Vec<f64> = flat.rows(offset, field.size()).iter().copied().collect();
            let array = ArrayD::from_shape_vec(IxDyn(field.shape()), values).map_err(|e| {
                ConfigError::InvalidField {
                    name: field.name().to_string(),
                    reason: e.to_string(),
                }
            })?;
            names.push(field.key());
            arrays.push(array);
            offset += field.size();
        }

        Ok(Self {
            names,
            arrays,
            flat,
        })
    }

    pub fn get(&self, field: &str) -> Option<&ArrayD<f64>> {
        self.position(field).map(|i| &self.arrays[i])
    }

    /// Values of one field as a flat vector, in the order its operators use.
    pub fn values(&self, field: &str) -> Option<DVector<f64>> {
        self.get(field)
            .map(|array| DVector::from_iterator(array.len(), array.iter().copied()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f64>)> {
        self.names.iter().map(|n| n.as_ref()).zip(self.arrays.iter())
    }

    /// The global solution vector, fields concatenated in model order.
    pub fn flat(&self) -> &DVector<f64> {
        &self.flat
    }

    pub fn len(&self) -> usize {
        self.flat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flat.is_empty()
    }

    fn position(&self, field: &str) -> Option<usize> {
        self.names.iter().position(|n| n.as_ref() == field)
    }
}
