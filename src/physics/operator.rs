use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::discretization::field::Field;
use crate::error::{ConfigError, Result};
use crate::physics::FieldLayout;

/// Sparse linear operator acting on one or more fields.
///
/// Each field the operator touches owns one column block of shape
/// `rows x field.size()`. Sums of operators on different fields keep both blocks,
/// which is how coupling terms between fields are expressed.
#[derive(Clone, Debug)]
pub struct Operator {
    rows: usize,
    blocks: BTreeMap<Arc<str>, Arc<CsrMatrix<f64>>>,
}

impl Operator {
    pub(crate) fn single(field: Arc<str>, matrix: Arc<CsrMatrix<f64>>) -> Self {
        let rows = matrix.nrows();
        let mut blocks = BTreeMap::new();
        blocks.insert(field, matrix);
        Self { rows, blocks }
    }

    /// Wraps a caller-built coefficient matrix acting on `field`.
    pub fn from_matrix(field: &Field, matrix: CsrMatrix<f64>) -> Result<Self> {
        if matrix.ncols() != field.size() {
            return Err(ConfigError::ShapeMismatch {
                context: format!("columns of a matrix acting on field '{}'", field.name()),
                expected: field.size(),
                found: matrix.ncols(),
            }
            .into());
        }
        Ok(Self::single(field.key(), Arc::new(matrix)))
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(|k| k.as_ref())
    }

    pub fn block(&self, field: &str) -> Option<&CsrMatrix<f64>> {
        self.blocks.get(field).map(|m| m.as_ref())
    }

    pub fn nnz(&self) -> usize {
        self.blocks.values().map(|m| m.nnz()).sum()
    }

    pub fn add(&self, other: &Operator) -> Result<Operator> {
        self.combine(other, 1.0)
    }

    pub fn sub(&self, other: &Operator) -> Result<Operator> {
        self.combine(other, -1.0)
    }

    fn combine(&self, other: &Operator, sign: f64) -> Result<Operator> {
        self.check_rows(other.rows, "rows of the other operand")?;

        let mut blocks = self.blocks.clone();
        for (field, rhs) in &other.blocks {
            let merged = match blocks.get(field) {
                Some(lhs) => {
                    if lhs.ncols() != rhs.ncols() {
                        return Err(ConfigError::ShapeMismatch {
                            context: format!("columns of the '{field}' block"),
                            expected: lhs.ncols(),
                            found: rhs.ncols(),
                        }
                        .into());
                    }
                    if sign > 0.0 {
                        lhs.as_ref() + rhs.as_ref()
                    } else {
                        lhs.as_ref() - rhs.as_ref()
                    }
                }
                None if sign > 0.0 => rhs.as_ref().clone(),
                None => rhs.as_ref() * -1.0,
            };
            blocks.insert(field.clone(), Arc::new(merged));
        }

        Ok(Operator {
            rows: self.rows,
            blocks,
        })
    }

    pub fn scale(&self, factor: f64) -> Operator {
        let blocks = self
            .blocks
            .iter()
            .map(|(k, m)| (k.clone(), Arc::new(m.as_ref() * factor)))
            .collect();
        Operator {
            rows: self.rows,
            blocks,
        }
    }

    pub fn neg(&self) -> Operator {
        self.scale(-1.0)
    }

    /// Multiplies row `i` by `factors[i]`, e.g. a spatially varying coefficient.
    pub fn scale_rows(&self, factors: &DVector<f64>) -> Result<Operator> {
        self.check_rows(factors.len(), "length of the row factors")?;

        let blocks = self
            .blocks
            .iter()
            .map(|(k, m)| {
                let mut scaled = m.as_ref().clone();
                for (mut row, &f) in scaled.row_iter_mut().zip(factors.iter()) {
                    row.values_mut().iter_mut().for_each(|v| *v *= f);
                }
                (k.clone(), Arc::new(scaled))
            })
            .collect();

        Ok(Operator {
            rows: self.rows,
            blocks,
        })
    }

    /// Applies `self` after `inner`: the product `self * inner`.
    ///
    /// `self` must act on a single field whose size equals the row count of `inner`.
    pub fn compose(&self, inner: &Operator) -> Result<Operator> {
        let mut outer = self.blocks.values();
        let (Some(outer), None) = (outer.next(), outer.next()) else {
            return Err(ConfigError::ShapeMismatch {
                context: "field blocks of the outer operand of a composition".into(),
                expected: 1,
                found: self.blocks.len(),
            }
            .into());
        };
        if outer.ncols() != inner.rows {
            return Err(ConfigError::ShapeMismatch {
                context: "rows of the inner operand of a composition".into(),
                expected: outer.ncols(),
                found: inner.rows,
            }
            .into());
        }

        let blocks = inner
            .blocks
            .iter()
            .map(|(k, m)| (k.clone(), Arc::new(outer.as_ref() * m.as_ref())))
            .collect();

        Ok(Operator {
            rows: self.rows,
            blocks,
        })
    }

    /// Keeps only the given rows, in the given order.
    pub fn select(&self, rows: &[usize]) -> Result<Operator> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.rows) {
            return Err(ConfigError::ShapeMismatch {
                context: format!("selected row {bad} of an operator"),
                expected: self.rows,
                found: bad + 1,
            }
            .into());
        }

        let blocks = self
            .blocks
            .iter()
            .map(|(k, m)| (k.clone(), Arc::new(select_rows(m, rows))))
            .collect();

        Ok(Operator {
            rows: rows.len(),
            blocks,
        })
    }

    /// Places every block at its field's column offset in the model-wide layout.
    pub(crate) fn widen(&self, layout: &FieldLayout) -> Result<CsrMatrix<f64>> {
        let mut coo = CooMatrix::new(self.rows, layout.total());
        for (field, block) in &self.blocks {
            let (offset, size) = layout
                .slot(field)
                .ok_or_else(|| ConfigError::UnknownField(field.to_string()))?;
            if block.ncols() != size {
                return Err(ConfigError::ShapeMismatch {
                    context: format!("columns of the '{field}' block"),
                    expected: size,
                    found: block.ncols(),
                }
                .into());
            }
            for (i, j, &v) in block.triplet_iter() {
                coo.push(i, offset + j, v);
            }
        }
        Ok(CsrMatrix::from(&coo))
    }

    /// Offset of the single field this operator covers row for row, if any.
    pub(crate) fn home_row(&self, layout: &FieldLayout) -> Option<usize> {
        let mut fields = self.blocks.keys();
        match (fields.next(), fields.next()) {
            (Some(field), None) => layout
                .slot(field)
                .filter(|&(_, size)| size == self.rows)
                .map(|(offset, _)| offset),
            _ => None,
        }
    }

    fn check_rows(&self, found: usize, context: &str) -> Result<()> {
        if found != self.rows {
            return Err(ConfigError::ShapeMismatch {
                context: context.to_string(),
                expected: self.rows,
                found,
            }
            .into());
        }
        Ok(())
    }
}

fn select_rows(matrix: &CsrMatrix<f64>, rows: &[usize]) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(rows.len(), matrix.ncols());
    for (new_row, &old_row) in rows.iter().enumerate() {
        let row = matrix.row(old_row);
        for (&j, &v) in row.col_indices().iter().zip(row.values()) {
            coo.push(new_row, j, v);
        }
    }
    CsrMatrix::from(&coo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::axis::Axis;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn field(name: &str, n: usize) -> Field {
        let x = Axis::new("x", 0.0, 1.0, n).unwrap();
        Field::new(name, vec![x], 2).unwrap()
    }

    fn dense(op: &Operator, field: &str) -> DMatrix<f64> {
        DMatrix::from(op.block(field).unwrap())
    }

    #[test]
    fn add_and_sub_merge_blocks() {
        let a = field("a", 4);
        let b = field("b", 3);
        let coupled = a.identity().select(&[3]).unwrap();
        let coupled = coupled.sub(&b.identity().select(&[0]).unwrap()).unwrap();

        assert_eq!(coupled.rows(), 1);
        assert_eq!(coupled.fields().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(dense(&coupled, "a")[(0, 3)], 1.0);
        assert_eq!(dense(&coupled, "b")[(0, 0)], -1.0);

        let twice = a.identity().add(&a.identity()).unwrap();
        assert_eq!(dense(&twice, "a"), DMatrix::identity(4, 4) * 2.0);
    }

    #[test]
    fn row_count_mismatch_is_rejected() {
        let a = field("a", 4);
        let top = a.identity().select(&[0, 1]).unwrap();
        assert!(top.add(&a.identity()).is_err());
        assert!(a.identity().select(&[4]).is_err());
    }

    #[test]
    fn scale_rows_applies_per_row_factors() {
        let a = field("a", 3);
        let k = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let op = a.identity().scale_rows(&k).unwrap();
        assert_eq!(dense(&op, "a"), DMatrix::from_diagonal(&k));
        assert!(a.identity().scale_rows(&DVector::zeros(2)).is_err());
        assert_eq!(dense(&a.identity().neg(), "a")[(1, 1)], -1.0);
    }

    #[test]
    fn compose_multiplies_blocks() {
        let a = field("a", 7);
        let dx = a.derivative("x", 1, None).unwrap();
        let dxx = dx.compose(&dx).unwrap();
        let x = a.meshgrid("x").unwrap();
        let squared = x.map(|v| v * v);
        let second = DMatrix::from(dxx.block("a").unwrap()) * squared;
        // d/dx(d/dx x^2) = 2 away from the edges
        for i in 2..5 {
            assert_relative_eq!(second[i], 2.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn widen_places_blocks_at_offsets() {
        let a = field("a", 2);
        let b = field("b", 3);
        let layout = FieldLayout::new(&[a.clone(), b.clone()]);
        let op = a.identity().select(&[1]).unwrap();
        let op = op.add(&b.identity().select(&[2]).unwrap().scale(4.0)).unwrap();
        let wide = DMatrix::from(&op.widen(&layout).unwrap());
        assert_eq!(wide.shape(), (1, 5));
        assert_eq!(wide[(0, 1)], 1.0);
        assert_eq!(wide[(0, 4)], 4.0);

        let stranger = field("c", 2);
        assert!(stranger.identity().widen(&layout).is_err());
    }
}
