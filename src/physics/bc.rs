use std::collections::HashSet;
use std::sync::Arc;

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::discretization::field::Field;
use crate::error::{ConfigError, Result};
use crate::physics::operator::Operator;
use crate::physics::table::{Changes, Table};
use crate::physics::{FieldLayout, Rhs, Update};

/// Rows of a single field, by local flat index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowMask {
    field: Arc<str>,
    rows: Vec<usize>,
}

impl RowMask {
    pub(crate) fn new(field: Arc<str>, size: usize, rows: Vec<usize>) -> Result<Self> {
        let invalid = |reason: String| ConfigError::InvalidMask {
            field: field.to_string(),
            reason,
        };

        if rows.is_empty() {
            return Err(invalid("mask selects no rows".into()).into());
        }
        let mut seen = HashSet::with_capacity(rows.len());
        for &row in &rows {
            if row >= size {
                return Err(invalid(format!("row {row} is outside a field of {size} points")).into());
            }
            if !seen.insert(row) {
                return Err(invalid(format!("row {row} is selected twice")).into());
            }
        }
        Ok(Self { field, rows })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn global_rows(&self, layout: &FieldLayout) -> Result<Vec<usize>> {
        let (offset, size) = layout
            .slot(&self.field)
            .ok_or_else(|| ConfigError::UnknownField(self.field.to_string()))?;
        if let Some(&bad) = self.rows.iter().find(|&&r| r >= size) {
            return Err(ConfigError::InvalidMask {
                field: self.field.to_string(),
                reason: format!("row {bad} is outside the model's field of {size} points"),
            }
            .into());
        }
        Ok(self.rows.iter().map(|r| offset + r).collect())
    }
}

/// Partial update of one boundary constraint: `matrix * u = rhs` on the masked rows.
#[derive(Clone, Debug, Default)]
pub struct BoundaryUpdate {
    pub mask: Update<RowMask>,
    pub matrix: Update<Operator>,
    pub rhs: Update<Rhs>,
}

impl BoundaryUpdate {
    pub fn new(mask: RowMask, matrix: Operator, rhs: impl Into<Rhs>) -> Self {
        Self {
            mask: Update::Set(mask),
            matrix: Update::Set(matrix),
            rhs: Update::Set(rhs.into()),
        }
    }

    /// Fixed value: `u = value` on the masked rows.
    pub fn dirichlet(field: &Field, mask: RowMask, value: impl Into<Rhs>) -> Result<Self> {
        let matrix = field.identity().select(mask.rows())?;
        Ok(Self::new(mask, matrix, value))
    }

    /// Fixed gradient along `axis`: `du/daxis = flux` on the masked rows.
    pub fn neumann(field: &Field, axis: &str, mask: RowMask, flux: impl Into<Rhs>) -> Result<Self> {
        let matrix = field.derivative(axis, 1, None)?.select(mask.rows())?;
        Ok(Self::new(mask, matrix, flux))
    }

    /// Mixed condition `alpha * u + beta * du/daxis = gamma` on the masked rows.
    pub fn robin(
        field: &Field,
        axis: &str,
        mask: RowMask,
        alpha: f64,
        beta: f64,
        gamma: impl Into<Rhs>,
    ) -> Result<Self> {
        let value = field.identity().scale(alpha);
        let gradient = field.derivative(axis, 1, None)?.scale(beta);
        let matrix = value.add(&gradient)?.select(mask.rows())?;
        Ok(Self::new(mask, matrix, gamma))
    }

    /// Replaces the coefficients, keeps mask and right-hand side.
    pub fn matrix(matrix: Operator) -> Self {
        Self {
            matrix: Update::Set(matrix),
            ..Self::default()
        }
    }

    /// Replaces the right-hand side only.
    pub fn rhs(rhs: impl Into<Rhs>) -> Self {
        Self {
            rhs: Update::Set(rhs.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct BoundaryEntry {
    pub mask: RowMask,
    /// Global rows overwritten by this entry, parallel to `mask.rows()`.
    pub rows: Vec<usize>,
    pub matrix: Arc<CsrMatrix<f64>>,
    pub rhs: DVector<f64>,
}

/// Boundary constraints that overwrite equation rows selected by their masks.
#[derive(Clone, Debug, Default)]
pub struct BoundaryTable {
    table: Table<BoundaryEntry>,
}

impl BoundaryTable {
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, label: &str) -> bool {
        self.table.get(label).is_some()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.table.iter().map(|(label, _)| label)
    }

    pub fn mask(&self, label: &str) -> Option<&RowMask> {
        self.table.get(label).map(|e| &e.mask)
    }

    pub fn matrix(&self, label: &str) -> Option<&CsrMatrix<f64>> {
        self.table.get(label).map(|e| e.matrix.as_ref())
    }

    pub fn rhs(&self, label: &str) -> Option<&DVector<f64>> {
        self.table.get(label).map(|e| &e.rhs)
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&str, &BoundaryEntry)> {
        self.table.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.table.clear();
    }

    pub(crate) fn apply<I, L>(&mut self, updates: I, layout: &FieldLayout) -> Result<Changes>
    where
        I: IntoIterator<Item = (L, BoundaryUpdate)>,
        L: Into<Arc<str>>,
    {
        let mut staged = self.table.stage();
        let mut changes = Changes::default();

        for (label, update) in updates {
            let label: Arc<str> = label.into();
            let existing = staged.current(&label);
            let uninitialized = |slot| ConfigError::UninitializedTerm {
                table: "boundary",
                label: label.to_string(),
                slot,
            };

            let (mask, rows) = match (update.mask, existing) {
                (Update::Set(mask), Some(prev)) if mask != prev.mask => {
                    return Err(ConfigError::MaskChanged(label.to_string()).into());
                }
                (_, Some(prev)) => (prev.mask.clone(), prev.rows.clone()),
                (Update::Set(mask), None) => {
                    let rows = mask.global_rows(layout)?;
                    changes.matrix = true;
                    (mask, rows)
                }
                (Update::Keep, None) => return Err(uninitialized("mask").into()),
            };

            let matrix = match update.matrix {
                Update::Set(op) => {
                    let wide = op.widen(layout)?;
                    if wide.nrows() != mask.len() {
                        return Err(ConfigError::ShapeMismatch {
                            context: format!("rows of boundary '{label}' against its mask"),
                            expected: mask.len(),
                            found: wide.nrows(),
                        }
                        .into());
                    }
                    changes.matrix = true;
                    Arc::new(wide)
                }
                Update::Keep => existing
                    .map(|e| e.matrix.clone())
                    .ok_or_else(|| uninitialized("matrix"))?,
            };

            let rhs = match update.rhs {
                Update::Set(rhs) => {
                    changes.rhs = true;
                    rhs.resolve(mask.len(), &label)?
                }
                Update::Keep => existing
                    .map(|e| e.rhs.clone())
                    .ok_or_else(|| uninitialized("rhs"))?,
            };

            staged.put(
                label,
                BoundaryEntry {
                    mask,
                    rows,
                    matrix,
                    rhs,
                },
            );
        }

        let pending = staged.into_pending();
        self.table.commit(pending);
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::axis::Axis;
    use crate::discretization::field::Edge;

    fn setup() -> (Field, Field, FieldLayout) {
        let x = Axis::new("x", 0.0, 1.0, 5).unwrap();
        let a = Field::new("a", vec![x.clone()], 2).unwrap();
        let b = Field::new("b", vec![x], 2).unwrap();
        let layout = FieldLayout::new(&[a.clone(), b.clone()]);
        (a, b, layout)
    }

    #[test]
    fn masks_map_to_global_rows() {
        let (_, b, layout) = setup();
        let mut table = BoundaryTable::default();
        let mask = b.edge_mask("x", Edge::End).unwrap();
        let update = BoundaryUpdate::dirichlet(&b, mask, 2.0).unwrap();
        table.apply([("right", update)], &layout).unwrap();

        let (_, entry) = table.entries().next().unwrap();
        assert_eq!(entry.rows, vec![9]);
        assert_eq!(entry.matrix.ncols(), 10);
    }

    #[test]
    fn mask_is_fixed_after_registration() {
        let (a, _, layout) = setup();
        let mut table = BoundaryTable::default();
        let left = a.edge_mask("x", Edge::Start).unwrap();
        let update = BoundaryUpdate::dirichlet(&a, left.clone(), 0.0).unwrap();
        table.apply([("left", update)], &layout).unwrap();

        // identical mask is accepted as a no-op
        let same = BoundaryUpdate {
            mask: Update::Set(left),
            ..BoundaryUpdate::rhs(1.0)
        };
        let changes = table.apply([("left", same)], &layout).unwrap();
        assert!(!changes.matrix && changes.rhs);

        let moved = BoundaryUpdate::dirichlet(&a, a.mask([1]).unwrap(), 0.0).unwrap();
        let err = table.apply([("left", moved)], &layout).unwrap_err();
        assert!(matches!(err, crate::error::FdError::Config(ConfigError::MaskChanged(_))));
        assert_eq!(table.rhs("left").unwrap()[0], 1.0);
    }

    #[test]
    fn matrix_rows_must_match_mask() {
        let (a, _, layout) = setup();
        let mut table = BoundaryTable::default();
        let mask = a.mask([0, 4]).unwrap();
        let wrong = a.identity().select(&[0]).unwrap();
        assert!(table.apply([("ends", BoundaryUpdate::new(mask, wrong, 0.0))], &layout).is_err());
        assert!(table.apply([("ends", BoundaryUpdate::rhs(0.0))], &layout).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn robin_combines_value_and_gradient() {
        let (a, _, _) = setup();
        let mask = a.edge_mask("x", Edge::End).unwrap();
        let update = BoundaryUpdate::robin(&a, "x", mask, 2.0, 1.0, 0.0).unwrap();
        let op = update.matrix.as_set().unwrap();
        let row = nalgebra::DMatrix::from(op.block("a").unwrap());
        // backward first derivative on h = 0.25: (u2 - 4 u3 + 3 u4) / (2h)
        approx::assert_relative_eq!(row[(0, 4)], 2.0 + 6.0, epsilon = 1e-9);
        approx::assert_relative_eq!(row[(0, 2)], 2.0, epsilon = 1e-9);
    }
}
