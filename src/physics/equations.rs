use std::sync::Arc;

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::error::{ConfigError, Result};
use crate::physics::operator::Operator;
use crate::physics::table::{Changes, Table};
use crate::physics::{FieldLayout, Rhs, Update};

/// Partial update of one governing equation.
#[derive(Clone, Debug, Default)]
pub struct EquationUpdate {
    pub matrix: Update<Operator>,
    pub rhs: Update<Rhs>,
}

impl EquationUpdate {
    pub fn new(matrix: Operator, rhs: impl Into<Rhs>) -> Self {
        Self {
            matrix: Update::Set(matrix),
            rhs: Update::Set(rhs.into()),
        }
    }

    /// Replaces the coefficients, keeps the stored right-hand side.
    pub fn matrix(matrix: Operator) -> Self {
        Self {
            matrix: Update::Set(matrix),
            rhs: Update::Keep,
        }
    }

    /// Replaces the right-hand side, keeps the stored coefficients.
    pub fn rhs(rhs: impl Into<Rhs>) -> Self {
        Self {
            matrix: Update::Keep,
            rhs: Update::Set(rhs.into()),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct EquationEntry {
    pub matrix: Arc<CsrMatrix<f64>>,
    pub rhs: DVector<f64>,
    /// First global row of the field this equation governs, when it covers
    /// exactly one field's rows.
    pub home: Option<usize>,
}

/// Governing equations. An equation covering one whole field sits in that field's
/// row block; the rest fill the remaining rows in registration order.
#[derive(Clone, Debug, Default)]
pub struct EquationTable {
    table: Table<EquationEntry>,
}

impl EquationTable {
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

    /// Stored coefficients, already widened to the model's columns.
    pub fn matrix(&self, label: &str) -> Option<&CsrMatrix<f64>> {
        self.table.get(label).map(|e| e.matrix.as_ref())
    }

    pub fn rhs(&self, label: &str) -> Option<&DVector<f64>> {
        self.table.get(label).map(|e| &e.rhs)
    }

    pub fn total_rows(&self) -> usize {
        self.table.iter().map(|(_, e)| e.matrix.nrows()).sum()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&str, &EquationEntry)> {
        self.table.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.table.clear();
    }

    /// Validates the whole batch, then commits it. On error nothing changes.
    pub(crate) fn apply<I, L>(&mut self, updates: I, layout: &FieldLayout) -> Result<Changes>
    where
        I: IntoIterator<Item = (L, EquationUpdate)>,
        L: Into<Arc<str>>,
    {
        let mut staged = self.table.stage();
        let mut changes = Changes::default();

        for (label, update) in updates {
            let label: Arc<str> = label.into();
            let existing = staged.current(&label);
            let uninitialized = |slot| ConfigError::UninitializedTerm {
                table: "equation",
                label: label.to_string(),
                slot,
            };

            let (matrix, home) = match update.matrix {
                Update::Set(op) => {
                    let wide = op.widen(layout)?;
                    if let Some(prev) = existing {
                        if prev.matrix.nrows() != wide.nrows() {
                            return Err(ConfigError::RowCountChanged {
                                table: "equation",
                                label: label.to_string(),
                                expected: prev.matrix.nrows(),
                                found: wide.nrows(),
                            }
                            .into());
                        }
                    }
                    changes.matrix = true;
                    (Arc::new(wide), op.home_row(layout))
                }
                Update::Keep => existing
                    .map(|e| (e.matrix.clone(), e.home))
                    .ok_or_else(|| uninitialized("matrix"))?,
            };

            let rhs = match update.rhs {
                Update::Set(rhs) => {
                    changes.rhs = true;
                    rhs.resolve(matrix.nrows(), &label)?
                }
                Update::Keep => existing
                    .map(|e| e.rhs.clone())
                    .ok_or_else(|| uninitialized("rhs"))?,
            };

            staged.put(label, EquationEntry { matrix, rhs, home });
        }

        let pending = staged.into_pending();
        self.table.commit(pending);
        Ok(changes)
    }
}
