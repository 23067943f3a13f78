use std::collections::HashSet;
use std::sync::Arc;

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::discretization::field::Field;
use crate::error::{ConfigError, Result};
use crate::models::solution::Solution;
use crate::numerics::SolverConfig;
use crate::numerics::assembly::{assemble_matrix, assemble_rhs, plan_rows};
use crate::numerics::solver::{LinearSolver, SolveStats};
use crate::numerics::timing::record_assembly;
use crate::physics::FieldLayout;
use crate::physics::bc::{BoundaryTable, BoundaryUpdate};
use crate::physics::equations::{EquationTable, EquationUpdate};
use crate::physics::table::Changes;

/// A set of fields plus the equation and boundary rows that close them.
///
/// Rows are pushed in through partial updates. The global matrix is only
/// rebuilt (and refactorized) after a batch changed a coefficient or a mask;
/// right-hand-side-only batches reuse both.
#[derive(Debug)]
pub struct Model {
    fields: Vec<Field>,
    layout: FieldLayout,
    config: SolverConfig,
    equations: EquationTable,
    boundaries: BoundaryTable,
    matrix: CsrMatrix<f64>,
    rhs: DVector<f64>,
    /// What changed since the last successful assembly.
    pending: Changes,
    solver: LinearSolver,
    stats: SolveStats,
}

impl Model {
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        Self::with_config(fields, SolverConfig::default())
    }

    pub fn with_config(fields: Vec<Field>, config: SolverConfig) -> Result<Self> {
        if fields.is_empty() {
            return Err(ConfigError::InvalidField {
                name: String::new(),
                reason: "a model needs at least one field".into(),
            }
            .into());
        }
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name()) {
                return Err(ConfigError::DuplicateName {
                    kind: "field",
                    name: field.name().to_string(),
                }
                .into());
            }
        }

        let layout = FieldLayout::new(&fields);
        let size = layout.total();
        if config.logging {
            println!(
                "Model: {} field(s), {} unknowns, backend {}",
                fields.len(),
                size,
                config.backend.name()
            );
        }

        Ok(Self {
            fields,
            layout,
            config,
            equations: EquationTable::default(),
            boundaries: BoundaryTable::default(),
            matrix: CsrMatrix::zeros(size, size),
            rhs: DVector::zeros(size),
            pending: Changes {
                matrix: true,
                rhs: true,
            },
            solver: LinearSolver::default(),
            stats: SolveStats::default(),
        })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| ConfigError::UnknownField(name.to_string()).into())
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    /// Number of unknowns, the sum of all field sizes.
    pub fn size(&self) -> usize {
        self.layout.total()
    }

    /// `(offset, size)` of a field inside the global vector.
    pub fn field_offset(&self, name: &str) -> Result<(usize, usize)> {
        self.layout
            .slot(name)
            .ok_or_else(|| ConfigError::UnknownField(name.to_string()).into())
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Swaps the solver configuration. A backend change drops the cached factorization.
    pub fn set_config(&mut self, config: SolverConfig) {
        if config.backend != self.config.backend {
            self.solver.invalidate();
        }
        self.config = config;
    }

    pub fn equations(&self) -> &EquationTable {
        &self.equations
    }

    pub fn boundaries(&self) -> &BoundaryTable {
        &self.boundaries
    }

    pub fn stats(&self) -> SolveStats {
        self.stats
    }

    /// Merges a batch of equation updates. The batch is validated as a whole;
    /// on error the table is left as it was.
    pub fn update_equations<I, L>(&mut self, updates: I) -> Result<()>
    where
        I: IntoIterator<Item = (L, EquationUpdate)>,
        L: Into<Arc<str>>,
    {
        let changes = self.equations.apply(updates, &self.layout)?;
        self.record(changes);
        Ok(())
    }

    /// Merges a batch of boundary updates, all or nothing.
    pub fn update_boundaries<I, L>(&mut self, updates: I) -> Result<()>
    where
        I: IntoIterator<Item = (L, BoundaryUpdate)>,
        L: Into<Arc<str>>,
    {
        let changes = self.boundaries.apply(updates, &self.layout)?;
        self.record(changes);
        Ok(())
    }

    pub fn clear_equations(&mut self) {
        self.equations.clear();
        self.record(Changes {
            matrix: true,
            rhs: true,
        });
    }

    pub fn clear_boundaries(&mut self) {
        self.boundaries.clear();
        self.record(Changes {
            matrix: true,
            rhs: true,
        });
    }

    /// Checks that every row is covered exactly once and returns the global system.
    pub fn assemble(&mut self) -> Result<(&CsrMatrix<f64>, &DVector<f64>)> {
        self.refresh()?;
        Ok((&self.matrix, &self.rhs))
    }

    pub fn solve(&mut self) -> Result<Solution> {
        self.refresh()?;
        if self.config.logging {
            println!(
                "Solving {} unknowns ({} nonzeros) with {}",
                self.size(),
                self.matrix.nnz(),
                self.config.backend.name()
            );
        }

        let result = self.solver.solve(&self.config, &self.matrix, &self.rhs)?;
        if result.refactorized {
            self.stats.factorizations += 1;
        }
        self.stats.solves += 1;
        self.stats.last_residual = Some(result.residual);
        self.stats.last_iterations = result.iterations;

        if self.config.logging {
            println!(
                "  residual {:.3e} after {} iteration(s)",
                result.residual, result.iterations
            );
        }
        Solution::from_flat(&self.fields, result.solution)
    }

    /// Flat vector of the right length for this model, e.g. to seed a history.
    pub fn solution_from_flat(&self, flat: DVector<f64>) -> Result<Solution> {
        Solution::from_flat(&self.fields, flat)
    }

    fn record(&mut self, changes: Changes) {
        if changes.matrix {
            self.solver.invalidate();
        }
        self.pending = self.pending.merge(changes);
    }

    fn refresh(&mut self) -> Result<()> {
        let size = self.size();
        let plan = plan_rows(size, &self.equations, &self.boundaries)?;

        if self.pending.matrix {
            self.matrix =
                record_assembly(|| assemble_matrix(size, &plan, &self.equations, &self.boundaries));
            self.solver.invalidate();
            self.stats.matrix_assemblies += 1;
        }
        // unchanged entries give back the same vector
        if self.pending.matrix || self.pending.rhs {
            self.rhs = record_assembly(|| assemble_rhs(&plan, &self.equations, &self.boundaries));
            self.stats.rhs_assemblies += 1;
        }
        self.pending = Changes::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::axis::Axis;
    use crate::discretization::field::Edge;
    use crate::error::{FdError, StructuralError};
    use approx::assert_relative_eq;

    fn rod(n: usize) -> Field {
        let x = Axis::new("x", 0.0, 1.0, n).unwrap();
        Field::new("T", vec![x], 2).unwrap()
    }

    fn linear_model() -> Model {
        let t = rod(5);
        let mut model = Model::new(vec![t.clone()]).unwrap();
        model
            .update_equations([("heat", EquationUpdate::new(t.derivative("x", 2, None).unwrap(), 0.0))])
            .unwrap();
        let left = BoundaryUpdate::dirichlet(&t, t.edge_mask("x", Edge::Start).unwrap(), 0.0);
        let right = BoundaryUpdate::dirichlet(&t, t.edge_mask("x", Edge::End).unwrap(), 10.0);
        model
            .update_boundaries([("left", left.unwrap()), ("right", right.unwrap())])
            .unwrap();
        model
    }

    #[test]
    fn rejects_empty_and_duplicate_fields() {
        assert!(Model::new(vec![]).unwrap_err().is_config());
        let err = Model::new(vec![rod(4), rod(5)]).unwrap_err();
        assert!(matches!(
            err,
            FdError::Config(ConfigError::DuplicateName { kind: "field", .. })
        ));
    }

    #[test]
    fn solves_linear_profile() {
        let mut model = linear_model();
        let solution = model.solve().unwrap();
        let t = solution.get("T").unwrap();
        for (i, expected) in [0.0, 2.5, 5.0, 7.5, 10.0].iter().enumerate() {
            assert_relative_eq!(t[[i]], *expected, epsilon = 1e-10);
        }
    }

    #[test]
    fn rhs_only_updates_reuse_matrix_and_factorization() {
        let mut model = linear_model();
        model.solve().unwrap();
        model
            .update_boundaries([("right", BoundaryUpdate::rhs(20.0))])
            .unwrap();
        let solution = model.solve().unwrap();

        let stats = model.stats();
        assert_eq!(stats.matrix_assemblies, 1);
        assert_eq!(stats.rhs_assemblies, 2);
        assert_eq!(stats.factorizations, 1);
        assert_eq!(stats.solves, 2);
        assert_relative_eq!(solution.get("T").unwrap()[[2]], 10.0, epsilon = 1e-10);
    }

    #[test]
    fn matrix_updates_trigger_refactorization() {
        let mut model = linear_model();
        model.solve().unwrap();
        let t = model.field("T").unwrap().clone();
        let scaled = t.derivative("x", 2, None).unwrap().scale(2.0);
        model
            .update_equations([("heat", EquationUpdate::matrix(scaled))])
            .unwrap();
        model.solve().unwrap();
        assert_eq!(model.stats().matrix_assemblies, 2);
        assert_eq!(model.stats().factorizations, 2);
    }

    #[test]
    fn structural_errors_surface_from_assemble() {
        let t = rod(5);
        let mut model = Model::new(vec![t.clone()]).unwrap();
        let partial = t.identity().select(&[0, 1, 2]).unwrap();
        model
            .update_equations([("partial", EquationUpdate::new(partial, 0.0))])
            .unwrap();
        let err = model.assemble().unwrap_err();
        assert_eq!(
            err,
            FdError::Structural(StructuralError::UncoveredRows {
                row: 3,
                uncovered: 2,
                unknowns: 5
            })
        );
    }

    #[test]
    fn clearing_forces_a_rebuild() {
        let mut model = linear_model();
        model.solve().unwrap();
        model.clear_equations();
        assert!(model.solve().unwrap_err().is_structural());
        assert!(model.equations().is_empty());
        assert_eq!(model.boundaries().len(), 2);

        model.clear_boundaries();
        assert!(model.boundaries().is_empty());
    }

    #[test]
    fn offsets_follow_field_order() {
        let a = rod(4);
        let y = Axis::new("y", 0.0, 1.0, 3).unwrap();
        let b = Field::new("S", vec![y], 2).unwrap();
        let model = Model::new(vec![a, b]).unwrap();
        assert_eq!(model.size(), 7);
        assert_eq!(model.field_offset("S").unwrap(), (4, 3));
        assert!(model.field_offset("Q").is_err());
    }
}
