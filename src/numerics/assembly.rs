use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::error::StructuralError;
use crate::physics::bc::BoundaryTable;
use crate::physics::equations::EquationTable;

/// Which stored row ends up in a global row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RowSource {
    /// `(entry index, local row)` of an equation.
    Equation(usize, usize),
    /// `(entry index, mask position)` of a boundary.
    Boundary(usize, usize),
}

/// Maps every global row to its source and rejects systems that are not square
/// and fully covered. Runs before any numeric work.
pub(crate) fn plan_rows(
    size: usize,
    equations: &EquationTable,
    boundaries: &BoundaryTable,
) -> Result<Vec<RowSource>, StructuralError> {
    let equation_rows = equations.total_rows();
    if equation_rows > size {
        return Err(StructuralError::Overdetermined {
            equations: equation_rows,
            unknowns: size,
        });
    }

    let mut plan: Vec<Option<RowSource>> = vec![None; size];
    let mut governed_by: Vec<Option<&str>> = vec![None; size];
    // whole-field equations go to their field's block first
    for (e, (label, entry)) in equations.entries().enumerate() {
        let Some(start) = entry.home else { continue };
        if let Some(first) = governed_by[start] {
            return Err(StructuralError::ConflictingEquations {
                row: start,
                first: first.to_string(),
                second: label.to_string(),
            });
        }
        for local in 0..entry.matrix.nrows() {
            plan[start + local] = Some(RowSource::Equation(e, local));
            governed_by[start + local] = Some(label);
        }
    }
    // coupling and partial equations fill the free rows in registration order
    let mut free = (0..size).filter(|&row| plan[row].is_none()).collect::<Vec<_>>().into_iter();
    for (e, (_, entry)) in equations.entries().enumerate() {
        if entry.home.is_some() {
            continue;
        }
        for local in 0..entry.matrix.nrows() {
            if let Some(row) = free.next() {
                plan[row] = Some(RowSource::Equation(e, local));
            }
        }
    }

    let mut owner: Vec<Option<usize>> = vec![None; size];
    let mut labels = Vec::with_capacity(boundaries.len());
    for (b, (label, entry)) in boundaries.entries().enumerate() {
        labels.push(label);
        for (k, &row) in entry.rows.iter().enumerate() {
            if let Some(first) = owner[row] {
                return Err(StructuralError::ConflictingBoundaries {
                    row,
                    first: labels[first].to_string(),
                    second: label.to_string(),
                });
            }
            owner[row] = Some(b);
            plan[row] = Some(RowSource::Boundary(b, k));
        }
    }

    let uncovered: Vec<usize> = plan
        .iter()
        .enumerate()
        .filter(|(_, source)| source.is_none())
        .map(|(row, _)| row)
        .collect();
    if let Some(&row) = uncovered.first() {
        return Err(StructuralError::UncoveredRows {
            row,
            uncovered: uncovered.len(),
            unknowns: size,
        });
    }

    Ok(plan.into_iter().flatten().collect())
}

/// Global matrix built from a row plan: equation rows, then boundary rows on top.
pub(crate) fn assemble_matrix(
    size: usize,
    plan: &[RowSource],
    equations: &EquationTable,
    boundaries: &BoundaryTable,
) -> CsrMatrix<f64> {
    let eqs: Vec<_> = equations.entries().map(|(_, e)| e.matrix.as_ref()).collect();
    let bcs: Vec<_> = boundaries.entries().map(|(_, e)| e.matrix.as_ref()).collect();

    let mut coo = CooMatrix::new(size, size);
    for (global, source) in plan.iter().enumerate() {
        let row = match *source {
            RowSource::Equation(e, local) => eqs[e].row(local),
            RowSource::Boundary(b, k) => bcs[b].row(k),
        };
        for (&col, &value) in row.col_indices().iter().zip(row.values()) {
            coo.push(global, col, value);
        }
    }
    CsrMatrix::from(&coo)
}

pub(crate) fn assemble_rhs(
    plan: &[RowSource],
    equations: &EquationTable,
    boundaries: &BoundaryTable,
) -> DVector<f64> {
    let eqs: Vec<_> = equations.entries().map(|(_, e)| &e.rhs).collect();
    let bcs: Vec<_> = boundaries.entries().map(|(_, e)| &e.rhs).collect();

    DVector::from_iterator(
        plan.len(),
        plan.iter().map(|source| match *source {
            RowSource::Equation(e, local) => eqs[e][local],
            RowSource::Boundary(b, k) => bcs[b][k],
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::axis::Axis;
    use crate::discretization::field::{Edge, Field};
    use crate::physics::FieldLayout;
    use crate::physics::bc::BoundaryUpdate;
    use crate::physics::equations::EquationUpdate;
    use nalgebra::DMatrix;

    fn setup() -> (Field, FieldLayout, EquationTable, BoundaryTable) {
        let x = Axis::new("x", 0.0, 1.0, 5).unwrap();
        let t = Field::new("T", vec![x], 2).unwrap();
        let layout = FieldLayout::new(&[t.clone()]);
        let mut eqs = EquationTable::default();
        eqs.apply(
            [("heat", EquationUpdate::new(t.derivative("x", 2, None).unwrap(), 0.0))],
            &layout,
        )
        .unwrap();
        (t, layout, eqs, BoundaryTable::default())
    }

    #[test]
    fn boundaries_override_equation_rows() {
        let (t, layout, eqs, mut bcs) = setup();
        let left = BoundaryUpdate::dirichlet(&t, t.edge_mask("x", Edge::Start).unwrap(), 1.0);
        let right = BoundaryUpdate::dirichlet(&t, t.edge_mask("x", Edge::End).unwrap(), 3.0);
        bcs.apply([("left", left.unwrap()), ("right", right.unwrap())], &layout)
            .unwrap();

        let plan = plan_rows(5, &eqs, &bcs).unwrap();
        assert_eq!(plan[0], RowSource::Boundary(0, 0));
        assert_eq!(plan[2], RowSource::Equation(0, 2));

        let a = DMatrix::from(&assemble_matrix(5, &plan, &eqs, &bcs));
        let b = assemble_rhs(&plan, &eqs, &bcs);
        assert_eq!(a.row(0).iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 0.0, 0.0, 0.0]);
        approx::assert_relative_eq!(a[(2, 2)], -32.0, epsilon = 1e-9);
        assert_eq!(b.as_slice(), &[1.0, 0.0, 0.0, 0.0, 3.0]);
    }

    #[test]
    fn uncovered_rows_are_reported() {
        let (t, layout, _, mut bcs) = setup();
        let eqs = EquationTable::default();
        let left = BoundaryUpdate::dirichlet(&t, t.edge_mask("x", Edge::Start).unwrap(), 0.0);
        bcs.apply([("left", left.unwrap())], &layout).unwrap();

        let err = plan_rows(5, &eqs, &bcs).unwrap_err();
        assert_eq!(
            err,
            StructuralError::UncoveredRows {
                row: 1,
                uncovered: 4,
                unknowns: 5
            }
        );
    }

    #[test]
    fn conflicting_boundaries_name_both_labels() {
        let (t, layout, eqs, mut bcs) = setup();
        let left = BoundaryUpdate::dirichlet(&t, t.mask([0]).unwrap(), 0.0).unwrap();
        let both = BoundaryUpdate::dirichlet(&t, t.mask([0, 4]).unwrap(), 0.0).unwrap();
        bcs.apply([("left", left), ("ends", both)], &layout).unwrap();

        match plan_rows(5, &eqs, &bcs).unwrap_err() {
            StructuralError::ConflictingBoundaries { row, first, second } => {
                assert_eq!((row, first.as_str(), second.as_str()), (0, "left", "ends"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn too_many_equation_rows() {
        let (t, layout, mut eqs, bcs) = setup();
        let extra = EquationUpdate::new(t.identity().select(&[0]).unwrap(), 0.0);
        eqs.apply([("extra", extra)], &layout).unwrap();
        assert!(matches!(
            plan_rows(5, &eqs, &bcs),
            Err(StructuralError::Overdetermined { equations: 6, unknowns: 5 })
        ));
    }

    fn two_fields() -> (Field, Field, FieldLayout) {
        let a = Field::new("A", vec![Axis::new("x", 0.0, 1.0, 5).unwrap()], 2).unwrap();
        let b = Field::new("B", vec![Axis::new("x", 0.0, 1.0, 4).unwrap()], 2).unwrap();
        let layout = FieldLayout::new(&[a.clone(), b.clone()]);
        (a, b, layout)
    }

    #[test]
    fn whole_field_equations_land_in_their_field_block() {
        let (a, b, layout) = two_fields();
        let mut eqs = EquationTable::default();
        // registered in reverse field order, plus a coupling row
        let coupling = a
            .identity()
            .select(&[4])
            .unwrap()
            .sub(&b.identity().select(&[0]).unwrap())
            .unwrap();
        eqs.apply(
            [
                ("eb", EquationUpdate::new(b.derivative("x", 2, None).unwrap(), 0.0)),
                ("a_rows", EquationUpdate::new(a.identity().select(&[0, 1, 2, 3]).unwrap(), 0.0)),
                ("link", EquationUpdate::new(coupling, 0.0)),
            ],
            &layout,
        )
        .unwrap();

        let plan = plan_rows(9, &eqs, &BoundaryTable::default()).unwrap();
        assert_eq!(plan[5], RowSource::Equation(0, 0));
        assert_eq!(plan[8], RowSource::Equation(0, 3));
        assert_eq!(plan[0], RowSource::Equation(1, 0));
        assert_eq!(plan[4], RowSource::Equation(2, 0));
    }

    #[test]
    fn two_equations_on_one_field_conflict() {
        let a = Field::new("A", vec![Axis::new("x", 0.0, 1.0, 5).unwrap()], 2).unwrap();
        let b = Field::new("B", vec![Axis::new("x", 0.0, 1.0, 5).unwrap()], 2).unwrap();
        let layout = FieldLayout::new(&[a.clone(), b]);
        let mut eqs = EquationTable::default();
        eqs.apply(
            [
                ("first", EquationUpdate::new(a.identity(), 0.0)),
                ("second", EquationUpdate::new(a.identity().scale(2.0), 0.0)),
            ],
            &layout,
        )
        .unwrap();
        match plan_rows(10, &eqs, &BoundaryTable::default()).unwrap_err() {
            StructuralError::ConflictingEquations { row, first, second } => {
                assert_eq!((row, first.as_str(), second.as_str()), (0, "first", "second"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
