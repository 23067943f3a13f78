use nalgebra::DVector;

use sfdm_rs::discretization::axis::Axis;
use sfdm_rs::discretization::field::{Edge, Field};
use sfdm_rs::error::{ConfigError, FdError, StructuralError};
use sfdm_rs::models::fd_model::Model;
use sfdm_rs::physics::bc::BoundaryUpdate;
use sfdm_rs::physics::equations::EquationUpdate;

fn setup_linear(n: usize) -> (Model, Field) {
    let x = Axis::new("x", 0.0, 1.0, n).unwrap();
    let u = Field::new("u", vec![x], 2).unwrap();
    let mut model = Model::new(vec![u.clone()]).unwrap();
    model
        .update_equations([("diffusion", EquationUpdate::new(u.derivative("x", 2, None).unwrap(), 0.0))])
        .unwrap();
    let left = BoundaryUpdate::dirichlet(&u, u.edge_mask("x", Edge::Start).unwrap(), 1.0);
    model.update_boundaries([("left", left.unwrap())]).unwrap();
    (model, u)
}

fn max_error(model: &mut Model, exact: impl Fn(f64) -> f64) -> f64 {
    let u = model.field("u").unwrap().clone();
    let solution = model.solve().unwrap();
    let numeric = solution.values("u").unwrap();
    let coords = u.meshgrid("x").unwrap();
    numeric
        .iter()
        .zip(coords.iter())
        .map(|(v, &x)| (v - exact(x)).abs())
        .fold(0.0, f64::max)
}

#[test]
fn verify_neumann() {
    println!("Test: Neumann BC (Fixed Flux)");
    let (mut model, u) = setup_linear(21);
    let right = BoundaryUpdate::neumann(&u, "x", u.edge_mask("x", Edge::End).unwrap(), 2.0);
    model.update_boundaries([("right", right.unwrap())]).unwrap();

    let max_err = max_error(&mut model, |x| 1.0 + 2.0 * x);
    println!("Max Absolute Error: {:.2e}", max_err);
    assert!(max_err < 1e-9);
}

#[test]
fn verify_robin() {
    println!("\nTest: Robin BC");
    // u(0) = 1, u + u' = 3 at x = 1  =>  u = 1 + x
    let (mut model, u) = setup_linear(21);
    let right = BoundaryUpdate::robin(&u, "x", u.edge_mask("x", Edge::End).unwrap(), 1.0, 1.0, 3.0);
    model.update_boundaries([("right", right.unwrap())]).unwrap();

    let max_err = max_error(&mut model, |x| 1.0 + x);
    println!("Max Absolute Error: {:.2e}", max_err);
    assert!(max_err < 1e-9);
}

#[test]
fn keep_leaves_entries_untouched() {
    let (mut model, u) = setup_linear(11);
    let right = BoundaryUpdate::dirichlet(&u, u.edge_mask("x", Edge::End).unwrap(), 5.0);
    model.update_boundaries([("right", right.unwrap())]).unwrap();
    model.solve().unwrap();

    let left_matrix = model.boundaries().matrix("left").unwrap().clone();
    let left_rhs = model.boundaries().rhs("left").unwrap().clone();
    let equation = model.equations().matrix("diffusion").unwrap().clone();

    model
        .update_boundaries([("left", BoundaryUpdate::default()), ("right", BoundaryUpdate::rhs(7.0))])
        .unwrap();
    let max_err = max_error(&mut model, |x| 1.0 + 6.0 * x);
    println!("Max Absolute Error: {:.2e}", max_err);
    assert!(max_err < 1e-10);

    assert_eq!(model.boundaries().matrix("left").unwrap(), &left_matrix);
    assert_eq!(model.boundaries().rhs("left").unwrap(), &left_rhs);
    assert_eq!(model.equations().matrix("diffusion").unwrap(), &equation);
    assert_eq!(model.boundaries().rhs("right").unwrap(), &DVector::from_element(1, 7.0));
    assert_eq!(model.stats().factorizations, 1);
}

#[test]
fn set_replaces_the_whole_slot() {
    let (mut model, u) = setup_linear(11);
    let right = BoundaryUpdate::dirichlet(&u, u.edge_mask("x", Edge::End).unwrap(), 5.0);
    model.update_boundaries([("right", right.unwrap())]).unwrap();
    model.solve().unwrap();

    let flux = u
        .derivative("x", 1, None)
        .unwrap()
        .select(u.edge_mask("x", Edge::End).unwrap().rows())
        .unwrap();
    model
        .update_boundaries([("right", BoundaryUpdate::matrix(flux))])
        .unwrap();
    // old rhs 5.0 now reads as a gradient
    let max_err = max_error(&mut model, |x| 1.0 + 5.0 * x);
    assert!(max_err < 1e-9);
    assert_eq!(model.stats().factorizations, 2);
}

#[test]
fn new_label_needs_every_slot() {
    let (mut model, _) = setup_linear(11);
    let err = model
        .update_boundaries([("right", BoundaryUpdate::rhs(1.0))])
        .unwrap_err();
    assert!(matches!(
        err,
        FdError::Config(ConfigError::UninitializedTerm { table: "boundary", .. })
    ));
    assert!(!model.boundaries().contains("right"));

    let err = model
        .update_equations([("source", EquationUpdate::rhs(1.0))])
        .unwrap_err();
    assert!(err.is_config());
}

#[test]
fn failed_batch_changes_nothing() {
    let (mut model, u) = setup_linear(11);
    let right = BoundaryUpdate::dirichlet(&u, u.edge_mask("x", Edge::End).unwrap(), 5.0);
    model.update_boundaries([("right", right.unwrap())]).unwrap();

    let batch = [
        ("right", BoundaryUpdate::rhs(9.0)),
        ("ghost", BoundaryUpdate::rhs(1.0)),
    ];
    assert!(model.update_boundaries(batch).is_err());
    assert_eq!(model.boundaries().rhs("right").unwrap()[0], 5.0);
    assert_eq!(model.boundaries().len(), 2);

    // a mask cannot move once registered
    let moved = BoundaryUpdate::dirichlet(&u, u.mask([9]).unwrap(), 5.0).unwrap();
    let err = model.update_boundaries([("right", moved)]).unwrap_err();
    assert!(matches!(err, FdError::Config(ConfigError::MaskChanged(_))));
}

#[test]
fn overlapping_boundaries_are_structural_errors() {
    let (mut model, u) = setup_linear(11);
    let right = BoundaryUpdate::dirichlet(&u, u.edge_mask("x", Edge::End).unwrap(), 5.0);
    let also_left = BoundaryUpdate::dirichlet(&u, u.mask([0]).unwrap(), 2.0);
    model
        .update_boundaries([("right", right.unwrap()), ("pin", also_left.unwrap())])
        .unwrap();

    match model.solve().unwrap_err() {
        FdError::Structural(StructuralError::ConflictingBoundaries { row, first, second }) => {
            assert_eq!(row, 0);
            assert_eq!((first.as_str(), second.as_str()), ("left", "pin"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn uncovered_rows_are_reported() {
    let (mut model, _) = setup_linear(11);
    model.clear_equations();
    let err = model.assemble().unwrap_err();
    assert!(matches!(
        err,
        FdError::Structural(StructuralError::UncoveredRows { row: 1, uncovered: 10, .. })
    ));
}
