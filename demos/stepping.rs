use std::f64::consts::PI;

use sfdm_rs::discretization::axis::Axis;
use sfdm_rs::discretization::field::{Edge, Field};
use sfdm_rs::models::fd_model::Model;
use sfdm_rs::numerics::SolverConfig;
use sfdm_rs::numerics::transient::{History, TransientSolver};
use sfdm_rs::physics::bc::BoundaryUpdate;
use sfdm_rs::physics::equations::EquationUpdate;
use sfdm_rs::processing::summary::SolveSummary;

// Rod heated at x = 1 by an oscillating temperature, held at 0 at x = 0.
// u_t = alpha u_xx, BDF2 in time.
fn main() -> sfdm_rs::Result<()> {
    let num_points = 201;
    let alpha = 0.1;
    let dt = 1e-3;
    let t_end = 2.0;
    let period = 0.5;
    let logging = true;

    println!("Oscillating Boundary Heat Simulation");
    println!("====================================");
    println!("Points:    {}", num_points);
    println!("Timestep:  {:.1e}", dt);
    println!("Period:    {:.3}", period);
    println!();

    let x = Axis::new("x", 0.0, 1.0, num_points)?;
    let u = Field::new("u", vec![x], 4)?.with_timestep(dt)?;

    let history = u.time_history(1, Some(2))?;
    let operator = u
        .time_current(1, Some(2))?
        .sub(&u.derivative("x", 2, None)?.scale(alpha))?;

    let mut histories = vec![History::seeded(&history, u.coords("x")?.map(|_| 0.0))?];
    let config = SolverConfig::default().with_logging(false);
    let mut model = Model::with_config(vec![u.clone()], config)?;
    model.update_equations([(
        "heat",
        EquationUpdate::new(operator, histories[0].forcing(&history)?),
    )])?;
    model.update_boundaries([
        (
            "cold",
            BoundaryUpdate::dirichlet(&u, u.edge_mask("x", Edge::Start)?, 0.0)?,
        ),
        (
            "heater",
            BoundaryUpdate::dirichlet(&u, u.edge_mask("x", Edge::End)?, 0.0)?,
        ),
    ])?;

    let driver = TransientSolver::new(0.0, t_end, dt).with_logging(logging);
    let mut peaks: Vec<(f64, f64)> = Vec::new();
    let steps = driver.run(
        &mut model,
        &mut histories,
        |model, t, histories| {
            let heater = (2.0 * PI * t / period).sin();
            model.update_equations([("heat", EquationUpdate::rhs(histories[0].forcing(&history)?))])?;
            model.update_boundaries([("heater", BoundaryUpdate::rhs(heater))])
        },
        |t, solution| {
            if let Some(values) = solution.get("u") {
                // temperature a quarter of the way into the rod
                peaks.push((t, values[[num_points / 4]]));
            }
        },
    )?;

    println!();
    println!("{} steps done", steps);
    for (t, value) in peaks.iter().step_by(steps / 10) {
        println!("  t = {:>6.3}  u(0.25) = {:>9.5}", t, value);
    }

    SolveSummary::from_model(&model).print_to_console();
    Ok(())
}
