use nalgebra::DVector;

use crate::models::fd_model::Model;
use crate::numerics::solver::SolveStats;

/// Snapshot of a model's size and solver work, printed after a run.
pub struct SolveSummary {
    // Layout
    pub fields: Vec<(String, Vec<usize>)>,
    pub unknowns: usize,
    pub equation_labels: usize,
    pub boundary_labels: usize,

    // Solver
    pub backend: &'static str,
    pub stats: SolveStats,

    // Operator caches, summed over fields
    pub cache_hits: usize,
    pub cache_misses: usize,

    // Optional cross-check between two solutions
    pub max_solution_diff: Option<f64>,
    pub mean_solution_diff: Option<f64>,
}

impl SolveSummary {
    pub fn from_model(model: &Model) -> Self {
        let fields = model
            .fields()
            .iter()
            .map(|f| (f.name().to_string(), f.shape().to_vec()))
            .collect();
        let (cache_hits, cache_misses) = model
            .fields()
            .iter()
            .map(|f| f.cache_stats())
            .fold((0, 0), |(h, m), s| (h + s.hits, m + s.misses));

        Self {
            fields,
            unknowns: model.size(),
            equation_labels: model.equations().len(),
            boundary_labels: model.boundaries().len(),
            backend: model.config().backend.name(),
            stats: model.stats(),
            cache_hits,
            cache_misses,
            max_solution_diff: None,
            mean_solution_diff: None,
        }
    }

    pub fn add_comparison(&mut self, reference: &DVector<f64>, other: &DVector<f64>) {
        let diffs: Vec<f64> = reference
            .iter()
            .zip(other.iter())
            .map(|(a, b)| (a - b).abs())
            .collect();
        if diffs.is_empty() {
            return;
        }

        self.max_solution_diff = Some(diffs.iter().cloned().fold(0.0, f64::max));
        self.mean_solution_diff = Some(diffs.iter().sum::<f64>() / diffs.len() as f64);
    }

    pub fn print_to_console(&self) {
        println!("\n{}", "=".repeat(60));
        println!("SOLVE SUMMARY");
        println!("{}", "=".repeat(60));
        for (name, shape) in &self.fields {
            println!("Field {:<10}{:?}", name, shape);
        }
        println!("Unknowns:      {}", self.unknowns);
        println!(
            "Rows:          {} equation label(s), {} boundary label(s)",
            self.equation_labels, self.boundary_labels
        );
        println!("{}", "-".repeat(60));
        println!("Backend:       {}", self.backend);
        println!(
            "Assemblies:    matrix={}, rhs={}",
            self.stats.matrix_assemblies, self.stats.rhs_assemblies
        );
        println!(
            "Solves:        {} ({} factorization(s))",
            self.stats.solves, self.stats.factorizations
        );
        if let Some(residual) = self.stats.last_residual {
            println!("Last residual: {:.3e}", residual);
        }
        println!(
            "Op. cache:     {} hit(s), {} miss(es)",
            self.cache_hits, self.cache_misses
        );
        if let (Some(max_diff), Some(mean_diff)) = (self.max_solution_diff, self.mean_solution_diff)
        {
            println!("Max diff:      {:.3e} (mean {:.3e})", max_diff, mean_diff);
        }
        println!("{}\n", "=".repeat(60));
    }
}
