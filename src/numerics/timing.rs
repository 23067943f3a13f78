#[cfg(feature = "timing")]
use std::cell::RefCell;
use std::time::Duration;

#[derive(Default, Clone, Debug)]
pub struct TimingStats {
    pub assembly_times: Vec<Duration>,
    pub factorization_times: Vec<Duration>,
    pub solve_times: Vec<Duration>,
    pub total_time: Duration,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "timing")]
    pub fn print_summary(&self) {
        if self.solve_times.is_empty() {
            return;
        }

        let total_assembly: Duration = self.assembly_times.iter().sum();
        let total_factor: Duration = self.factorization_times.iter().sum();
        let total_solve: Duration = self.solve_times.iter().sum();
        let accounted = total_assembly + total_factor + total_solve;
        let overhead = self.total_time.saturating_sub(accounted);

        let avg = |total: Duration, n: usize| {
            if n == 0 {
                0.0
            } else {
                total.as_secs_f64() * 1000.0 / n as f64
            }
        };

        println!("\n{}", "=".repeat(60));
        println!("{:^60}", "SOLVER TIMING SUMMARY");
        println!("{}", "=".repeat(60));
        println!(
            "Total time:                    {:.3}s",
            self.total_time.as_secs_f64()
        );
        println!("{}", "-".repeat(60));
        println!("Component breakdown:");
        println!(
            "  Assembly:                  {:>9.3}ms  (avg: {:>9.3}ms)",
            total_assembly.as_secs_f64() * 1000.0,
            avg(total_assembly, self.assembly_times.len())
        );
        println!(
            "  Factorization:             {:>9.3}ms  (avg: {:>9.3}ms)",
            total_factor.as_secs_f64() * 1000.0,
            avg(total_factor, self.factorization_times.len())
        );
        println!(
            "  Linear solve:              {:>9.3}ms  (avg: {:>9.3}ms)",
            total_solve.as_secs_f64() * 1000.0,
            avg(total_solve, self.solve_times.len())
        );
        println!("{}", "=".repeat(60));
        println!(
            "Overhead/Other:                {:>9.3}ms",
            overhead.as_secs_f64() * 1000.0
        );
        println!(
            "Counts:                        {} assembly, {} factorization, {} solve\n",
            self.assembly_times.len(),
            self.factorization_times.len(),
            self.solve_times.len()
        );
    }

    #[cfg(not(feature = "timing"))]
    pub fn print_summary(&self) {}
}

#[cfg(feature = "timing")]
thread_local! {
    static TIMING_STATS: RefCell<TimingStats> = RefCell::new(TimingStats::new());
}

#[cfg(feature = "timing")]
fn record<F, R>(f: F, slot: fn(&mut TimingStats) -> &mut Vec<Duration>) -> R
where
    F: FnOnce() -> R,
{
    let start = std::time::Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    TIMING_STATS.with(|stats| slot(&mut stats.borrow_mut()).push(elapsed));
    result
}

#[cfg(feature = "timing")]
pub fn reset_timing() {
    TIMING_STATS.with(|stats| {
        *stats.borrow_mut() = TimingStats::new();
    });
}

#[cfg(not(feature = "timing"))]
pub fn reset_timing() {}

#[cfg(feature = "timing")]
pub fn record_assembly<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    record(f, |s| &mut s.assembly_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_assembly<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn record_factorization<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    record(f, |s| &mut s.factorization_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_factorization<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn record_linear_solve<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    record(f, |s| &mut s.solve_times)
}

#[cfg(not(feature = "timing"))]
pub fn record_linear_solve<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn finalize_timing(total_time: Duration) -> TimingStats {
    TIMING_STATS.with(|stats| {
        let mut s = stats.borrow_mut();
        s.total_time = total_time;
        s.clone()
    })
}

#[cfg(not(feature = "timing"))]
pub fn finalize_timing(_total_time: Duration) -> TimingStats {
    TimingStats::new()
}

#[cfg(feature = "timing")]
pub fn finalize_and_print(total_time: Duration) {
    finalize_timing(total_time).print_summary();
}

#[cfg(not(feature = "timing"))]
pub fn finalize_and_print(_total_time: Duration) {}
