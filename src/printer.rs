use std::time::{Duration, Instant};

use tracing::info;

use crate::search::SearchState;

/// Monitor closure reporting search progress every `interval` seconds until
/// the run stops. Pass the path's condition weight for the ETA estimate.
pub fn progress_printer(interval: Duration, weight: u32) -> impl Fn(&SearchState) {
    move |state| {
        let start = Instant::now();
        let mut prev_time = start;
        let mut prev_trials = 0u64;

        while state.is_running() {
            std::thread::sleep(interval);
            let now = Instant::now();
            let snapshot = state.snapshot();
            let rate = (snapshot.trials.saturating_sub(prev_trials)) as f64
                / (now - prev_time).as_secs_f64().max(f64::MIN_POSITIVE);
            prev_time = now;
            prev_trials = snapshot.trials;

            info!(
                trials = snapshot.trials,
                trials_per_sec = rate as u64,
                partials = snapshot.partials,
                best_depth = snapshot.best_depth,
                eta_secs =
                    snapshot.estimate_time_to_success(weight, start.elapsed().as_secs_f64()),
                "search progress"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arx::{ArxSpec, SeedDifferential};
    use crate::bitcond::BitCondition;
    use crate::construct::PathConstructor;
    use crate::engine::TrialEngine;
    use crate::path::DifferentialPath;
    use crate::search::{SearchBudget, WorkerPool};
    use crate::solver;

    #[test]
    fn printer_returns_once_the_search_stops() {
        let spec = ArxSpec::toy8();
        let seed = SeedDifferential::trivial(spec.iv, spec.message_words);
        let mut ctor = PathConstructor::new(&spec, &seed).unwrap();
        let mut path = ctor.run().unwrap().clone();
        path.state[DifferentialPath::row(1)].set(0, BitCondition::DIFFER);
        let template = solver::solve(&spec, &path).unwrap();
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let pool = WorkerPool::new(engine).with_seed(11);

        let weight = path.condition_weight();
        let (outcome, _) = pool.run(
            2,
            SearchBudget::trials(10),
            progress_printer(Duration::ZERO, weight),
        );
        assert!(outcome.is_err());
    }
}
