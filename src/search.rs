//! Parallel trial streams over a fixed template, with shared statistics and
//! first-writer-wins success reporting.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{CollisionResult, TrialEngine, TrialOutcome};
use crate::error::Error;
use crate::stats::{AtomicStats, SearchSnapshot};

/// Anything that can be asked to stop cooperatively.
pub trait StopSignal {
    fn stop(&self);
}

/// State shared by every worker of one search run.
///
/// Counters are advisory; correctness only depends on the stop flag and the
/// write-once result slot.
pub struct SearchState {
    running: AtomicBool,
    stats: AtomicStats,
    result: OnceLock<CollisionResult>,
}

impl SearchState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            stats: AtomicStats::default(),
            result: OnceLock::new(),
        }
    }

    fn from_snapshot(snapshot: &SearchSnapshot) -> Self {
        Self {
            running: AtomicBool::new(true),
            stats: AtomicStats::restore(snapshot),
            result: OnceLock::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        self.stats.report()
    }

    pub fn result(&self) -> Option<&CollisionResult> {
        self.result.get()
    }

    /// First writer wins; later candidates are dropped (they are equally
    /// valid collisions).
    fn publish(&self, result: CollisionResult) -> bool {
        self.result.set(result).is_ok()
    }
}

impl StopSignal for SearchState {
    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Trial and wall-clock cutoffs, both checked at trial-loop boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchBudget {
    pub max_trials: Option<u64>,
    pub max_duration: Option<Duration>,
}

impl SearchBudget {
    pub const UNLIMITED: Self = Self { max_trials: None, max_duration: None };

    pub fn trials(max: u64) -> Self {
        Self { max_trials: Some(max), max_duration: None }
    }

    pub fn duration(max: Duration) -> Self {
        Self { max_trials: None, max_duration: Some(max) }
    }
}

// How many trials may pass between wall-clock checks.
const DEADLINE_STRIDE: u64 = 256;

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Runs many independent trial streams until one reports a verified
/// collision or the budget runs out.
pub struct WorkerPool<'a> {
    engine: TrialEngine<'a>,
    base_seed: u64,
}

impl<'a> WorkerPool<'a> {
    pub fn new(engine: TrialEngine<'a>) -> Self {
        Self { engine, base_seed: rand::random() }
    }

    /// Fix the base seed; worker streams stay decorrelated but the whole run
    /// becomes reproducible for a given worker count.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    pub fn engine(&self) -> &TrialEngine<'a> {
        &self.engine
    }

    /// Run `workers` trial loops to completion. The monitor closure runs on
    /// the calling thread and may watch (or stop) the shared state; workers
    /// terminate on success or budget exhaustion regardless of it.
    pub fn run<F: FnOnce(&SearchState)>(
        &self,
        workers: usize,
        budget: SearchBudget,
        monitor: F,
    ) -> (Result<CollisionResult, Error>, SearchSnapshot) {
        self.run_with_state(SearchState::new(), workers, budget, monitor)
    }

    /// [`WorkerPool::run`] with counters restored from a checkpoint, so a
    /// trial budget counts work across restarts.
    pub fn resume<F: FnOnce(&SearchState)>(
        &self,
        snapshot: &SearchSnapshot,
        workers: usize,
        budget: SearchBudget,
        monitor: F,
    ) -> (Result<CollisionResult, Error>, SearchSnapshot) {
        self.run_with_state(SearchState::from_snapshot(snapshot), workers, budget, monitor)
    }

    /// Search without a monitor; the result alone is wanted.
    pub fn search(&self, workers: usize, budget: SearchBudget) -> Result<CollisionResult, Error> {
        self.run(workers, budget, |_| {}).0
    }

    fn run_with_state<F: FnOnce(&SearchState)>(
        &self,
        state: SearchState,
        workers: usize,
        budget: SearchBudget,
        monitor: F,
    ) -> (Result<CollisionResult, Error>, SearchSnapshot) {
        let workers = workers.max(1);
        let deadline = budget.max_duration.map(|d| Instant::now() + d);
        info!(
            workers,
            free_bits = self.engine.template().free_count(),
            weight = self.engine.path().condition_weight(),
            "collision search started"
        );

        std::thread::scope(|s| {
            let state = &state;
            for id in 0..workers {
                s.spawn(move || self.worker(state, id, budget.max_trials, deadline));
            }
            monitor(state);
        });

        let snapshot = state.snapshot();
        let outcome = match state.result() {
            Some(result) => Ok(result.clone()),
            None => {
                info!(trials = snapshot.trials, best_depth = snapshot.best_depth, "search exhausted");
                Err(Error::SearchExhausted {
                    trials: snapshot.trials,
                    best_depth: snapshot.best_depth as usize,
                })
            }
        };
        (outcome, snapshot)
    }

    fn worker(
        &self,
        state: &SearchState,
        id: usize,
        max_trials: Option<u64>,
        deadline: Option<Instant>,
    ) {
        let mut rng = SmallRng::seed_from_u64(splitmix64(
            self.base_seed.wrapping_add(id as u64),
        ));
        let mut iterations = 0u64;

        while state.is_running() {
            if let Some(deadline) = deadline {
                if iterations % DEADLINE_STRIDE == 0 && Instant::now() >= deadline {
                    state.stop();
                    break;
                }
            }
            iterations += 1;

            if let Some(max) = max_trials {
                // fetch_add reserves this trial; give it back if over budget.
                if state.stats.trials.fetch_add(1, Ordering::Relaxed) >= max {
                    state.stats.trials.fetch_sub(1, Ordering::Relaxed);
                    state.stop();
                    break;
                }
            } else {
                state.stats.trials.fetch_add(1, Ordering::Relaxed);
            }

            match self.engine.run_trial(&mut rng) {
                TrialOutcome::Success(result) => {
                    state.stats.successes.fetch_add(1, Ordering::Relaxed);
                    if state.publish(result) {
                        debug!(worker = id, "collision found");
                    }
                    state.stop();
                    break;
                }
                TrialOutcome::Partial { depth } => {
                    state.stats.partials.fetch_add(1, Ordering::Relaxed);
                    state.stats.record_depth(depth);
                }
                TrialOutcome::Failure => {
                    state.stats.failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arx::{ArxSpec, SeedDifferential};
    use crate::bitcond::{BitCondition, CondWord};
    use crate::construct::PathConstructor;
    use crate::path::DifferentialPath;
    use crate::solver::{self, MessageTemplate};

    fn trivial_setup() -> (ArxSpec, DifferentialPath, MessageTemplate) {
        let spec = ArxSpec::toy8();
        let seed = SeedDifferential::trivial(spec.iv, spec.message_words);
        let mut ctor = PathConstructor::new(&spec, &seed).unwrap();
        let path = ctor.run().unwrap().clone();
        let template = solver::solve(&spec, &path).unwrap();
        (spec, path, template)
    }

    fn impossible_setup() -> (ArxSpec, DifferentialPath, MessageTemplate) {
        let (spec, mut path, _) = trivial_setup();
        // Identical branches can never realize a forced difference on Q[1].
        path.state[DifferentialPath::row(1)].set(4, BitCondition::DIFFER);
        let template = solver::solve(&spec, &path).unwrap();
        (spec, path, template)
    }

    #[test]
    fn fully_determined_template_resolves_in_one_trial() {
        let (spec, mut path, _) = trivial_setup();
        for word in path.message.iter_mut() {
            *word = CondWord::from_exact(0x0bad_f00d);
        }
        let template = solver::solve(&spec, &path).unwrap();
        assert_eq!(template.free_count(), 0);
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let pool = WorkerPool::new(engine).with_seed(1);
        let (outcome, snapshot) = pool.run(1, SearchBudget::trials(1), |_| {});
        assert!(outcome.is_ok());
        assert_eq!(snapshot.trials, 1);
    }

    #[test]
    fn exhaustion_reports_exact_trial_count() {
        let (spec, path, template) = impossible_setup();
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let pool = WorkerPool::new(engine).with_seed(2);
        match pool.search(3, SearchBudget::trials(50)) {
            Err(Error::SearchExhausted { trials, best_depth }) => {
                assert_eq!(trials, 50);
                // The tampered bit sits on Q[1], so no trial matches a step.
                assert_eq!(best_depth, 0);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn one_worker_and_many_workers_both_succeed() {
        let (spec, path, template) = trivial_setup();
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let pool = WorkerPool::new(engine).with_seed(3);

        let (single, single_stats) = pool.run(1, SearchBudget::trials(1 << 12), |_| {});
        let (many, many_stats) = pool.run(4, SearchBudget::trials(1 << 12), |_| {});
        let single = single.unwrap();
        let many = many.unwrap();
        assert!(single.is_full_collision());
        assert!(many.is_full_collision());
        assert!(single_stats.trials <= 1 << 12);
        assert!(many_stats.trials <= 1 << 12);
    }

    #[test]
    fn zero_deadline_stops_without_hanging() {
        let (spec, path, template) = impossible_setup();
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let pool = WorkerPool::new(engine).with_seed(4);
        match pool.search(2, SearchBudget::duration(Duration::ZERO)) {
            Err(Error::SearchExhausted { trials, .. }) => assert_eq!(trials, 0),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn monitor_can_stop_an_unbounded_search() {
        let (spec, path, template) = impossible_setup();
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let pool = WorkerPool::new(engine).with_seed(5);
        let (outcome, snapshot) = pool.run(2, SearchBudget::UNLIMITED, |state| {
            while state.snapshot().trials < 100 {
                std::thread::yield_now();
            }
            state.stop();
        });
        assert!(matches!(outcome, Err(Error::SearchExhausted { .. })));
        assert!(snapshot.trials >= 100);
    }

    #[test]
    fn resume_continues_the_trial_budget() {
        let (spec, path, template) = impossible_setup();
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let pool = WorkerPool::new(engine).with_seed(6);

        let (first, after_first) = pool.run(1, SearchBudget::trials(20), |_| {});
        assert!(first.is_err());
        assert_eq!(after_first.trials, 20);

        let json = serde_json::to_string(&after_first).unwrap();
        let restored: SearchSnapshot = serde_json::from_str(&json).unwrap();
        let (second, after_second) = pool.resume(&restored, 1, SearchBudget::trials(25), |_| {});
        assert!(second.is_err());
        assert_eq!(after_second.trials, 25);
    }

    #[test]
    fn partial_depth_is_aggregated() {
        let (spec, mut path, _) = trivial_setup();
        // Force the mismatch at step 3: three steps match first.
        path.state[DifferentialPath::row(4)].set(0, BitCondition::DIFFER);
        let template = solver::solve(&spec, &path).unwrap();
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let pool = WorkerPool::new(engine).with_seed(7);
        let (outcome, snapshot) = pool.run(2, SearchBudget::trials(40), |_| {});
        assert!(outcome.is_err());
        assert_eq!(snapshot.best_depth, 3);
        assert_eq!(snapshot.partials, 40);
    }
}
