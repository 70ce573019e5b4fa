//! Backtracking construction of complete differential paths.
//!
//! The constructor refines one cell at a time, choosing between the
//! equal-subset and the differ-subset of its pair set, and leans on the
//! propagator to push consequences through the step relation. Choice points
//! live on an explicit stack (guessed cell, untried alternatives, path
//! snapshot), so backtracking depth is independent of the call stack and an
//! in-progress search can be checkpointed.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::arx::{ArxSpec, SeedDifferential};
use crate::bitcond::BitCondition;
use crate::error::Error;
use crate::path::{Cell, DifferentialPath};
use crate::propagate::Propagator;

const DEFAULT_BACKTRACK_LIMIT: u64 = 1 << 20;

/// Where a construction run currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Progress {
    /// No cell has been refined yet.
    Empty,
    /// Steps below the index are fully difference-determined.
    Partial(usize),
    /// Every scheduled cell is determined and the path is self-consistent.
    Complete,
    /// The search space (or the backtrack budget) is used up.
    Exhausted,
}

#[derive(Clone, Serialize, Deserialize)]
struct ChoicePoint {
    cell: Cell,
    step: usize,
    /// Refinements not yet tried, in reverse trial order.
    alternatives: Vec<BitCondition>,
    /// Path as it was before the guess.
    saved: DifferentialPath,
}

/// Serializable snapshot of an in-progress construction.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConstructorCheckpoint {
    path: DifferentialPath,
    stack: Vec<ChoicePoint>,
    step: usize,
    backtracks: u64,
    progress: Progress,
}

/// Extends a seeded path step by step until it is complete or provably
/// hopeless.
pub struct PathConstructor<'a> {
    spec: &'a ArxSpec,
    propagator: Propagator<'a>,
    path: DifferentialPath,
    stack: Vec<ChoicePoint>,
    step: usize,
    backtracks: u64,
    max_backtracks: u64,
    progress: Progress,
}

impl<'a> PathConstructor<'a> {
    /// Seed a constructor and settle the initial conditions. Fails with
    /// [`Error::PathContradiction`] if the seed differential is inconsistent
    /// on its own.
    pub fn new(spec: &'a ArxSpec, seed: &SeedDifferential) -> Result<Self, Error> {
        let mut path = DifferentialPath::seeded(spec, seed)?;
        let propagator = Propagator::new(spec);
        propagator.propagate_all(&mut path)?;
        let progress =
            if path.is_complete(spec) { Progress::Complete } else { Progress::Empty };
        Ok(Self {
            spec,
            propagator,
            path,
            stack: Vec::new(),
            step: 0,
            backtracks: 0,
            max_backtracks: DEFAULT_BACKTRACK_LIMIT,
            progress,
        })
    }

    /// Cap the number of backtracks before giving up with
    /// [`Error::PathExhausted`].
    #[must_use]
    pub fn with_backtrack_limit(mut self, limit: u64) -> Self {
        self.max_backtracks = limit;
        self
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn backtracks(&self) -> u64 {
        self.backtracks
    }

    pub fn path(&self) -> &DifferentialPath {
        &self.path
    }

    /// Resume from a serialized checkpoint taken against the same spec.
    pub fn resume(spec: &'a ArxSpec, checkpoint: ConstructorCheckpoint) -> Result<Self, Error> {
        spec.validate()?;
        if checkpoint.path.state_rows().len() != DifferentialPath::rows_for(spec.steps)
            || checkpoint.path.message_words().len() != spec.message_words
        {
            return Err(Error::InvalidSpec("checkpoint shape disagrees with spec"));
        }
        Ok(Self {
            spec,
            propagator: Propagator::new(spec),
            path: checkpoint.path,
            stack: checkpoint.stack,
            step: checkpoint.step,
            backtracks: checkpoint.backtracks,
            max_backtracks: DEFAULT_BACKTRACK_LIMIT,
            progress: checkpoint.progress,
        })
    }

    pub fn checkpoint(&self) -> ConstructorCheckpoint {
        ConstructorCheckpoint {
            path: self.path.clone(),
            stack: self.stack.clone(),
            step: self.step,
            backtracks: self.backtracks,
            progress: self.progress,
        }
    }

    /// Drive the search to a terminal state and return the completed path.
    pub fn run(&mut self) -> Result<&DifferentialPath, Error> {
        loop {
            match self.progress {
                Progress::Complete => {
                    return Ok(&self.path);
                }
                Progress::Exhausted => {
                    return Err(Error::PathExhausted { backtracks: self.backtracks });
                }
                Progress::Empty | Progress::Partial(_) => {}
            }

            if self.step == self.spec.steps {
                info!(
                    weight = self.path.condition_weight(),
                    backtracks = self.backtracks,
                    "differential path complete"
                );
                self.progress = Progress::Complete;
                continue;
            }

            let cells = self.path.undetermined_in_step(self.spec, self.step);
            if cells.is_empty() {
                self.step += 1;
                self.progress = Progress::Partial(self.step);
                continue;
            }

            match self.pick_guess(&cells) {
                Some((cell, alternatives)) => {
                    let mut cp = ChoicePoint {
                        cell,
                        step: self.step,
                        alternatives,
                        saved: self.path.clone(),
                    };
                    if self.apply_next(&mut cp) {
                        debug!(?cell, depth = self.stack.len(), "refined");
                        if !cp.alternatives.is_empty() {
                            self.stack.push(cp);
                        }
                    } else {
                        // Every refinement of this cell dies immediately.
                        self.backtrack();
                    }
                }
                None => self.backtrack(),
            }
        }
    }

    /// Most-constrained cell of the current step: scan in deterministic
    /// order, keep the first cell with the fewest surviving refinements, and
    /// stop early on a forced cell. `None` means some cell admits no
    /// refinement at all and the current path is a dead end.
    ///
    /// Alternatives come back in reverse trial order (they are popped), with
    /// the equal-subset tried first: sparse paths before dense ones.
    fn pick_guess(&self, cells: &[Cell]) -> Option<(Cell, Vec<BitCondition>)> {
        let mut fallback: Option<(Cell, Vec<BitCondition>)> = None;
        for &cell in cells {
            let current = self.path.get(cell);
            let mut alternatives = Vec::with_capacity(2);
            for refinement in [
                current.meet(BitCondition::DIFFER),
                current.meet(BitCondition::EQUAL),
            ] {
                if !refinement.is_contradiction() {
                    alternatives.push(refinement);
                }
            }
            match alternatives.len() {
                0 => return None,
                1 => return Some((cell, alternatives)),
                _ => {
                    if fallback.is_none() {
                        fallback = Some((cell, alternatives));
                    }
                }
            }
        }
        fallback
    }

    /// Try the choice point's remaining alternatives against its snapshot
    /// until one survives propagation; on success the constructor's path and
    /// step are switched to it.
    fn apply_next(&mut self, cp: &mut ChoicePoint) -> bool {
        while let Some(alt) = cp.alternatives.pop() {
            let mut trial = cp.saved.clone();
            if trial.meet_cell(cp.cell, alt).is_err() {
                continue;
            }
            if self.propagator.propagate_word(&mut trial, cp.cell.word).is_err() {
                continue;
            }
            self.step = cp.step;
            self.path = trial;
            return true;
        }
        false
    }

    /// Pop choice points until one still has an untried alternative that
    /// survives propagation, or declare the search exhausted.
    fn backtrack(&mut self) {
        loop {
            let Some(mut cp) = self.stack.pop() else {
                debug!(backtracks = self.backtracks, "search space exhausted");
                self.progress = Progress::Exhausted;
                return;
            };
            self.backtracks += 1;
            if self.backtracks >= self.max_backtracks {
                debug!(backtracks = self.backtracks, "backtrack budget exhausted");
                self.progress = Progress::Exhausted;
                return;
            }
            if self.apply_next(&mut cp) {
                debug!(cell = ?cp.cell, depth = self.stack.len(), "backtracked");
                self.progress = Progress::Partial(self.step);
                if !cp.alternatives.is_empty() {
                    self.stack.push(cp);
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arx::{ArxSpec, SeedDifferential};
    use crate::propagate::Propagator;

    fn assert_self_consistent(spec: &ArxSpec, path: &DifferentialPath) {
        assert!(path.is_complete(spec));
        assert!(!path.contains_contradiction());
        let mut copy = path.clone();
        // A settled path must be a propagation fixpoint.
        assert_eq!(Propagator::new(spec).propagate_all(&mut copy), Ok(false));
        assert_eq!(&copy, path);
    }

    #[test]
    fn trivial_seed_completes_without_guessing() {
        let spec = ArxSpec::toy8();
        let seed = SeedDifferential::trivial(spec.iv, spec.message_words);
        let mut ctor = PathConstructor::new(&spec, &seed).unwrap();
        let path = ctor.run().unwrap().clone();
        assert_eq!(ctor.progress(), Progress::Complete);
        assert_eq!(ctor.backtracks(), 0);
        assert_self_consistent(&spec, &path);
        assert_eq!(path.condition_weight(), 0);
    }

    #[test]
    fn message_bit_seed_terminates_with_consistent_result() {
        let spec = ArxSpec::toy8();
        let seed = SeedDifferential::from_message_xor(spec.iv, vec![0x8000_0000, 0, 0, 0]);
        let mut ctor =
            PathConstructor::new(&spec, &seed).unwrap().with_backtrack_limit(400);
        match ctor.run() {
            Ok(path) => {
                let path = path.clone();
                assert_self_consistent(&spec, &path);
                // The seeded difference must survive into the path (possibly
                // narrowed to a fixed orientation).
                assert_eq!(path.message_words()[0].get(31).difference(), Some(true));
                assert!(path.condition_weight() > 0);
            }
            Err(Error::PathExhausted { backtracks }) => {
                assert!(backtracks > 0);
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn chaining_bit_seed_terminates_within_budget() {
        let spec = ArxSpec::toy8();
        let mut iv_second = spec.iv;
        iv_second[0] ^= 1 << 12;
        let seed = SeedDifferential {
            iv_first: spec.iv,
            iv_second,
            message_xor: vec![0; spec.message_words],
        };
        let mut ctor =
            PathConstructor::new(&spec, &seed).unwrap().with_backtrack_limit(300);
        match ctor.run() {
            Ok(path) => {
                let path = path.clone();
                assert_self_consistent(&spec, &path);
            }
            Err(Error::PathExhausted { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn construction_is_reproducible() {
        let spec = ArxSpec::toy8();
        let seed = SeedDifferential::from_message_xor(spec.iv, vec![0, 0, 0x0001_0000, 0]);
        let run = |limit: u64| {
            let mut ctor = PathConstructor::new(&spec, &seed).unwrap().with_backtrack_limit(limit);
            ctor.run().map(DifferentialPath::clone)
        };
        match (run(400), run(400)) {
            (Ok(a), Ok(b)) => assert_eq!(a, b),
            (Err(a), Err(b)) => assert_eq!(a, b),
            (a, b) => panic!("diverging outcomes: {a:?} vs {b:?}"),
        }
    }

    #[test]
    fn checkpoint_round_trips_through_serde() {
        let spec = ArxSpec::toy8();
        let seed = SeedDifferential::from_message_xor(spec.iv, vec![0x8000_0000, 0, 0, 0]);
        let ctor = PathConstructor::new(&spec, &seed).unwrap().with_backtrack_limit(400);

        let json = serde_json::to_string(&ctor.checkpoint()).unwrap();
        let restored: ConstructorCheckpoint = serde_json::from_str(&json).unwrap();
        let mut resumed =
            PathConstructor::resume(&spec, restored).unwrap().with_backtrack_limit(400);

        let mut direct = PathConstructor::new(&spec, &seed).unwrap().with_backtrack_limit(400);
        match (
            direct.run().map(DifferentialPath::clone),
            resumed.run().map(DifferentialPath::clone),
        ) {
            (Ok(a), Ok(b)) => assert_eq!(a, b),
            (Err(a), Err(b)) => assert_eq!(a, b),
            (a, b) => panic!("diverging outcomes: {a:?} vs {b:?}"),
        }
    }

    #[test]
    fn checkpoint_shape_is_validated() {
        let spec = ArxSpec::toy8();
        let seed = SeedDifferential::trivial(spec.iv, spec.message_words);
        let checkpoint = PathConstructor::new(&spec, &seed).unwrap().checkpoint();

        let other = ArxSpec::md5();
        assert!(matches!(
            PathConstructor::resume(&other, checkpoint),
            Err(Error::InvalidSpec(_))
        ));
    }
}
