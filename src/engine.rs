//! Single collision trials: sample, instantiate, simulate, verify.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::arx::ArxSpec;
use crate::error::Error;
use crate::path::DifferentialPath;
use crate::solver::{FreeBits, MessageTemplate};

/// A verified message pair realizing the full path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionResult {
    pub message_first: Vec<u32>,
    pub message_second: Vec<u32>,
    pub output_first: [u32; 4],
    pub output_second: [u32; 4],
}

impl CollisionResult {
    /// Outputs agree exactly; otherwise this is a near-collision whose output
    /// difference is the one the path prescribes.
    pub fn is_full_collision(&self) -> bool {
        self.output_first == self.output_second
    }
}

/// Outcome of a single trial.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrialOutcome {
    Success(CollisionResult),
    /// Matched this many steps before the first mismatch.
    Partial { depth: usize },
    /// Mismatched already at the first step.
    Failure,
}

/// Runs independent trials against a fixed path and template.
#[derive(Clone, Copy)]
pub struct TrialEngine<'a> {
    spec: &'a ArxSpec,
    path: &'a DifferentialPath,
    template: &'a MessageTemplate,
    iv_first: [u32; 4],
    iv_second: [u32; 4],
}

impl<'a> TrialEngine<'a> {
    pub fn new(
        spec: &'a ArxSpec,
        path: &'a DifferentialPath,
        template: &'a MessageTemplate,
    ) -> Result<Self, Error> {
        spec.validate()?;
        if path.steps() != spec.steps || template.word_count() != spec.message_words {
            return Err(Error::InvalidSpec("path or template shape disagrees with spec"));
        }
        let (iv_first, iv_second) = path
            .initial_pair()
            .ok_or(Error::InvalidSpec("chaining rows are not fully pinned"))?;
        Ok(Self { spec, path, template, iv_first, iv_second })
    }

    pub fn spec(&self) -> &'a ArxSpec {
        self.spec
    }

    pub fn path(&self) -> &'a DifferentialPath {
        self.path
    }

    pub fn template(&self) -> &'a MessageTemplate {
        self.template
    }

    /// Draw fresh free bits and evaluate them.
    pub fn run_trial<R: Rng + ?Sized>(&self, rng: &mut R) -> TrialOutcome {
        let free = FreeBits::sample(self.template.free_count(), rng);
        self.evaluate(&free)
    }

    /// Evaluate one concrete free-bit assignment: simulate both branches and
    /// check every step's realized pair against the path.
    pub fn evaluate(&self, free: &FreeBits) -> TrialOutcome {
        let (first, second) = self.template.instantiate(free);
        let steps = self.spec.steps;

        let mut qa = vec![0u32; steps + 4];
        let mut qb = vec![0u32; steps + 4];
        for (i, word) in [(0usize, 0usize), (1, 3), (2, 2), (3, 1)] {
            qa[i] = self.iv_first[word];
            qb[i] = self.iv_second[word];
        }

        for t in 0..steps {
            let w = self.spec.schedule[t];
            qa[t + 4] =
                self.spec.step(t, [qa[t + 3], qa[t + 2], qa[t + 1], qa[t]], first[w]);
            qb[t + 4] =
                self.spec.step(t, [qb[t + 3], qb[t + 2], qb[t + 1], qb[t]], second[w]);
            if !self.path.q(t as isize + 1).allows_pair(qa[t + 4], qb[t + 4]) {
                return if t == 0 { TrialOutcome::Failure } else { TrialOutcome::Partial { depth: t } };
            }
        }

        let mut output_first = [qa[steps], qa[steps + 3], qa[steps + 2], qa[steps + 1]];
        let mut output_second = [qb[steps], qb[steps + 3], qb[steps + 2], qb[steps + 1]];
        if self.spec.feed_forward {
            for i in 0..4 {
                output_first[i] = output_first[i].wrapping_add(self.iv_first[i]);
                output_second[i] = output_second[i].wrapping_add(self.iv_second[i]);
            }
        }

        let result = CollisionResult {
            message_first: first,
            message_second: second,
            output_first,
            output_second,
        };
        debug_assert!(verify_collision(self.spec, self.path, &result));
        TrialOutcome::Success(result)
    }
}

/// Round-trip check: re-run the compression function on both blocks and
/// confirm that every step condition and the recorded outputs hold.
pub fn verify_collision(
    spec: &ArxSpec,
    path: &DifferentialPath,
    result: &CollisionResult,
) -> bool {
    let Some((iv_first, iv_second)) = path.initial_pair() else {
        return false;
    };
    if result.message_first.len() != spec.message_words
        || result.message_second.len() != spec.message_words
    {
        return false;
    }
    for (w, cond) in path.message_words().iter().enumerate() {
        if !cond.allows_pair(result.message_first[w], result.message_second[w]) {
            return false;
        }
    }

    let mut qa = vec![0u32; spec.steps + 4];
    let mut qb = vec![0u32; spec.steps + 4];
    for (i, word) in [(0usize, 0usize), (1, 3), (2, 2), (3, 1)] {
        qa[i] = iv_first[word];
        qb[i] = iv_second[word];
    }
    for t in 0..spec.steps {
        let w = spec.schedule[t];
        qa[t + 4] = spec.step(t, [qa[t + 3], qa[t + 2], qa[t + 1], qa[t]], result.message_first[w]);
        qb[t + 4] = spec.step(t, [qb[t + 3], qb[t + 2], qb[t + 1], qb[t]], result.message_second[w]);
        if !path.q(t as isize + 1).allows_pair(qa[t + 4], qb[t + 4]) {
            return false;
        }
    }

    spec.compress(iv_first, &result.message_first) == result.output_first
        && spec.compress(iv_second, &result.message_second) == result.output_second
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arx::SeedDifferential;
    use crate::bitcond::{BitCondition, CondWord};
    use crate::construct::PathConstructor;
    use crate::solver;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn trivial_setup() -> (ArxSpec, DifferentialPath) {
        let spec = ArxSpec::toy8();
        let seed = SeedDifferential::trivial(spec.iv, spec.message_words);
        let mut ctor = PathConstructor::new(&spec, &seed).unwrap();
        let path = ctor.run().unwrap().clone();
        (spec, path)
    }

    #[test]
    fn identical_branch_trials_always_succeed() {
        let (spec, path) = trivial_setup();
        let template = solver::solve(&spec, &path).unwrap();
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..16 {
            match engine.run_trial(&mut rng) {
                TrialOutcome::Success(result) => {
                    assert!(result.is_full_collision());
                    assert_eq!(result.message_first, result.message_second);
                    assert!(verify_collision(&spec, &path, &result));
                }
                other => panic!("expected success, got {other:?}"),
            }
        }
    }

    #[test]
    fn zero_free_bits_is_deterministic() {
        let (spec, mut path) = trivial_setup();
        for word in path.message.iter_mut() {
            *word = CondWord::from_exact(0x5151_0000);
        }
        let template = solver::solve(&spec, &path).unwrap();
        assert_eq!(template.free_count(), 0);
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        let a = engine.run_trial(&mut rng);
        let b = engine.run_trial(&mut rng);
        assert_eq!(a, b);
        assert!(matches!(a, TrialOutcome::Success(_)));
    }

    #[test]
    fn impossible_condition_reports_depth() {
        let (spec, mut path) = trivial_setup();
        // Branches are identical, so a forced difference on Q[3] can never be
        // realized; the mismatch surfaces after two matched steps.
        path.state[DifferentialPath::row(3)].set(7, BitCondition::DIFFER);
        let template = solver::solve(&spec, &path).unwrap();
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        assert_eq!(engine.run_trial(&mut rng), TrialOutcome::Partial { depth: 2 });
    }

    #[test]
    fn first_step_mismatch_is_failure() {
        let (spec, mut path) = trivial_setup();
        path.state[DifferentialPath::row(1)].set(0, BitCondition::DIFFER);
        let template = solver::solve(&spec, &path).unwrap();
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let mut rng = SmallRng::seed_from_u64(9);
        assert_eq!(engine.run_trial(&mut rng), TrialOutcome::Failure);
    }

    #[test]
    fn tampered_result_fails_verification() {
        let (spec, path) = trivial_setup();
        let template = solver::solve(&spec, &path).unwrap();
        let engine = TrialEngine::new(&spec, &path, &template).unwrap();
        let mut rng = SmallRng::seed_from_u64(4);
        let TrialOutcome::Success(mut result) = engine.run_trial(&mut rng) else {
            panic!("expected success");
        };
        result.message_second[0] ^= 1;
        assert!(!verify_collision(&spec, &path, &result));
    }

    #[test]
    fn unpinned_chaining_rows_are_rejected() {
        let (spec, mut path) = trivial_setup();
        path.state[0] = CondWord::from_xor(0);
        let template = solver::solve(&spec, &path).unwrap();
        assert!(matches!(
            TrialEngine::new(&spec, &path, &template),
            Err(Error::InvalidSpec(_))
        ));
    }
}
