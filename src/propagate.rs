//! Condition propagation across the step relation.
//!
//! Modular addition is handled per bit position with an explicit carry pair:
//! the carry of each branch forms a `(first, second)` pair constrained
//! exactly like a stored bit, so the adder is a small state machine walked
//! from bit 0 to bit 31. Boolean functions are propagated by truth-table
//! enumeration. Every update is an intersection, so propagation is monotone:
//! re-running a consistent path changes nothing, and any reported
//! contradiction is a genuine one.

use std::collections::BTreeSet;

use crate::arx::{ArxSpec, BoolFn};
use crate::bitcond::{BitCondition, Clash, CondWord};
use crate::error::Error;
use crate::path::{DifferentialPath, WordRef};

/// A bit position that would need two incompatible conditions at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contradiction {
    pub step: usize,
    pub bit: usize,
}

impl From<Contradiction> for Error {
    fn from(c: Contradiction) -> Self {
        Error::PathContradiction { step: c.step, bit: c.bit }
    }
}

fn majority(a: bool, b: bool, c: bool) -> bool {
    (a as u8 + b as u8 + c as u8) >= 2
}

/// Narrow `x`, `y` and `z` under `z = x + y (mod 2^32)` in both branches.
///
/// For every bit the allowed `(first, second)` pairs of both addends and the
/// incoming carry pair are enumerated; combinations whose sum the result word
/// rejects are discarded, and whatever survives narrows all three words and
/// feeds the next bit's carry pair. The carry out of bit 31 is discarded.
pub(crate) fn propagate_add(
    x: &mut CondWord,
    y: &mut CondWord,
    z: &mut CondWord,
) -> Result<bool, Clash> {
    let mut changed = false;
    let mut carry = BitCondition::ZERO;
    for bit in 0..CondWord::WIDTH {
        // Fully unconstrained column: nothing can narrow and the carry out
        // is unconstrained too.
        if x.get(bit).is_free() && y.get(bit).is_free() && z.get(bit).is_free() {
            carry = BitCondition::FREE;
            continue;
        }
        let mut keep_x = 0u8;
        let mut keep_y = 0u8;
        let mut keep_z = 0u8;
        let mut carry_out = 0u8;
        for (a, a2) in x.get(bit).pairs() {
            for (b, b2) in y.get(bit).pairs() {
                for (c, c2) in carry.pairs() {
                    let s = a ^ b ^ c;
                    let s2 = a2 ^ b2 ^ c2;
                    if !z.get(bit).allows(s, s2) {
                        continue;
                    }
                    keep_x |= BitCondition::from_pair(a, a2).mask();
                    keep_y |= BitCondition::from_pair(b, b2).mask();
                    keep_z |= BitCondition::from_pair(s, s2).mask();
                    carry_out |=
                        BitCondition::from_pair(majority(a, b, c), majority(a2, b2, c2)).mask();
                }
            }
        }
        if keep_z == 0 {
            return Err(Clash { bit });
        }
        changed |= x.meet_at(bit, BitCondition::from_mask(keep_x))?;
        changed |= y.meet_at(bit, BitCondition::from_mask(keep_y))?;
        changed |= z.meet_at(bit, BitCondition::from_mask(keep_z))?;
        carry = BitCondition::from_mask(carry_out);
    }
    Ok(changed)
}

/// Narrow all four words under `w = f(x, y, z)` bitwise in both branches.
/// Pure per-bit arc consistency; no carries are involved.
pub(crate) fn propagate_boolfn(
    f: BoolFn,
    x: &mut CondWord,
    y: &mut CondWord,
    z: &mut CondWord,
    w: &mut CondWord,
) -> Result<bool, Clash> {
    let mut changed = false;
    for bit in 0..CondWord::WIDTH {
        if x.get(bit).is_free() && y.get(bit).is_free() && z.get(bit).is_free() && w.get(bit).is_free()
        {
            continue;
        }
        let mut keep_x = 0u8;
        let mut keep_y = 0u8;
        let mut keep_z = 0u8;
        let mut keep_w = 0u8;
        for (a, a2) in x.get(bit).pairs() {
            for (b, b2) in y.get(bit).pairs() {
                for (c, c2) in z.get(bit).pairs() {
                    let o = f.eval_bit(a, b, c);
                    let o2 = f.eval_bit(a2, b2, c2);
                    if !w.get(bit).allows(o, o2) {
                        continue;
                    }
                    keep_x |= BitCondition::from_pair(a, a2).mask();
                    keep_y |= BitCondition::from_pair(b, b2).mask();
                    keep_z |= BitCondition::from_pair(c, c2).mask();
                    keep_w |= BitCondition::from_pair(o, o2).mask();
                }
            }
        }
        if keep_w == 0 {
            return Err(Clash { bit });
        }
        changed |= x.meet_at(bit, BitCondition::from_mask(keep_x))?;
        changed |= y.meet_at(bit, BitCondition::from_mask(keep_y))?;
        changed |= z.meet_at(bit, BitCondition::from_mask(keep_z))?;
        changed |= w.meet_at(bit, BitCondition::from_mask(keep_w))?;
    }
    Ok(changed)
}

/// Derives implied conditions across steps of a path.
pub struct Propagator<'a> {
    spec: &'a ArxSpec,
}

impl<'a> Propagator<'a> {
    pub fn new(spec: &'a ArxSpec) -> Self {
        Self { spec }
    }

    /// Run the step relation of step `t` to a local fixpoint and fold the
    /// result back into the path. `Ok(true)` if any stored condition
    /// narrowed.
    pub fn propagate_step(
        &self,
        path: &mut DifferentialPath,
        t: usize,
    ) -> Result<bool, Contradiction> {
        let wrap = |clash: Clash| Contradiction { step: t, bit: clash.bit };
        let word = self.spec.schedule[t];
        let s = self.spec.rotations[t];
        let ti = t as isize;

        let mut q_new = *path.q(ti + 1);
        let mut q0 = *path.q(ti);
        let mut q1 = *path.q(ti - 1);
        let mut q2 = *path.q(ti - 2);
        let mut q3 = *path.q(ti - 3);
        let mut m = path.message_words()[word];
        // The step constant is identical in both branches and never narrows.
        let mut k = CondWord::from_exact(self.spec.constants[t]);

        let mut f = CondWord::free();
        let mut u = CondWord::free();
        let mut v = CondWord::free();
        let mut sum = CondWord::free();

        loop {
            let mut narrowed = false;
            narrowed |= propagate_boolfn(self.spec.functions[t], &mut q0, &mut q1, &mut q2, &mut f)
                .map_err(wrap)?;
            narrowed |= propagate_add(&mut q3, &mut f, &mut u).map_err(wrap)?;
            narrowed |= propagate_add(&mut u, &mut m, &mut v).map_err(wrap)?;
            narrowed |= propagate_add(&mut v, &mut k, &mut sum).map_err(wrap)?;
            let mut rot = sum.rotl(s);
            narrowed |= propagate_add(&mut q0, &mut rot, &mut q_new).map_err(wrap)?;
            sum = rot.rotr(s);
            if !narrowed {
                break;
            }
        }

        let mut changed = false;
        changed |= path.meet_state(DifferentialPath::row(ti + 1), &q_new).map_err(wrap)?;
        changed |= path.meet_state(DifferentialPath::row(ti), &q0).map_err(wrap)?;
        changed |= path.meet_state(DifferentialPath::row(ti - 1), &q1).map_err(wrap)?;
        changed |= path.meet_state(DifferentialPath::row(ti - 2), &q2).map_err(wrap)?;
        changed |= path.meet_state(DifferentialPath::row(ti - 3), &q3).map_err(wrap)?;
        changed |= path.meet_message(word, &m).map_err(wrap)?;
        Ok(changed)
    }

    /// Steps whose window or message word overlaps step `t`.
    fn dependents(&self, t: usize) -> impl Iterator<Item = usize> + '_ {
        let lo = t.saturating_sub(4);
        let hi = (t + 4).min(self.spec.steps - 1);
        let word = self.spec.schedule[t];
        (lo..=hi)
            .filter(move |&u| u != t)
            .chain(
                (0..self.spec.steps)
                    .filter(move |&u| u != t && self.spec.schedule[u] == word)
                    .filter(move |&u| u < lo || u > hi),
            )
    }

    /// Steps whose equation involves the given tracked word.
    pub fn steps_touching(&self, word: WordRef) -> Vec<usize> {
        match word {
            WordRef::State(row) => {
                // Row holds Q[row - 3]; step t touches Q[t-3..=t+1].
                let q = row as isize - 3;
                (0..self.spec.steps)
                    .filter(|&t| {
                        let t = t as isize;
                        q >= t - 3 && q <= t + 1
                    })
                    .collect()
            }
            WordRef::Message(w) => {
                (0..self.spec.steps).filter(|&t| self.spec.schedule[t] == w).collect()
            }
        }
    }

    fn run_worklist(
        &self,
        path: &mut DifferentialPath,
        seed: impl IntoIterator<Item = usize>,
    ) -> Result<bool, Contradiction> {
        // Lowest step first keeps the propagation order reproducible.
        let mut dirty: BTreeSet<usize> = seed.into_iter().collect();
        let mut changed = false;
        while let Some(&t) = dirty.iter().next() {
            dirty.remove(&t);
            if self.propagate_step(path, t)? {
                changed = true;
                dirty.extend(self.dependents(t));
            }
        }
        Ok(changed)
    }

    /// Re-establish consistency after a change to the conditions of step
    /// `origin`. `Ok(true)` if anything narrowed beyond the change itself.
    pub fn propagate(
        &self,
        path: &mut DifferentialPath,
        origin: usize,
    ) -> Result<bool, Contradiction> {
        self.run_worklist(path, core::iter::once(origin).chain(self.dependents(origin)))
    }

    /// Re-establish consistency after a change to one tracked word.
    pub fn propagate_word(
        &self,
        path: &mut DifferentialPath,
        word: WordRef,
    ) -> Result<bool, Contradiction> {
        self.run_worklist(path, self.steps_touching(word))
    }

    /// Propagate every step to a global fixpoint.
    pub fn propagate_all(&self, path: &mut DifferentialPath) -> Result<bool, Contradiction> {
        self.run_worklist(path, 0..self.spec.steps)
    }
}
