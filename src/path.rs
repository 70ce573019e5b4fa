//! Differential paths: per-step bit conditions over the state and message
//! words of a compression-function pair.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::arx::{ArxSpec, SeedDifferential};
use crate::bitcond::{BitCondition, Clash, CondWord};
use crate::error::Error;

/// A tracked word of the path: a state row (`State(i)` holds `Q[i-3]`) or a
/// message word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WordRef {
    State(usize),
    Message(usize),
}

/// One bit of one tracked word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub word: WordRef,
    pub bit: usize,
}

/// Conditions relevant to a single step: the state word it produces and the
/// message word it consumes.
#[derive(Clone, Copy, Debug)]
pub struct StepConditions<'a> {
    pub state: &'a CondWord,
    pub message: &'a CondWord,
    pub message_word: usize,
}

/// Ordered bit conditions for a full differential pair.
///
/// State rows cover `Q[-3..=steps]` (row `i` holds `Q[i-3]`); message
/// conditions are stored once per message word, so a schedule that reuses a
/// word cannot hold two divergent conditions for the same bit.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferentialPath {
    pub(crate) state: Vec<CondWord>,
    pub(crate) message: Vec<CondWord>,
}

impl DifferentialPath {
    /// Number of state rows for a spec with `steps` steps.
    pub(crate) fn rows_for(steps: usize) -> usize {
        steps + 4
    }

    /// Row index of `Q[t]`.
    pub(crate) fn row(t: isize) -> usize {
        debug_assert!(t >= -3);
        (t + 3) as usize
    }

    /// Build the starting path for a seed differential: chaining bits become
    /// singletons, message bits equal/differ, everything else free.
    pub fn seeded(spec: &ArxSpec, seed: &SeedDifferential) -> Result<Self, Error> {
        spec.validate()?;
        if seed.message_xor.len() != spec.message_words {
            return Err(Error::InvalidSpec("seed XOR pattern length mismatch"));
        }
        let mut state = vec![CondWord::free(); Self::rows_for(spec.steps)];
        // Q[-3..=0] = a, d, c, b, matching the compress unpacking.
        for (row, word) in [(0usize, 0usize), (1, 3), (2, 2), (3, 1)] {
            state[row] = CondWord::from_pair(seed.iv_first[word], seed.iv_second[word]);
        }
        let message = seed.message_xor.iter().map(|&x| CondWord::from_xor(x)).collect();
        Ok(Self { state, message })
    }

    pub fn steps(&self) -> usize {
        self.state.len() - 4
    }

    pub fn state_rows(&self) -> &[CondWord] {
        &self.state
    }

    pub fn message_words(&self) -> &[CondWord] {
        &self.message
    }

    /// Conditions on `Q[t]`, `t` in `-3..=steps`.
    pub fn q(&self, t: isize) -> &CondWord {
        &self.state[Self::row(t)]
    }

    pub fn step_conditions<'a>(&'a self, spec: &ArxSpec, t: usize) -> StepConditions<'a> {
        let word = spec.schedule[t];
        StepConditions {
            state: &self.state[Self::row(t as isize + 1)],
            message: &self.message[word],
            message_word: word,
        }
    }

    pub fn get(&self, cell: Cell) -> BitCondition {
        match cell.word {
            WordRef::State(i) => self.state[i].get(cell.bit),
            WordRef::Message(w) => self.message[w].get(cell.bit),
        }
    }

    /// Refine one cell; `Ok(true)` if the stored condition narrowed.
    pub fn meet_cell(&mut self, cell: Cell, cond: BitCondition) -> Result<bool, Clash> {
        match cell.word {
            WordRef::State(i) => self.state[i].meet_at(cell.bit, cond),
            WordRef::Message(w) => self.message[w].meet_at(cell.bit, cond),
        }
    }

    pub(crate) fn meet_state(&mut self, row: usize, word: &CondWord) -> Result<bool, Clash> {
        self.state[row].meet(word)
    }

    pub(crate) fn meet_message(&mut self, word: usize, cond: &CondWord) -> Result<bool, Clash> {
        self.message[word].meet(cond)
    }

    /// Cells of step `t` whose difference is still open, in the branching
    /// order: produced state word first, then the consumed message word,
    /// lowest bit first.
    pub fn undetermined_in_step(&self, spec: &ArxSpec, t: usize) -> Vec<Cell> {
        let state_row = Self::row(t as isize + 1);
        let word = spec.schedule[t];
        let mut cells: Vec<Cell> = self.state[state_row]
            .undetermined_bits()
            .map(|bit| Cell { word: WordRef::State(state_row), bit })
            .collect();
        cells.extend(
            self.message[word]
                .undetermined_bits()
                .map(|bit| Cell { word: WordRef::Message(word), bit }),
        );
        cells
    }

    pub fn is_step_determined(&self, spec: &ArxSpec, t: usize) -> bool {
        self.undetermined_in_step(spec, t).is_empty()
    }

    /// Every scheduled cell's branch relation is decided.
    pub fn is_complete(&self, spec: &ArxSpec) -> bool {
        (0..spec.steps).all(|t| self.is_step_determined(spec, t))
    }

    pub fn contains_contradiction(&self) -> bool {
        self.state.iter().chain(self.message.iter()).any(|w| w.contains_contradiction())
    }

    /// Concrete IV pair recovered from the chaining rows, if fully pinned.
    pub fn initial_pair(&self) -> Option<([u32; 4], [u32; 4])> {
        let (a0, a1) = self.state[0].exact_pair()?;
        let (d0, d1) = self.state[1].exact_pair()?;
        let (c0, c1) = self.state[2].exact_pair()?;
        let (b0, b1) = self.state[3].exact_pair()?;
        Some(([a0, b0, c0, d0], [a1, b1, c1, d1]))
    }

    /// Number of constrained state bits past the chaining rows; a rough
    /// `-log2` of the chance a random message realizes the path.
    pub fn condition_weight(&self) -> u32 {
        self.state[4..].iter().map(CondWord::constrained_bits).sum()
    }
}

impl fmt::Display for DifferentialPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, word) in self.state.iter().enumerate() {
            writeln!(f, "Q{:>3}: {}", i as isize - 3, word)?;
        }
        for (w, word) in self.message.iter().enumerate() {
            writeln!(f, "m{:>3}: {}", w, word)?;
        }
        Ok(())
    }
}

impl fmt::Debug for DifferentialPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DifferentialPath[{} steps]\n{self}", self.steps())
    }
}
