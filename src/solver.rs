//! Turns a complete path into a parameterized message template.
//!
//! Every message bit of a complete path is either pinned to a constant or
//! left free; the second branch of a bit is always a constant or a
//! copy/negation of the first branch, because completeness fixes the XOR
//! difference of every scheduled cell.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::arx::ArxSpec;
use crate::error::Error;
use crate::path::DifferentialPath;

/// How one message bit of one branch is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitFormula {
    /// Fixed by the path.
    Const(bool),
    /// Drawn from the free-bit vector.
    Free(u16),
    /// Copy (or negation) of a free bit assigned to the other branch.
    Alias { slot: u16, invert: bool },
}

/// Per-word bit formulas in packed form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordTemplate {
    fixed_value: u32,
    fixed_mask: u32,
    /// `(bit, slot)` for every free bit, lowest bit first.
    free_slots: Vec<(u8, u16)>,
    /// XOR between the branches.
    diff_mask: u32,
}

impl WordTemplate {
    fn instantiate_first(&self, free: &FreeBits) -> u32 {
        let mut value = self.fixed_value;
        for &(bit, slot) in &self.free_slots {
            value |= (free.get(slot) as u32) << bit;
        }
        value
    }
}

/// Assignment of the template's free bits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeBits {
    words: Vec<u64>,
    count: u16,
}

impl FreeBits {
    pub fn zeroed(count: u16) -> Self {
        Self { words: vec![0; (count as usize).div_ceil(64)], count }
    }

    pub fn sample<R: Rng + ?Sized>(count: u16, rng: &mut R) -> Self {
        let mut free = Self::zeroed(count);
        for word in &mut free.words {
            *word = rng.gen();
        }
        free
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    pub fn get(&self, slot: u16) -> bool {
        debug_assert!(slot < self.count);
        self.words[slot as usize / 64] >> (slot % 64) & 1 != 0
    }

    pub fn set(&mut self, slot: u16, value: bool) {
        debug_assert!(slot < self.count);
        let mask = 1u64 << (slot % 64);
        if value {
            self.words[slot as usize / 64] |= mask;
        } else {
            self.words[slot as usize / 64] &= !mask;
        }
    }
}

/// Parameterized description of both message blocks of the pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    words: Vec<WordTemplate>,
    free_count: u16,
}

impl MessageTemplate {
    pub fn free_count(&self) -> u16 {
        self.free_count
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Materialize both blocks for one free-bit assignment.
    pub fn instantiate(&self, free: &FreeBits) -> (Vec<u32>, Vec<u32>) {
        debug_assert_eq!(free.count(), self.free_count);
        let mut first = Vec::with_capacity(self.words.len());
        let mut second = Vec::with_capacity(self.words.len());
        for word in &self.words {
            let value = word.instantiate_first(free);
            first.push(value);
            second.push(value ^ word.diff_mask);
        }
        (first, second)
    }

    /// Formulas for both branches of one message bit.
    pub fn formula(&self, word: usize, bit: usize) -> (BitFormula, BitFormula) {
        let w = &self.words[word];
        let mask = 1u32 << bit;
        let differs = w.diff_mask & mask != 0;
        if w.fixed_mask & mask != 0 {
            let value = w.fixed_value & mask != 0;
            return (BitFormula::Const(value), BitFormula::Const(value ^ differs));
        }
        let slot = w
            .free_slots
            .iter()
            .find(|&&(b, _)| b as usize == bit)
            .map(|&(_, slot)| slot)
            .expect("bit is neither fixed nor free");
        (BitFormula::Free(slot), BitFormula::Alias { slot, invert: differs })
    }
}

/// Solve the per-bit message equations of a complete path.
///
/// Fails with [`Error::UnsolvableTemplate`] if any message bit's condition
/// does not pin its XOR difference — on a path the propagator accepted as
/// complete this indicates a broken invariant, not a user error.
pub fn solve(spec: &ArxSpec, path: &DifferentialPath) -> Result<MessageTemplate, Error> {
    debug_assert_eq!(path.message_words().len(), spec.message_words);
    let mut words = Vec::with_capacity(spec.message_words);
    let mut free_count: u16 = 0;
    for (w, cond_word) in path.message_words().iter().enumerate() {
        let mut template = WordTemplate {
            fixed_value: 0,
            fixed_mask: 0,
            free_slots: Vec::new(),
            diff_mask: 0,
        };
        for bit in 0..32 {
            let cond = cond_word.get(bit);
            let Some(diff) = cond.difference() else {
                return Err(Error::UnsolvableTemplate { word: w, bit });
            };
            template.diff_mask |= (diff as u32) << bit;
            match cond.first_value() {
                Some(value) => {
                    template.fixed_mask |= 1 << bit;
                    template.fixed_value |= (value as u32) << bit;
                }
                None => {
                    template.free_slots.push((bit as u8, free_count));
                    free_count += 1;
                }
            }
        }
        words.push(template);
    }
    Ok(MessageTemplate { words, free_count })
}
