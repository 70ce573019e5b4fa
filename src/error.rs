//! Crate-level error taxonomy.
//!
//! Path contradictions are recovered locally by backtracking and only reach
//! this enum when an input is inconsistent from the start; search and path
//! exhaustion are ordinary negative results, while `UnsolvableTemplate`
//! signals a broken internal invariant and should halt the caller loudly.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The seed differential forces incompatible conditions on some bit.
    #[error("contradictory bit conditions at step {step}, bit {bit}")]
    PathContradiction { step: usize, bit: usize },

    /// Every refinement of the seed differential was tried.
    #[error("differential path search exhausted after {backtracks} backtracks")]
    PathExhausted { backtracks: u64 },

    /// A message bit of an allegedly complete path could not be pinned to a
    /// constant or a free bit. Indicates a propagation bug, not a user error.
    #[error("message word {word} bit {bit} cannot be resolved from the path")]
    UnsolvableTemplate { word: usize, bit: usize },

    /// Trial or time budget ran out without a verified collision.
    #[error("collision search exhausted after {trials} trials (best depth {best_depth})")]
    SearchExhausted { trials: u64, best_depth: usize },

    /// Malformed compression-function tables or seed differential.
    #[error("invalid compression spec: {0}")]
    InvalidSpec(&'static str),
}
