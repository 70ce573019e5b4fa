//! Differential-path construction and parallel collision search for ARX
//! compression functions of the MD4/MD5 lineage.
//!
//! The pipeline: seed a [`DifferentialPath`] from a [`SeedDifferential`],
//! complete it with [`PathConstructor`] (backtracking over bit-condition
//! refinements, consequences pushed by [`Propagator`]), solve the message
//! equations into a [`MessageTemplate`], then hammer the template with a
//! [`WorkerPool`] of randomized [`TrialEngine`] streams until a verified
//! [`CollisionResult`] appears or the budget runs out.
//!
//! Path construction failures and search exhaustion are ordinary outcomes of
//! cryptanalysis and come back as typed errors; only
//! [`Error::UnsolvableTemplate`] signals a broken internal invariant.

mod arx;
mod bitcond;
mod construct;
mod engine;
mod error;
mod path;
mod printer;
mod propagate;
mod search;
mod solver;
mod stats;

pub use crate::arx::{ArxSpec, BoolFn, SeedDifferential};
pub use crate::bitcond::{BitCondition, Clash, CondWord};
pub use crate::construct::{ConstructorCheckpoint, PathConstructor, Progress};
pub use crate::engine::{verify_collision, CollisionResult, TrialEngine, TrialOutcome};
pub use crate::error::Error;
pub use crate::path::{Cell, DifferentialPath, StepConditions, WordRef};
pub use crate::printer::progress_printer;
pub use crate::propagate::{Contradiction, Propagator};
pub use crate::search::{SearchBudget, SearchState, StopSignal, WorkerPool};
pub use crate::solver::{solve, BitFormula, FreeBits, MessageTemplate};
pub use crate::stats::SearchSnapshot;
