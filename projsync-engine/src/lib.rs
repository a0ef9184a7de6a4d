//! # projsync-engine
//!
//! Baseline tracking and the per-cycle reconciliation of identity sets.
//!
//! [`Engine::run_cycle`] reads every adapter, works out which identities are
//! new since the baselines were captured, creates them where they are missing
//! and advances the baselines past everything that was confirmed. [`plan`]
//! is the side-effect-free half of that computation and is shared with
//! `projsync check`.

pub mod baseline;
pub mod engine;
pub mod failures;
pub mod plan;

pub use baseline::{BaselineState, BaselineTracker};
pub use engine::{CycleReport, Engine, SourceOutcome};
pub use failures::FailureSet;
pub use plan::{plan, Plan, SkipReason, Snapshot};
