//! Match-state tracking: normalization, timing arithmetic, reconciliation.

pub mod engine;
pub mod events;
pub mod normalizer;
pub mod timing;

pub use engine::{
    EngineConfig, PruneSummary, Reconciliation, ReconciliationEngine, SnapshotOutcome, Transition,
};
pub use events::{apply_timeline_check, check_goal_timeline, TimelineCheck};
pub use normalizer::{normalize, normalize_all};
