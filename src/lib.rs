//! nof1-engine - staging and analysis engine for adaptive single-subject
//! (N-of-1) behavioral experiments
//!
//! The engine walks a participant through a fixed sequence of stages: an
//! unconstrained baseline that characterizes the subject's natural range of
//! a controllable daily behavior, then several stages with assigned daily
//! targets. Day by day it decides whether a stage has enough valid data to
//! advance or must restart, and at the end which target produced the best
//! self-reported outcome, with a confidence score derived from
//! distributional overlap.
//!
//! ## Modules
//!
//! - **aggregate**: one-scalar-per-day extraction from irregular interval
//!   events (duration overlap, sleep efficiency, first start, daily totals)
//! - **strategy**: the four experiment types and their policy constants
//! - **stage**: the stage state machine and result calculation
//! - **service**: the engine's external operations over a [`store::DataStore`]
//! - **feed**: tracker-feed parsing and idempotent event sync

pub mod aggregate;
pub mod error;
pub mod feed;
pub mod service;
pub mod stage;
pub mod store;
pub mod strategy;
pub mod types;

pub use error::EngineError;
pub use service::{CheckinInput, CheckinOutcome, ExperimentService, StageView};
pub use stage::{StageDecision, StageEngine};
pub use store::{DataStore, MemoryStore};
pub use types::{
    ActivityEvent, ActivityKind, CheckinRecord, EfficacyScores, ExperimentRecord,
    ExperimentSummary, ExperimentType, SubjectProfile,
};

/// Engine version embedded in CLI output
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
