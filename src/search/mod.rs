//! Hyperparameter search over SetFit training runs.
//!
//! [`HpOrchestrator`] drives the trials, a [`ConfigSampler`] chooses their
//! configurations from a [`SearchSpace`] and every outcome is kept as a
//! [`TrialResult`].

pub mod orchestrator;
pub mod sampler;
pub mod space;
pub mod trial;

pub use orchestrator::{HpOrchestrator, SearchOutcome, SearchSettings, TrainedArtifact};
pub use sampler::{ConfigSampler, GridSampler, RandomSampler, SamplerKind, TpeSampler};
pub use space::{Distribution, SearchSpace};
pub use trial::{select_best, Direction, TrialFailure, TrialResult, TrialStatus};
