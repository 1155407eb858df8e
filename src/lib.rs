pub mod core;
mod loaders;
pub mod models;
pub mod pipelines;
pub mod search;
pub mod training;

// Re-export core types
pub use core::{
    Deadline, FailureKind, Hyperparameter, ParamValue, SetFitError, TrainingArguments,
    TrialConfig,
};

// Re-export model and pipeline types for easier access
pub use models::{BertEncoder, BertOptions, HashedBagConfig, HashedBagEncoder};
pub use pipelines::setfit_pipeline::{
    ModelFactory, ModelInit, PretrainedEncoder, SentenceEncoder, SetFitModel, SetFitModelBuilder,
};
pub use search::{
    Direction, Distribution, HpOrchestrator, SamplerKind, SearchOutcome, SearchSettings,
    SearchSpace, TrialResult, TrialStatus,
};
pub use training::{
    Dataset, Evaluator, HeadParams, HeadSolver, LabeledExample, Metric, PairSampler, Trainer,
};
