pub mod cache;
pub mod config;
pub mod error;
pub mod params;

pub use cache::{global_cache, ModelCache, ModelOptions};
pub use config::{Deadline, TrainingArguments};
pub use error::{FailureKind, SetFitError};
pub use params::{Hyperparameter, ParamValue, TrialConfig, ValueKind};
