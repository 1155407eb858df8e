use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain errors raised by the training pipeline and the hyperparameter search.
///
/// Every fallible operation in the crate returns `anyhow::Result`; these
/// variants travel inside the `anyhow::Error` and can be recovered with
/// `err.downcast_ref::<SetFitError>()`.
#[derive(Debug, Error)]
pub enum SetFitError {
    /// The training set cannot produce both positive and negative pairs.
    #[error("insufficient class samples: {0}")]
    InsufficientClassSamples(String),

    /// A dataset that must contain examples is empty.
    #[error("{0} dataset is empty")]
    EmptyDataset(String),

    /// A training loss diverged to NaN or infinity.
    #[error("non-finite loss {loss} at epoch {epoch}, step {step}")]
    NonFiniteLoss { epoch: usize, step: usize, loss: f32 },

    /// Prediction was requested from a head that has not been fitted.
    #[error("classification head is not fitted; call fit before predicting")]
    NotFitted,

    /// A trial exceeded its wall-clock budget.
    #[error("trial exceeded its time limit of {limit:?}")]
    TrialTimeout { limit: Duration },

    /// Every trial of a search failed.
    #[error("all {attempted} trials failed (most common failure: {most_common})")]
    SearchExhausted {
        attempted: usize,
        most_common: FailureKind,
    },

    /// A hyperparameter, search space or option value is malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested evaluation metric does not exist.
    #[error("unknown metric `{0}` (expected accuracy, f1, precision or recall)")]
    UnknownMetric(String),
}

impl SetFitError {
    /// Dataset-level errors make every trial impossible and abort a search.
    pub fn is_dataset_error(&self) -> bool {
        matches!(
            self,
            SetFitError::InsufficientClassSamples(_) | SetFitError::EmptyDataset(_)
        )
    }

    /// Failure kind recorded for a trial that stopped with this error.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SetFitError::NonFiniteLoss { .. } => FailureKind::NonFiniteLoss,
            SetFitError::TrialTimeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Error,
        }
    }
}

/// Why a trial ended in the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NonFiniteLoss,
    Timeout,
    Error,
}

impl FailureKind {
    /// Classify any error coming out of a trial run.
    pub fn of(err: &anyhow::Error) -> Self {
        err.downcast_ref::<SetFitError>()
            .map_or(FailureKind::Error, SetFitError::failure_kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NonFiniteLoss => "non_finite_loss",
            FailureKind::Timeout => "timeout",
            FailureKind::Error => "error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
