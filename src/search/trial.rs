//! Trial records and the optimisation direction.

use std::cmp::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{FailureKind, TrialConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Maximize,
    Minimize,
}

impl Direction {
    /// Metric recorded for trials that did not complete.
    pub fn worst(&self) -> f64 {
        match self {
            Direction::Maximize => f64::NEG_INFINITY,
            Direction::Minimize => f64::INFINITY,
        }
    }

    /// Whether `candidate` is strictly better than `incumbent`.
    pub fn is_better(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Maximize => candidate > incumbent,
            Direction::Minimize => candidate < incumbent,
        }
    }

    /// Order metrics best first. NaN sorts last.
    pub fn compare(&self, a: f64, b: f64) -> Ordering {
        let ordering = match self {
            Direction::Maximize => b.partial_cmp(&a),
            Direction::Minimize => a.partial_cmp(&b),
        };
        ordering.unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub index: usize,
    pub config: TrialConfig,
    #[serde(with = "metric_value")]
    pub metric: f64,
    pub status: TrialStatus,
    pub failure: Option<TrialFailure>,
    pub elapsed_ms: u64,
}

impl TrialResult {
    pub fn pending(index: usize, config: TrialConfig, direction: Direction) -> Self {
        Self {
            index,
            config,
            metric: direction.worst(),
            status: TrialStatus::Pending,
            failure: None,
            elapsed_ms: 0,
        }
    }

    pub fn start(&mut self) {
        debug_assert_eq!(self.status, TrialStatus::Pending);
        self.status = TrialStatus::Running;
    }

    pub fn complete(&mut self, metric: f64, elapsed: Duration) {
        debug_assert_eq!(self.status, TrialStatus::Running);
        self.metric = metric;
        self.status = TrialStatus::Completed;
        self.elapsed_ms = elapsed.as_millis() as u64;
    }

    /// Mark the trial failed; `metric` keeps the direction's worst value.
    pub fn fail(&mut self, err: &anyhow::Error, elapsed: Duration) {
        debug_assert_eq!(self.status, TrialStatus::Running);
        self.status = TrialStatus::Failed;
        self.failure = Some(TrialFailure {
            kind: FailureKind::of(err),
            message: format!("{err:#}"),
        });
        self.elapsed_ms = elapsed.as_millis() as u64;
    }

    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

/// Best completed trial: extremal metric for `direction`, ties to the lowest index.
pub fn select_best(trials: &[TrialResult], direction: Direction) -> Option<&TrialResult> {
    trials
        .iter()
        .filter(|t| t.is_completed() && !t.metric.is_nan())
        .fold(None, |best: Option<&TrialResult>, trial| match best {
            Some(incumbent) if !direction.is_better(trial.metric, incumbent.metric) => {
                if trial.index < incumbent.index && trial.metric == incumbent.metric {
                    Some(trial)
                } else {
                    Some(incumbent)
                }
            }
            _ => Some(trial),
        })
}

/// JSON has no infinities, so non-finite metrics travel as strings.
mod metric_value {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = if value.is_finite() {
            Repr::Number(*value)
        } else {
            Repr::Text(value.to_string())
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
