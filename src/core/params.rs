//! Typed hyperparameter names and values.
//!
//! Every option a trial may override is enumerated in [`Hyperparameter`], so
//! a misspelt name is rejected at parse time instead of being silently
//! ignored by the trainer.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::SetFitError;

/// Options recognised by the trainer and the model factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hyperparameter {
    BatchSize,
    NumIterations,
    NumEpochs,
    LearningRate,
    WarmupProportion,
    Seed,
    MaxIter,
    Solver,
    ModelId,
}

/// The value type an option accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    Text,
}

impl Hyperparameter {
    pub const ALL: [Hyperparameter; 9] = [
        Hyperparameter::BatchSize,
        Hyperparameter::NumIterations,
        Hyperparameter::NumEpochs,
        Hyperparameter::LearningRate,
        Hyperparameter::WarmupProportion,
        Hyperparameter::Seed,
        Hyperparameter::MaxIter,
        Hyperparameter::Solver,
        Hyperparameter::ModelId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hyperparameter::BatchSize => "batch_size",
            Hyperparameter::NumIterations => "num_iterations",
            Hyperparameter::NumEpochs => "num_epochs",
            Hyperparameter::LearningRate => "learning_rate",
            Hyperparameter::WarmupProportion => "warmup_proportion",
            Hyperparameter::Seed => "seed",
            Hyperparameter::MaxIter => "max_iter",
            Hyperparameter::Solver => "solver",
            Hyperparameter::ModelId => "model_id",
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Hyperparameter::BatchSize
            | Hyperparameter::NumIterations
            | Hyperparameter::NumEpochs
            | Hyperparameter::Seed
            | Hyperparameter::MaxIter => ValueKind::Int,
            Hyperparameter::LearningRate | Hyperparameter::WarmupProportion => ValueKind::Float,
            Hyperparameter::Solver | Hyperparameter::ModelId => ValueKind::Text,
        }
    }

    /// Smallest integer the option accepts.
    pub fn int_floor(&self) -> Option<i64> {
        match self {
            Hyperparameter::BatchSize
            | Hyperparameter::NumIterations
            | Hyperparameter::NumEpochs
            | Hyperparameter::MaxIter => Some(1),
            Hyperparameter::Seed => Some(0),
            _ => None,
        }
    }

    /// Closed interval a float option must lie in.
    pub fn float_bounds(&self) -> Option<(f64, f64)> {
        match self {
            Hyperparameter::WarmupProportion => Some((0.0, 1.0)),
            Hyperparameter::LearningRate => Some((f64::MIN_POSITIVE, f64::INFINITY)),
            _ => None,
        }
    }

    /// Whether `value` lies within the option's bounds. Kind mismatches are
    /// left to [`ParamValue::fits`].
    pub fn admits(&self, value: &ParamValue) -> bool {
        match value {
            ParamValue::Int(v) if self.kind() == ValueKind::Int => {
                self.int_floor().map_or(true, |floor| *v >= floor)
            }
            ParamValue::Int(_) | ParamValue::Float(_) => {
                match (value.as_float(), self.float_bounds()) {
                    (Some(v), Some((low, high))) => v.is_finite() && v >= low && v <= high,
                    _ => true,
                }
            }
            ParamValue::Text(_) => true,
        }
    }

    /// Whether the option is consumed by the model factory rather than the trainer.
    pub fn is_model_option(&self) -> bool {
        matches!(
            self,
            Hyperparameter::MaxIter | Hyperparameter::Solver | Hyperparameter::ModelId
        )
    }
}

impl FromStr for Hyperparameter {
    type Err = SetFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hyperparameter::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| SetFitError::InvalidConfig(format!("unknown hyperparameter `{s}`")))
    }
}

impl std::fmt::Display for Hyperparameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A concrete value drawn for one hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers widen to floats; text never converts.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value can be assigned to an option of `kind`.
    pub fn fits(&self, kind: ValueKind) -> bool {
        matches!(
            (self, kind),
            (ParamValue::Int(_), ValueKind::Int)
                | (ParamValue::Int(_) | ParamValue::Float(_), ValueKind::Float)
                | (ParamValue::Text(_), ValueKind::Text)
        )
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v:e}"),
            ParamValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// One sampled assignment of hyperparameters, immutable once proposed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialConfig {
    values: BTreeMap<Hyperparameter, ParamValue>,
}

impl TrialConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion used by samplers and tests.
    pub fn with(mut self, param: Hyperparameter, value: impl Into<ParamValue>) -> Self {
        self.values.insert(param, value.into());
        self
    }

    pub fn insert(&mut self, param: Hyperparameter, value: ParamValue) {
        self.values.insert(param, value);
    }

    pub fn get(&self, param: Hyperparameter) -> Option<&ParamValue> {
        self.values.get(&param)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hyperparameter, &ParamValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read a strictly positive integer option.
    pub fn positive_usize(&self, param: Hyperparameter) -> anyhow::Result<Option<usize>> {
        match self.get(param) {
            None => Ok(None),
            Some(value) => match value.as_int() {
                Some(v) if v > 0 => Ok(Some(v as usize)),
                _ => Err(invalid(param, value, "a positive integer")),
            },
        }
    }

    /// Read a non-negative integer option (seeds).
    pub fn u64(&self, param: Hyperparameter) -> anyhow::Result<Option<u64>> {
        match self.get(param) {
            None => Ok(None),
            Some(value) => match value.as_int() {
                Some(v) if v >= 0 => Ok(Some(v as u64)),
                _ => Err(invalid(param, value, "a non-negative integer")),
            },
        }
    }

    /// Read a finite float option.
    pub fn float(&self, param: Hyperparameter) -> anyhow::Result<Option<f64>> {
        match self.get(param) {
            None => Ok(None),
            Some(value) => match value.as_float() {
                Some(v) if v.is_finite() => Ok(Some(v)),
                _ => Err(invalid(param, value, "a finite number")),
            },
        }
    }

    pub fn text(&self, param: Hyperparameter) -> anyhow::Result<Option<&str>> {
        match self.get(param) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| invalid(param, value, "a string")),
        }
    }
}

impl std::fmt::Display for TrialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

fn invalid(param: Hyperparameter, value: &ParamValue, expected: &str) -> anyhow::Error {
    SetFitError::InvalidConfig(format!("{param} must be {expected}, got {value}")).into()
}
