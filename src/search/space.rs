//! Typed search spaces.
//!
//! A [`SearchSpace`] maps each searched [`Hyperparameter`] to the
//! [`Distribution`] it is drawn from. In JSON it is a plain object:
//!
//! ```json
//! {
//!   "learning_rate": {"continuous_log": {"low": 1e-5, "high": 1e-3}},
//!   "num_epochs": {"int_range": {"low": 1, "high": 3}},
//!   "solver": {"categorical": {"values": ["sgd", "adamw"]}}
//! }
//! ```

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::{Hyperparameter, ParamValue, SetFitError, TrialConfig, ValueKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    /// Log-uniform over `[low, high]`, both strictly positive.
    ContinuousLog { low: f64, high: f64 },
    /// Uniform over the integers `low..=high`.
    IntRange { low: i64, high: i64 },
    /// Uniform over a fixed list of values.
    Categorical { values: Vec<ParamValue> },
}

impl Distribution {
    pub fn log_uniform(low: f64, high: f64) -> Self {
        Distribution::ContinuousLog { low, high }
    }

    pub fn int_range(low: i64, high: i64) -> Self {
        Distribution::IntRange { low, high }
    }

    pub fn categorical<V: Into<ParamValue>>(values: impl IntoIterator<Item = V>) -> Self {
        Distribution::Categorical {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn check(&self, param: Hyperparameter) -> anyhow::Result<()> {
        let kind = param.kind();
        let problem = match self {
            Distribution::ContinuousLog { .. } if kind != ValueKind::Float => {
                Some("a log-uniform range only fits float options".to_string())
            }
            Distribution::ContinuousLog { low, high } => {
                let ok = low.is_finite() && high.is_finite() && *low > 0.0 && low <= high;
                (!ok).then(|| format!("needs 0 < low <= high, got [{low}, {high}]"))
            }
            Distribution::IntRange { .. } if kind != ValueKind::Int => {
                Some("an integer range only fits integer options".to_string())
            }
            Distribution::IntRange { low, high } => {
                (low > high).then(|| format!("needs low <= high, got [{low}, {high}]"))
            }
            Distribution::Categorical { values } if values.is_empty() => {
                Some("needs at least one value".to_string())
            }
            Distribution::Categorical { values } => values
                .iter()
                .find(|v| !v.fits(kind))
                .map(|v| format!("value {v} does not fit a {kind:?} option")),
        };
        let problem = problem.or_else(|| {
            self.bounds()
                .into_iter()
                .find(|v| !param.admits(v))
                .map(|v| format!("value {v} is out of range"))
        });
        match problem {
            Some(problem) => Err(SetFitError::InvalidConfig(format!("{param}: {problem}")).into()),
            None => Ok(()),
        }
    }

    /// Values that must satisfy the option's bounds for every draw to do so.
    fn bounds(&self) -> Vec<ParamValue> {
        match self {
            Distribution::ContinuousLog { low, high } => {
                vec![ParamValue::Float(*low), ParamValue::Float(*high)]
            }
            Distribution::IntRange { low, high } => {
                vec![ParamValue::Int(*low), ParamValue::Int(*high)]
            }
            Distribution::Categorical { values } => values.clone(),
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> ParamValue {
        match self {
            Distribution::ContinuousLog { low, high } => {
                let (log_low, log_high) = (low.ln(), high.ln());
                let value = (log_low + rng.random::<f64>() * (log_high - log_low)).exp();
                ParamValue::Float(value.clamp(*low, *high))
            }
            Distribution::IntRange { low, high } => ParamValue::Int(rng.random_range(*low..=*high)),
            Distribution::Categorical { values } => {
                values[rng.random_range(0..values.len())].clone()
            }
        }
    }

    /// Number of values grid search visits. Log ranges are cut into `points`
    /// geometrically spaced values; integer ranges and categories are
    /// enumerated in full.
    pub fn grid_len(&self, points: usize) -> u128 {
        match self {
            Distribution::ContinuousLog { low, high } => {
                if points <= 1 || low == high {
                    1
                } else {
                    points as u128
                }
            }
            Distribution::IntRange { low, high } => (*high as i128 - *low as i128 + 1) as u128,
            Distribution::Categorical { values } => values.len() as u128,
        }
    }

    /// The `i`-th grid value; `i` must be below [`Self::grid_len`].
    fn grid_value(&self, points: usize, i: u128) -> ParamValue {
        match self {
            Distribution::ContinuousLog { low, high } => {
                if points <= 1 || low == high {
                    return ParamValue::Float(*low);
                }
                let t = i as f64 / (points - 1) as f64;
                let value = (low.ln() + t * (high.ln() - low.ln())).exp();
                ParamValue::Float(value.clamp(*low, *high))
            }
            Distribution::IntRange { low, .. } => ParamValue::Int((*low as i128 + i as i128) as i64),
            Distribution::Categorical { values } => values[i as usize].clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchSpace {
    dims: BTreeMap<Hyperparameter, Distribution>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a dimension after checking it fits the option.
    pub fn add(&mut self, param: Hyperparameter, distribution: Distribution) -> anyhow::Result<()> {
        distribution.check(param)?;
        self.dims.insert(param, distribution);
        Ok(())
    }

    pub fn with(mut self, param: Hyperparameter, distribution: Distribution) -> anyhow::Result<Self> {
        self.add(param, distribution)?;
        Ok(self)
    }

    /// Parse and validate the JSON form.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let space: SearchSpace = serde_json::from_str(json)
            .map_err(|e| SetFitError::InvalidConfig(format!("search space: {e}")))?;
        space.validate()?;
        Ok(space)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (param, distribution) in &self.dims {
            distribution.check(*param)?;
        }
        Ok(())
    }

    pub fn get(&self, param: Hyperparameter) -> Option<&Distribution> {
        self.dims.get(&param)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hyperparameter, &Distribution)> {
        self.dims.iter()
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Draw every dimension independently.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> TrialConfig {
        let mut config = TrialConfig::new();
        for (param, distribution) in &self.dims {
            config.insert(*param, distribution.sample(rng));
        }
        config
    }

    /// Size of the full cartesian product, saturating at `u128::MAX`.
    pub fn grid_len(&self, points: usize) -> u128 {
        self.dims
            .values()
            .map(|d| d.grid_len(points))
            .fold(1, u128::saturating_mul)
    }

    /// The `index`-th point of the cartesian product in dimension order, last
    /// dimension fastest. Decoded on demand, so huge ranges cost nothing until
    /// visited.
    pub fn grid_point(&self, points: usize, index: u128) -> Option<TrialConfig> {
        if index >= self.grid_len(points) {
            return None;
        }
        let mut rest = index;
        let mut config = TrialConfig::new();
        for (param, distribution) in self.dims.iter().rev() {
            let len = distribution.grid_len(points);
            config.insert(*param, distribution.grid_value(points, rest % len));
            rest /= len;
        }
        Some(config)
    }

    pub fn grid(&self, points: usize) -> impl Iterator<Item = TrialConfig> + '_ {
        (0..self.grid_len(points)).map_while(move |i| self.grid_point(points, i))
    }
}
