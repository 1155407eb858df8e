use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::error::SetFitError;
use super::params::{Hyperparameter, TrialConfig};

/// Options driving a single training run (pair sampling + contrastive tuning).
///
/// Head options (`max_iter`, `solver`) and `model_id` belong to the model
/// factory, not to these arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingArguments {
    pub batch_size: usize,
    /// Pair-generation rounds: each round yields one positive and one
    /// negative pair per training example.
    pub num_iterations: usize,
    pub num_epochs: usize,
    pub learning_rate: f64,
    /// Fraction of optimizer steps spent linearly warming up the learning rate.
    pub warmup_proportion: f64,
    pub weight_decay: f64,
    pub seed: u64,
}

impl Default for TrainingArguments {
    fn default() -> Self {
        Self {
            batch_size: 16,
            num_iterations: 20,
            num_epochs: 1,
            learning_rate: 2e-5,
            warmup_proportion: 0.1,
            weight_decay: 0.01,
            seed: 42,
        }
    }
}

impl TrainingArguments {
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn num_iterations(mut self, num_iterations: usize) -> Self {
        self.num_iterations = num_iterations;
        self
    }

    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn warmup_proportion(mut self, warmup_proportion: f64) -> Self {
        self.warmup_proportion = warmup_proportion;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Return a copy with every trainer option present in `config` applied.
    pub fn apply(&self, config: &TrialConfig) -> anyhow::Result<Self> {
        let mut args = self.clone();
        if let Some(v) = config.positive_usize(Hyperparameter::BatchSize)? {
            args.batch_size = v;
        }
        if let Some(v) = config.positive_usize(Hyperparameter::NumIterations)? {
            args.num_iterations = v;
        }
        if let Some(v) = config.positive_usize(Hyperparameter::NumEpochs)? {
            args.num_epochs = v;
        }
        if let Some(v) = config.float(Hyperparameter::LearningRate)? {
            args.learning_rate = v;
        }
        if let Some(v) = config.float(Hyperparameter::WarmupProportion)? {
            args.warmup_proportion = v;
        }
        if let Some(v) = config.u64(Hyperparameter::Seed)? {
            args.seed = v;
        }
        args.validate()?;
        Ok(args)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 || self.num_iterations == 0 || self.num_epochs == 0 {
            return Err(SetFitError::InvalidConfig(
                "batch_size, num_iterations and num_epochs must be positive".into(),
            )
            .into());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(SetFitError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ))
            .into());
        }
        if !(0.0..=1.0).contains(&self.warmup_proportion) {
            return Err(SetFitError::InvalidConfig(format!(
                "warmup_proportion must lie in [0, 1], got {}",
                self.warmup_proportion
            ))
            .into());
        }
        Ok(())
    }
}

/// Cooperative wall-clock limit checked between optimizer steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    limit: Option<(Instant, Duration)>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(limit: Duration) -> Self {
        Self {
            limit: Some((Instant::now() + limit, limit)),
        }
    }

    pub fn from_option(limit: Option<Duration>) -> Self {
        limit.map_or_else(Self::none, Self::after)
    }

    pub fn is_expired(&self) -> bool {
        self.limit.is_some_and(|(at, _)| Instant::now() >= at)
    }

    pub fn check(&self) -> anyhow::Result<()> {
        match self.limit {
            Some((at, limit)) if Instant::now() >= at => {
                Err(SetFitError::TrialTimeout { limit }.into())
            }
            _ => Ok(()),
        }
    }
}
