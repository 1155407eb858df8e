//! The hyperparameter search loop.
//!
//! Each trial takes a configuration from the sampler, asks the model factory
//! for a fresh pipeline, trains it with the configured [`Trainer`] and scores
//! it on the held-out set. Trials never share learned parameters, and
//! results are attributed by trial index, so running trials on several
//! workers gives the same records as running them one by one.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::{Deadline, FailureKind, SetFitError, TrainingArguments, TrialConfig};
use crate::pipelines::setfit_pipeline::{ModelInit, SentenceEncoder, SetFitModel};
use crate::search::sampler::{ConfigSampler, SamplerKind};
use crate::search::space::SearchSpace;
use crate::search::trial::{select_best, Direction, TrialResult};
use crate::training::{Dataset, Evaluator, Metric, PairSampler, TrainReport, Trainer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub n_trials: usize,
    pub direction: Direction,
    pub metric: Metric,
    pub sampler: SamplerKind,
    /// Seeds the config sampler only; training randomness comes from the
    /// trial's own `seed` option.
    pub seed: u64,
    pub trial_timeout: Option<Duration>,
    /// Trials run concurrently in waves of this size.
    pub n_workers: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            n_trials: 10,
            direction: Direction::Maximize,
            metric: Metric::Accuracy,
            sampler: SamplerKind::Random,
            seed: 42,
            trial_timeout: None,
            n_workers: 1,
        }
    }
}

impl SearchSettings {
    pub fn n_trials(mut self, n_trials: usize) -> Self {
        self.n_trials = n_trials;
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn sampler(mut self, sampler: SamplerKind) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn trial_timeout(mut self, limit: Duration) -> Self {
        self.trial_timeout = Some(limit);
        self
    }

    pub fn n_workers(mut self, n_workers: usize) -> Self {
        self.n_workers = n_workers;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.n_trials == 0 || self.n_workers == 0 {
            return Err(SetFitError::InvalidConfig(
                "n_trials and n_workers must be positive".into(),
            )
            .into());
        }
        Ok(())
    }
}

/// Every trial in index order plus the best completed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub best: TrialResult,
    pub trials: Vec<TrialResult>,
    pub direction: Direction,
    pub metric: Metric,
}

impl SearchOutcome {
    pub fn best_config(&self) -> &TrialConfig {
        &self.best.config
    }

    pub fn best_metric(&self) -> f64 {
        self.best.metric
    }

    pub fn completed(&self) -> impl Iterator<Item = &TrialResult> {
        self.trials.iter().filter(|t| t.is_completed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TrialResult> {
        self.trials.iter().filter(|t| !t.is_completed())
    }
}

/// A pipeline trained with one configuration, ready for prediction.
pub struct TrainedArtifact<M: SentenceEncoder> {
    pub model: SetFitModel<M>,
    pub config: TrialConfig,
    pub metric: f64,
    pub report: TrainReport,
}

pub struct HpOrchestrator {
    space: SearchSpace,
    settings: SearchSettings,
    args: TrainingArguments,
}

impl HpOrchestrator {
    pub fn new(space: SearchSpace, settings: SearchSettings) -> Self {
        Self {
            space,
            settings,
            args: TrainingArguments::default(),
        }
    }

    /// Base training arguments; trial configurations override them.
    pub fn training_arguments(mut self, args: TrainingArguments) -> Self {
        self.args = args;
        self
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    /// Run the search with the sampler named in the settings.
    pub fn search<M, F>(&self, factory: &F, train: &Dataset, test: &Dataset) -> anyhow::Result<SearchOutcome>
    where
        M: SentenceEncoder,
        F: ModelInit<M>,
    {
        let mut sampler = self.settings.sampler.build(self.settings.seed);
        self.search_with(sampler.as_mut(), factory, train, test)
    }

    /// Run the search with a caller-supplied sampler.
    pub fn search_with<M, F>(
        &self,
        sampler: &mut dyn ConfigSampler,
        factory: &F,
        train: &Dataset,
        test: &Dataset,
    ) -> anyhow::Result<SearchOutcome>
    where
        M: SentenceEncoder,
        F: ModelInit<M>,
    {
        self.settings.validate()?;
        self.space.validate()?;
        self.args.validate()?;
        // Dataset problems would fail every trial the same way.
        PairSampler::check(train)?;
        if test.is_empty() {
            return Err(SetFitError::EmptyDataset("test".into()).into());
        }

        tracing::info!(
            n_trials = self.settings.n_trials,
            sampler = sampler.name(),
            direction = ?self.settings.direction,
            metric = %self.settings.metric,
            workers = self.settings.n_workers,
            "starting hyperparameter search"
        );

        let mut trials: Vec<TrialResult> = Vec::with_capacity(self.settings.n_trials);
        let mut exhausted = false;
        while !exhausted && trials.len() < self.settings.n_trials {
            let wave_size = self
                .settings
                .n_workers
                .min(self.settings.n_trials - trials.len());
            let mut wave = Vec::with_capacity(wave_size);
            for _ in 0..wave_size {
                match sampler.propose(&self.space, &trials, self.settings.direction)? {
                    Some(config) => wave.push(TrialResult::pending(
                        trials.len() + wave.len(),
                        config,
                        self.settings.direction,
                    )),
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if exhausted {
                tracing::debug!(proposed = trials.len() + wave.len(), "sampler exhausted");
            }
            trials.extend(self.run_wave(factory, wave, train, test));
        }

        let Some(best) = select_best(&trials, self.settings.direction).cloned() else {
            let most_common = most_common_failure(&trials);
            tracing::warn!(attempted = trials.len(), %most_common, "every trial failed");
            return Err(SetFitError::SearchExhausted {
                attempted: trials.len(),
                most_common,
            }
            .into());
        };

        tracing::info!(
            best_trial = best.index,
            best_metric = best.metric,
            config = %best.config,
            completed = trials.iter().filter(|t| t.is_completed()).count(),
            attempted = trials.len(),
            "hyperparameter search finished"
        );

        Ok(SearchOutcome {
            best,
            trials,
            direction: self.settings.direction,
            metric: self.settings.metric,
        })
    }

    fn run_wave<M, F>(
        &self,
        factory: &F,
        wave: Vec<TrialResult>,
        train: &Dataset,
        test: &Dataset,
    ) -> Vec<TrialResult>
    where
        M: SentenceEncoder,
        F: ModelInit<M>,
    {
        if wave.len() <= 1 {
            return wave
                .into_iter()
                .map(|trial| {
                    let fallback = trial.clone();
                    catch_unwind(AssertUnwindSafe(|| self.run_trial(factory, trial, train, test)))
                        .unwrap_or_else(|_| panicked(fallback))
                })
                .collect();
        }

        std::thread::scope(|scope| {
            let handles: Vec<_> = wave
                .into_iter()
                .map(|trial| {
                    let fallback = trial.clone();
                    let handle = scope.spawn(move || self.run_trial(factory, trial, train, test));
                    (fallback, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(fallback, handle)| handle.join().unwrap_or_else(|_| panicked(fallback)))
                .collect()
        })
    }

    fn run_trial<M, F>(
        &self,
        factory: &F,
        mut trial: TrialResult,
        train: &Dataset,
        test: &Dataset,
    ) -> TrialResult
    where
        M: SentenceEncoder,
        F: ModelInit<M>,
    {
        trial.start();
        let started = Instant::now();
        match self.train_config(factory, &trial.config, train, test) {
            Ok(artifact) => {
                trial.complete(artifact.metric, started.elapsed());
                tracing::info!(
                    trial = trial.index,
                    metric = artifact.metric,
                    config = %trial.config,
                    elapsed_ms = trial.elapsed_ms,
                    "trial completed"
                );
            }
            Err(err) => {
                trial.fail(&err, started.elapsed());
                tracing::warn!(
                    trial = trial.index,
                    kind = %FailureKind::of(&err),
                    error = %format!("{err:#}"),
                    config = %trial.config,
                    "trial failed"
                );
            }
        }
        trial
    }

    /// One trial's work: fresh model, training, evaluation.
    fn train_config<M, F>(
        &self,
        factory: &F,
        config: &TrialConfig,
        train: &Dataset,
        test: &Dataset,
    ) -> anyhow::Result<TrainedArtifact<M>>
    where
        M: SentenceEncoder,
        F: ModelInit<M>,
    {
        let deadline = Deadline::from_option(self.settings.trial_timeout);
        let args = self.args.apply(config)?;
        let mut model = factory.init(config)?;
        let report = Trainer::new(args).train(&mut model, train, &deadline)?;
        let metric = Evaluator::evaluate_within(&model, test, self.settings.metric, &deadline)?;
        Ok(TrainedArtifact {
            model,
            config: config.clone(),
            metric,
            report,
        })
    }

    /// Retrain one pipeline with `config` through the same path a trial takes.
    pub fn apply_best<M, F>(
        &self,
        factory: &F,
        config: &TrialConfig,
        train: &Dataset,
        test: &Dataset,
    ) -> anyhow::Result<TrainedArtifact<M>>
    where
        M: SentenceEncoder,
        F: ModelInit<M>,
    {
        let artifact = self.train_config(factory, config, train, test)?;
        tracing::info!(metric = artifact.metric, config = %config, "retrained best configuration");
        Ok(artifact)
    }
}

/// Record a trial whose run panicked.
fn panicked(mut trial: TrialResult) -> TrialResult {
    tracing::warn!(trial = trial.index, config = %trial.config, "trial panicked");
    trial.start();
    trial.fail(&anyhow::anyhow!("trial panicked"), Duration::ZERO);
    trial
}

/// Most frequent failure kind; ties go to the kind listed first.
fn most_common_failure(trials: &[TrialResult]) -> FailureKind {
    let mut counts: BTreeMap<FailureKind, usize> = BTreeMap::new();
    for kind in trials.iter().filter_map(TrialResult::failure_kind) {
        *counts.entry(kind).or_default() += 1;
    }
    let mut best = (FailureKind::Error, 0);
    for (kind, count) in counts {
        if count > best.1 {
            best = (kind, count);
        }
    }
    best.0
}
