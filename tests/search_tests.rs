mod common;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use candle_core::{Device, Tensor, Var};
use common::FlakyEncoder;
use setfit::core::{FailureKind, Hyperparameter, ParamValue, TrainingArguments, TrialConfig};
use setfit::training::Dataset;
use setfit::{
    Direction, Distribution, HashedBagEncoder, HeadParams, HpOrchestrator, ModelFactory,
    SamplerKind, SearchSettings, SearchSpace, SentenceEncoder, SetFitError, SetFitModel,
    TrialStatus,
};

fn quick_args() -> TrainingArguments {
    TrainingArguments::default()
        .num_iterations(2)
        .batch_size(16)
        .learning_rate(1e-2)
}

fn factory() -> anyhow::Result<ModelFactory<HashedBagEncoder>> {
    Ok(ModelFactory::new("bag", Arc::new(common::small_encoder(0)?))
        .head_params(HeadParams::default().max_iter(30)))
}

fn solver_space() -> anyhow::Result<SearchSpace> {
    SearchSpace::new().with(Hyperparameter::Solver, Distribution::categorical(["sgd", "adamw"]))
}

#[test]
fn best_trial_dominates_completed_trials() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let space = solver_space()?
        .with(Hyperparameter::LearningRate, Distribution::log_uniform(1e-3, 5e-2))?
        .with(Hyperparameter::Seed, Distribution::int_range(0, 100))?;
    let orchestrator = HpOrchestrator::new(space, SearchSettings::default().n_trials(4).seed(3))
        .training_arguments(quick_args());

    let outcome = orchestrator.search(&factory()?, &train, &test)?;
    assert_eq!(outcome.trials.len(), 4);
    for (i, trial) in outcome.trials.iter().enumerate() {
        assert_eq!(trial.index, i);
        assert_eq!(trial.status, TrialStatus::Completed);
        assert!(outcome.best_metric() >= trial.metric);
    }
    Ok(())
}

#[test]
fn grid_over_two_categories_runs_each_once() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let settings = SearchSettings::default()
        .n_trials(2)
        .sampler(SamplerKind::Grid { points: 3 });
    let outcome = HpOrchestrator::new(solver_space()?, settings)
        .training_arguments(quick_args())
        .search(&factory()?, &train, &test)?;

    let solvers: Vec<Option<&ParamValue>> = outcome
        .trials
        .iter()
        .map(|t| t.config.get(Hyperparameter::Solver))
        .collect();
    assert_eq!(
        solvers,
        vec![Some(&ParamValue::from("sgd")), Some(&ParamValue::from("adamw"))]
    );
    Ok(())
}

#[test]
fn random_search_draws_from_the_categories() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let outcome = HpOrchestrator::new(solver_space()?, SearchSettings::default().n_trials(2))
        .training_arguments(quick_args())
        .search(&factory()?, &train, &test)?;

    assert_eq!(outcome.trials.len(), 2);
    for trial in &outcome.trials {
        let solver = trial.config.text(Hyperparameter::Solver)?;
        assert!(matches!(solver, Some("sgd") | Some("adamw")));
    }
    Ok(())
}

#[test]
fn grid_search_stops_when_exhausted() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let settings = SearchSettings::default()
        .n_trials(10)
        .sampler(SamplerKind::Grid { points: 3 });
    let outcome = HpOrchestrator::new(solver_space()?, settings)
        .training_arguments(quick_args())
        .search(&factory()?, &train, &test)?;
    assert_eq!(outcome.trials.len(), 2);
    Ok(())
}

fn flaky_factory(
    base: &HashedBagEncoder,
) -> impl Fn(&TrialConfig) -> anyhow::Result<SetFitModel<FlakyEncoder>> + Sync + '_ {
    move |config: &TrialConfig| {
        let poisoned = config.text(Hyperparameter::ModelId)? == Some("poisoned");
        let encoder = FlakyEncoder {
            inner: base.fork()?,
            poisoned,
        };
        Ok(SetFitModel::new(encoder, HeadParams::default().max_iter(30)))
    }
}

#[test]
fn diverging_trial_fails_without_stopping_the_search() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let base = common::small_encoder(0)?;
    let space = SearchSpace::new().with(
        Hyperparameter::ModelId,
        Distribution::categorical(["clean", "poisoned"]),
    )?;
    let settings = SearchSettings::default()
        .n_trials(2)
        .sampler(SamplerKind::Grid { points: 1 });

    let outcome = HpOrchestrator::new(space, settings)
        .training_arguments(quick_args())
        .search(&flaky_factory(&base), &train, &test)?;

    let poisoned = &outcome.trials[1];
    assert_eq!(poisoned.status, TrialStatus::Failed);
    assert_eq!(poisoned.metric, f64::NEG_INFINITY);
    assert_eq!(poisoned.failure_kind(), Some(FailureKind::NonFiniteLoss));
    assert_eq!(outcome.best.index, 0);
    assert_eq!(outcome.failed().count(), 1);
    Ok(())
}

#[test]
fn all_failed_trials_exhaust_the_search() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let base = common::small_encoder(0)?;
    let space = SearchSpace::new()
        .with(Hyperparameter::ModelId, Distribution::categorical(["poisoned"]))?;

    let err = HpOrchestrator::new(space, SearchSettings::default().n_trials(3))
        .training_arguments(quick_args())
        .search(&flaky_factory(&base), &train, &test)
        .unwrap_err();
    match err.downcast_ref::<SetFitError>() {
        Some(SetFitError::SearchExhausted {
            attempted,
            most_common,
        }) => {
            assert_eq!(*attempted, 3);
            assert_eq!(*most_common, FailureKind::NonFiniteLoss);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[test]
fn expired_deadline_fails_trials_as_timeouts() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let settings = SearchSettings::default()
        .n_trials(2)
        .trial_timeout(Duration::ZERO);
    let err = HpOrchestrator::new(solver_space()?, settings)
        .training_arguments(quick_args())
        .search(&factory()?, &train, &test)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SetFitError>(),
        Some(SetFitError::SearchExhausted {
            most_common: FailureKind::Timeout,
            ..
        })
    ));
    Ok(())
}

#[test]
fn insufficient_classes_abort_before_any_trial() -> anyhow::Result<()> {
    let (_, test) = common::topic_split();
    let train = Dataset::from_pairs([
        ("the striker scored twice", 0),
        ("a late penalty decided it", 0),
        ("shares fell sharply", 1),
    ]);
    let base = common::small_encoder(0)?;
    let calls = AtomicUsize::new(0);
    let counting = |config: &TrialConfig| {
        calls.fetch_add(1, Ordering::SeqCst);
        flaky_factory(&base)(config)
    };

    let err = HpOrchestrator::new(solver_space()?, SearchSettings::default().n_trials(2))
        .search(&counting, &train, &test)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SetFitError>(),
        Some(SetFitError::InsufficientClassSamples(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn apply_best_reproduces_the_best_metric() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let factory = factory()?;
    let space = solver_space()?.with(Hyperparameter::Seed, Distribution::int_range(0, 50))?;
    let orchestrator = HpOrchestrator::new(space, SearchSettings::default().n_trials(3))
        .training_arguments(quick_args());

    let outcome = orchestrator.search(&factory, &train, &test)?;
    let artifact = orchestrator.apply_best(&factory, outcome.best_config(), &train, &test)?;
    assert_eq!(artifact.metric, outcome.best_metric());
    assert_eq!(&artifact.config, outcome.best_config());

    let predictions = artifact.model.predict(&test.texts())?;
    let classes: BTreeSet<i64> = train.classes().into_iter().collect();
    assert!(predictions.iter().all(|p| classes.contains(p)));
    Ok(())
}

#[test]
fn parallel_waves_match_sequential_search() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let factory = factory()?;
    let space = solver_space()?.with(Hyperparameter::NumEpochs, Distribution::int_range(1, 2))?;
    let settings = SearchSettings::default()
        .n_trials(4)
        .sampler(SamplerKind::Grid { points: 2 });

    let sequential = HpOrchestrator::new(space.clone(), settings.clone())
        .training_arguments(quick_args())
        .search(&factory, &train, &test)?;
    let parallel = HpOrchestrator::new(space, settings.n_workers(3))
        .training_arguments(quick_args())
        .search(&factory, &train, &test)?;

    assert_eq!(sequential.trials.len(), parallel.trials.len());
    for (a, b) in sequential.trials.iter().zip(&parallel.trials) {
        assert_eq!(a.index, b.index);
        assert_eq!(a.config, b.config);
        assert_eq!(a.metric, b.metric);
    }
    assert_eq!(sequential.best.index, parallel.best.index);
    Ok(())
}

#[test]
fn minimize_direction_picks_the_lowest_metric() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let settings = SearchSettings::default()
        .n_trials(2)
        .direction(Direction::Minimize)
        .sampler(SamplerKind::Grid { points: 1 });
    let outcome = HpOrchestrator::new(solver_space()?, settings)
        .training_arguments(quick_args())
        .search(&factory()?, &train, &test)?;
    let lowest = outcome
        .trials
        .iter()
        .map(|t| t.metric)
        .fold(f64::INFINITY, f64::min);
    assert_eq!(outcome.best_metric(), lowest);
    Ok(())
}

#[test]
fn outcome_serialises_for_audit() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let outcome = HpOrchestrator::new(solver_space()?, SearchSettings::default().n_trials(1))
        .training_arguments(quick_args())
        .search(&factory()?, &train, &test)?;
    let json = serde_json::to_string(&outcome)?;
    let back: setfit::SearchOutcome = serde_json::from_str(&json)?;
    assert_eq!(back.trials.len(), 1);
    assert_eq!(back.best.index, outcome.best.index);
    assert_eq!(back.best.config, outcome.best.config);
    assert!((back.best_metric() - outcome.best_metric()).abs() < 1e-12);
    Ok(())
}

/// Sleeps whenever a batch contains one of `slow_texts`.
struct SlowOnTextsEncoder {
    inner: HashedBagEncoder,
    slow_texts: Arc<BTreeSet<String>>,
    delay: Duration,
}

impl SentenceEncoder for SlowOnTextsEncoder {
    fn encode(&self, texts: &[&str]) -> anyhow::Result<Tensor> {
        if texts.iter().any(|t| self.slow_texts.contains(*t)) {
            std::thread::sleep(self.delay);
        }
        self.inner.encode(texts)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.inner.trainable_vars()
    }

    fn hidden_size(&self) -> usize {
        self.inner.hidden_size()
    }

    fn device(&self) -> &Device {
        self.inner.device()
    }

    fn fork(&self) -> anyhow::Result<Self> {
        Ok(Self {
            inner: self.inner.fork()?,
            slow_texts: Arc::clone(&self.slow_texts),
            delay: self.delay,
        })
    }
}

#[test]
fn slow_evaluation_counts_against_the_trial_timeout() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let base = common::small_encoder(0)?;
    let slow_texts: Arc<BTreeSet<String>> =
        Arc::new(test.texts().into_iter().map(str::to_string).collect());
    let slow_on_test = |_: &TrialConfig| -> anyhow::Result<SetFitModel<SlowOnTextsEncoder>> {
        let encoder = SlowOnTextsEncoder {
            inner: base.fork()?,
            slow_texts: Arc::clone(&slow_texts),
            delay: Duration::from_millis(3000),
        };
        Ok(SetFitModel::new(encoder, HeadParams::default().max_iter(30)))
    };

    let settings = SearchSettings::default()
        .n_trials(1)
        .trial_timeout(Duration::from_millis(2000));
    let err = HpOrchestrator::new(solver_space()?, settings)
        .training_arguments(quick_args())
        .search(&slow_on_test, &train, &test)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SetFitError>(),
        Some(SetFitError::SearchExhausted {
            attempted: 1,
            most_common: FailureKind::Timeout,
        })
    ));
    Ok(())
}

#[test]
fn panicking_trial_is_recorded_on_the_sequential_path() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let base = common::small_encoder(0)?;
    let panics_on_sgd = |config: &TrialConfig| -> anyhow::Result<SetFitModel<HashedBagEncoder>> {
        if config.text(Hyperparameter::Solver)? == Some("sgd") {
            panic!("solver sgd is not supported here");
        }
        Ok(SetFitModel::new(base.fork()?, HeadParams::default().max_iter(30)))
    };

    for workers in [1, 2] {
        let settings = SearchSettings::default()
            .n_trials(2)
            .n_workers(workers)
            .sampler(SamplerKind::Grid { points: 1 });
        let outcome = HpOrchestrator::new(solver_space()?, settings)
            .training_arguments(quick_args())
            .search(&panics_on_sgd, &train, &test)?;

        let statuses: Vec<TrialStatus> = outcome.trials.iter().map(|t| t.status).collect();
        assert_eq!(statuses, vec![TrialStatus::Failed, TrialStatus::Completed]);
        assert_eq!(outcome.trials[0].failure_kind(), Some(FailureKind::Error));
        assert_eq!(outcome.best.index, 1);
    }
    Ok(())
}
