mod common;

use std::sync::Arc;

use setfit::core::{Deadline, Hyperparameter, TrainingArguments, TrialConfig};
use setfit::training::{Evaluator, Metric, PairSampler, Trainer};
use setfit::{
    HashedBagConfig, HashedBagEncoder, HeadParams, ModelFactory, SentenceEncoder, SetFitError,
    SetFitModel, SetFitModelBuilder,
};

fn args() -> TrainingArguments {
    TrainingArguments::default()
        .num_iterations(20)
        .num_epochs(1)
        .batch_size(16)
        .learning_rate(1e-2)
        .seed(7)
}

#[test]
fn end_to_end_training() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    assert_eq!(train.len(), 32);

    let pairs = PairSampler::new(20, 7).sample(&train)?;
    assert_eq!(pairs.len(), 1280);

    let mut model = SetFitModel::new(common::small_encoder(0)?, HeadParams::default());
    let report = Trainer::new(args()).train(&mut model, &train, &Deadline::none())?;
    assert_eq!(report.pairs, 1280);
    assert_eq!(report.tuning.steps, 80);
    assert_eq!(model.classes(), &[0, 1, 2, 3]);

    let accuracy = Evaluator::evaluate(&model, &test, Metric::Accuracy)?;
    assert!((0.0..=1.0).contains(&accuracy));

    let texts = test.texts();
    for row in model.predict_proba(&texts)? {
        assert_eq!(row.len(), 4);
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-6);
    }
    let one = model.predict_proba_one("the keeper saved a penalty")?;
    assert_eq!(one.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    Ok(())
}

#[test]
fn training_is_reproducible() -> anyhow::Result<()> {
    let (train, test) = common::topic_split();
    let run = || -> anyhow::Result<(f64, Vec<Vec<f64>>)> {
        let mut model = SetFitModel::new(common::small_encoder(0)?, HeadParams::default());
        let (_, accuracy) = Trainer::new(args()).train_and_evaluate(
            &mut model,
            &train,
            &test,
            Metric::Accuracy,
            &Deadline::none(),
        )?;
        Ok((accuracy, model.predict_proba(&test.texts())?))
    };

    let (acc_a, proba_a) = run()?;
    let (acc_b, proba_b) = run()?;
    assert_eq!(acc_a, acc_b);
    for (a, b) in proba_a.iter().flatten().zip(proba_b.iter().flatten()) {
        assert!((a - b).abs() < 1e-9);
    }
    Ok(())
}

#[test]
fn predicting_before_training_fails() -> anyhow::Result<()> {
    let model = SetFitModel::new(common::small_encoder(0)?, HeadParams::default());
    let err = model.predict(&["anything"]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SetFitError>(),
        Some(SetFitError::NotFitted)
    ));
    Ok(())
}

#[test]
fn factory_models_do_not_share_weights() -> anyhow::Result<()> {
    let (train, _) = common::topic_split();
    let base = Arc::new(common::small_encoder(3)?);
    let factory = ModelFactory::new("bag", base.clone());

    let text = ["markets rallied after the jobs data"];
    let before = base.embed_batch(&text)?;

    let mut model = factory.instantiate(&TrialConfig::new().with(Hyperparameter::MaxIter, 20))?;
    Trainer::new(args().num_iterations(2)).train(&mut model, &train, &Deadline::none())?;

    assert_eq!(base.embed_batch(&text)?, before);
    assert_ne!(model.encoder().embed_batch(&text)?, before);
    assert_eq!(model.head().params().max_iter, 20);
    Ok(())
}

#[tokio::test]
async fn builder_reuses_cached_base() -> anyhow::Result<()> {
    let config = HashedBagConfig {
        num_buckets: 256,
        hidden_size: 8,
        ngram: 2,
        seed: 1234,
    };
    let builder = SetFitModelBuilder::hashed_bag(config.clone()).cpu();
    let first = builder.base().await?;
    let second = SetFitModelBuilder::<HashedBagEncoder>::new(config).cpu().base().await?;
    assert!(Arc::ptr_eq(&first, &second));

    let model = builder.build().await?;
    assert!(model.device().is_cpu());
    assert_eq!(model.encoder().hidden_size(), 8);
    Ok(())
}
