//! Contrastive fine-tuning of a sentence encoder.
//!
//! The loss is the mean squared error between the cosine similarity of each
//! pair and its target: 1 for same-class pairs, 0 otherwise. Minimising it
//! pulls same-class embeddings together and pushes different classes apart.

use candle_core::{DType, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::core::{Deadline, SetFitError, TrainingArguments};
use crate::models::utils::pairwise_cosine;
use crate::pipelines::setfit_pipeline::model::SentenceEncoder;
use crate::training::sampler::SampledPair;

#[derive(Debug, Clone, PartialEq)]
pub struct TunerArgs {
    pub batch_size: usize,
    pub num_epochs: usize,
    pub learning_rate: f64,
    pub warmup_proportion: f64,
    pub weight_decay: f64,
    pub seed: u64,
}

impl From<&TrainingArguments> for TunerArgs {
    fn from(args: &TrainingArguments) -> Self {
        Self {
            batch_size: args.batch_size,
            num_epochs: args.num_epochs,
            learning_rate: args.learning_rate,
            warmup_proportion: args.warmup_proportion,
            weight_decay: args.weight_decay,
            seed: args.seed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuningReport {
    pub steps: usize,
    pub epochs: usize,
    pub final_loss: f32,
    pub mean_loss: f32,
}

pub struct ContrastiveTuner {
    args: TunerArgs,
}

impl ContrastiveTuner {
    pub fn new(args: TunerArgs) -> Self {
        Self { args }
    }

    pub fn args(&self) -> &TunerArgs {
        &self.args
    }

    /// Learning rate for optimizer step `step` out of `total`.
    ///
    /// Linear warm-up over the first `warmup_proportion` of steps, then linear
    /// decay to zero.
    pub fn learning_rate_at(&self, step: usize, total: usize) -> f64 {
        let peak = self.args.learning_rate;
        let warmup = (total as f64 * self.args.warmup_proportion).ceil() as usize;
        if step < warmup {
            peak * (step + 1) as f64 / warmup as f64
        } else {
            let remaining = total.saturating_sub(step) as f64;
            peak * remaining / total.saturating_sub(warmup).max(1) as f64
        }
    }

    /// Fine-tune `encoder` in place on `pairs`.
    pub fn fit<E: SentenceEncoder>(
        &self,
        encoder: &mut E,
        pairs: &[SampledPair<'_>],
        deadline: &Deadline,
    ) -> anyhow::Result<TuningReport> {
        if pairs.is_empty() {
            return Ok(TuningReport::default());
        }
        let batch_size = self.args.batch_size.max(1);
        let steps_per_epoch = pairs.len().div_ceil(batch_size);
        let total_steps = steps_per_epoch * self.args.num_epochs;

        let params = ParamsAdamW {
            lr: self.learning_rate_at(0, total_steps),
            weight_decay: self.args.weight_decay,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(encoder.trainable_vars(), params)?;

        let mut order: Vec<usize> = (0..pairs.len()).collect();
        let mut step = 0;
        let mut loss_sum = 0f64;
        let mut final_loss = 0f32;

        for epoch in 0..self.args.num_epochs {
            let mut rng = StdRng::seed_from_u64(self.args.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
            let mut epoch_loss = 0f64;

            for batch in order.chunks(batch_size) {
                deadline.check()?;
                optimizer.set_learning_rate(self.learning_rate_at(step, total_steps));

                let loss = self.batch_loss(&*encoder, pairs, batch)?;
                let value = loss.to_scalar::<f32>()?;
                if !value.is_finite() {
                    tracing::warn!(epoch, step, loss = value, "contrastive loss diverged");
                    return Err(SetFitError::NonFiniteLoss {
                        epoch,
                        step,
                        loss: value,
                    }
                    .into());
                }
                optimizer.backward_step(&loss)?;

                tracing::trace!(epoch, step, loss = value, "tuner step");
                epoch_loss += value as f64;
                loss_sum += value as f64;
                final_loss = value;
                step += 1;
            }

            tracing::debug!(
                epoch,
                mean_loss = epoch_loss / steps_per_epoch as f64,
                "finished contrastive epoch"
            );
        }

        Ok(TuningReport {
            steps: step,
            epochs: self.args.num_epochs,
            final_loss,
            mean_loss: (loss_sum / step.max(1) as f64) as f32,
        })
    }

    fn batch_loss<E: SentenceEncoder>(
        &self,
        encoder: &E,
        pairs: &[SampledPair<'_>],
        batch: &[usize],
    ) -> anyhow::Result<Tensor> {
        let n = batch.len();
        let mut texts = Vec::with_capacity(2 * n);
        texts.extend(batch.iter().map(|&i| pairs[i].text_a));
        texts.extend(batch.iter().map(|&i| pairs[i].text_b));
        let targets: Vec<f32> = batch.iter().map(|&i| pairs[i].target()).collect();

        // One forward pass for both sides of the batch.
        let embeddings = encoder.encode(&texts)?.to_dtype(DType::F32)?;
        let a = embeddings.narrow(0, 0, n)?;
        let b = embeddings.narrow(0, n, n)?;
        let targets = Tensor::from_vec(targets, n, embeddings.device())?;

        let cosine = pairwise_cosine(&a, &b)?;
        Ok(cosine.sub(&targets)?.sqr()?.mean_all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HashedBagConfig, HashedBagEncoder};
    use crate::training::data::Dataset;
    use crate::training::sampler::PairSampler;
    use candle_core::{Device, Var};
    use std::time::Duration;

    fn args() -> TunerArgs {
        TunerArgs {
            batch_size: 8,
            num_epochs: 2,
            learning_rate: 0.05,
            warmup_proportion: 0.1,
            weight_decay: 0.0,
            seed: 3,
        }
    }

    fn encoder() -> anyhow::Result<HashedBagEncoder> {
        HashedBagEncoder::new(
            HashedBagConfig {
                num_buckets: 512,
                hidden_size: 16,
                ngram: 3,
                seed: 1,
            },
            &Device::Cpu,
        )
    }

    fn toy() -> Dataset {
        Dataset::from_pairs([
            ("the striker scored a late goal", 0),
            ("the keeper saved a penalty", 0),
            ("midfield pressing won the match", 0),
            ("shares fell after the earnings call", 1),
            ("the central bank raised rates", 1),
            ("bond yields climbed again", 1),
        ])
    }

    #[test]
    fn test_schedule_warms_up_then_decays() {
        let tuner = ContrastiveTuner::new(args());
        let total = 20;
        assert!((tuner.learning_rate_at(0, total) - 0.025).abs() < 1e-12);
        assert!((tuner.learning_rate_at(1, total) - 0.05).abs() < 1e-12);
        assert!(tuner.learning_rate_at(10, total) < 0.05);
        assert!(tuner.learning_rate_at(19, total) > 0.0);
        assert!(tuner.learning_rate_at(19, total) < tuner.learning_rate_at(10, total));
    }

    #[test]
    fn test_fit_reduces_loss() -> anyhow::Result<()> {
        let train = toy();
        let pairs = PairSampler::new(4, 0).sample(&train)?;
        let mut encoder = encoder()?;
        let tuner = ContrastiveTuner::new(args());

        let all: Vec<usize> = (0..pairs.len()).collect();
        let before = tuner.batch_loss(&encoder, &pairs, &all)?.to_scalar::<f32>()?;
        let report = tuner.fit(&mut encoder, &pairs, &Deadline::none())?;
        let after = tuner.batch_loss(&encoder, &pairs, &all)?.to_scalar::<f32>()?;

        assert_eq!(report.steps, 2 * pairs.len().div_ceil(8));
        assert!(report.final_loss.is_finite());
        assert!(after < before, "loss went from {before} to {after}");
        Ok(())
    }

    #[test]
    fn test_expired_deadline_times_out() -> anyhow::Result<()> {
        let train = toy();
        let pairs = PairSampler::new(1, 0).sample(&train)?;
        let mut encoder = encoder()?;
        let err = ContrastiveTuner::new(args())
            .fit(&mut encoder, &pairs, &Deadline::after(Duration::ZERO))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SetFitError>(),
            Some(SetFitError::TrialTimeout { .. })
        ));
        Ok(())
    }

    struct NanEncoder(HashedBagEncoder);

    impl SentenceEncoder for NanEncoder {
        fn encode(&self, texts: &[&str]) -> anyhow::Result<Tensor> {
            Ok(self.0.encode(texts)?.affine(f64::NAN, 0.0)?)
        }
        fn trainable_vars(&self) -> Vec<Var> {
            self.0.trainable_vars()
        }
        fn hidden_size(&self) -> usize {
            self.0.hidden_size()
        }
        fn device(&self) -> &Device {
            self.0.device()
        }
        fn fork(&self) -> anyhow::Result<Self> {
            Ok(Self(self.0.fork()?))
        }
    }

    #[test]
    fn test_non_finite_loss_is_reported() -> anyhow::Result<()> {
        let train = toy();
        let pairs = PairSampler::new(1, 0).sample(&train)?;
        let mut encoder = NanEncoder(encoder()?);
        let err = ContrastiveTuner::new(args())
            .fit(&mut encoder, &pairs, &Deadline::none())
            .unwrap_err();
        match err.downcast_ref::<SetFitError>() {
            Some(SetFitError::NonFiniteLoss { epoch, step, .. }) => {
                assert_eq!((*epoch, *step), (0, 0));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }
}
