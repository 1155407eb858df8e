//! One complete training run: pairs, contrastive tuning, head fitting.

use serde::{Deserialize, Serialize};

use crate::core::{Deadline, TrainingArguments};
use crate::pipelines::setfit_pipeline::model::SentenceEncoder;
use crate::pipelines::setfit_pipeline::SetFitModel;
use crate::training::data::Dataset;
use crate::training::evaluator::{Evaluator, Metric};
use crate::training::head::HeadReport;
use crate::training::sampler::PairSampler;
use crate::training::tuner::{ContrastiveTuner, TunerArgs, TuningReport};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub pairs: usize,
    pub tuning: TuningReport,
    pub head: HeadReport,
}

pub struct Trainer {
    args: TrainingArguments,
}

impl Trainer {
    pub fn new(args: TrainingArguments) -> Self {
        Self { args }
    }

    pub fn args(&self) -> &TrainingArguments {
        &self.args
    }

    /// Fine-tune the encoder of `model` and fit its head on `train`.
    pub fn train<M: SentenceEncoder>(
        &self,
        model: &mut SetFitModel<M>,
        train: &Dataset,
        deadline: &Deadline,
    ) -> anyhow::Result<TrainReport> {
        self.args.validate()?;
        let pairs = PairSampler::new(self.args.num_iterations, self.args.seed).sample(train)?;
        let tuner = ContrastiveTuner::new(TunerArgs::from(&self.args));
        let tuning = tuner.fit(model.encoder_mut(), &pairs, deadline)?;
        let head = model.fit_head(train, deadline)?;

        tracing::debug!(
            pairs = pairs.len(),
            steps = tuning.steps,
            tuner_loss = tuning.final_loss,
            head_loss = head.final_loss,
            "training run finished"
        );
        Ok(TrainReport {
            pairs: pairs.len(),
            tuning,
            head,
        })
    }

    /// Train, then score on `test`.
    pub fn train_and_evaluate<M: SentenceEncoder>(
        &self,
        model: &mut SetFitModel<M>,
        train: &Dataset,
        test: &Dataset,
        metric: Metric,
        deadline: &Deadline,
    ) -> anyhow::Result<(TrainReport, f64)> {
        let report = self.train(model, train, deadline)?;
        let score = Evaluator::evaluate(model, test, metric)?;
        Ok((report, score))
    }
}
