use std::collections::BTreeMap;

use super::model::SentenceEncoder;
use crate::core::Deadline;
use crate::training::data::Dataset;
use crate::training::head::{HeadParams, HeadReport, HeadTrainer, LogisticRegressionHead};

/// A sentence encoder followed by a logistic-regression head.
pub struct SetFitModel<M: SentenceEncoder> {
    pub(crate) encoder: M,
    pub(crate) head: LogisticRegressionHead,
}

impl<M: SentenceEncoder> SetFitModel<M> {
    pub fn new(encoder: M, head_params: HeadParams) -> Self {
        Self {
            encoder,
            head: LogisticRegressionHead::new(head_params),
        }
    }

    pub fn encoder(&self) -> &M {
        &self.encoder
    }

    pub fn encoder_mut(&mut self) -> &mut M {
        &mut self.encoder
    }

    pub fn head(&self) -> &LogisticRegressionHead {
        &self.head
    }

    /// Class ids the head predicts, ascending. Empty before the head is fitted.
    pub fn classes(&self) -> &[i64] {
        self.head.classes()
    }

    /// Fit the head on embeddings from the current encoder.
    pub fn fit_head(&mut self, train: &Dataset, deadline: &Deadline) -> anyhow::Result<HeadReport> {
        HeadTrainer::fit(&self.encoder, train, &mut self.head, deadline)
    }

    pub fn predict_proba(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f64>>> {
        self.head.ensure_fitted()?;
        let embeddings = self.encoder.embed(texts)?;
        self.head.predict_proba(&embeddings)
    }

    /// Probability per class for a single text.
    pub fn predict_proba_one(&self, text: &str) -> anyhow::Result<BTreeMap<i64, f64>> {
        let row = self
            .predict_proba(&[text])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("no prediction returned for input"))?;
        Ok(self.classes().iter().copied().zip(row).collect())
    }

    /// Most probable class per text.
    pub fn predict(&self, texts: &[&str]) -> anyhow::Result<Vec<i64>> {
        let classes = self.classes();
        let probabilities = self.predict_proba(texts)?;
        Ok(probabilities
            .iter()
            .map(|row| {
                let best = row
                    .iter()
                    .enumerate()
                    .fold(0, |best, (i, p)| if *p > row[best] { i } else { best });
                classes[best]
            })
            .collect())
    }

    pub fn device(&self) -> &candle_core::Device {
        self.encoder.device()
    }
}
