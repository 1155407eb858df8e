//! Held-out evaluation metrics.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{Deadline, SetFitError};
use crate::pipelines::setfit_pipeline::model::SentenceEncoder;
use crate::pipelines::setfit_pipeline::SetFitModel;
use crate::training::data::Dataset;

/// Texts scored per prediction call.
const EVAL_BATCH_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Accuracy,
    /// Macro-averaged F1.
    F1,
    /// Macro-averaged precision.
    Precision,
    /// Macro-averaged recall.
    Recall,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::F1 => "f1",
            Metric::Precision => "precision",
            Metric::Recall => "recall",
        }
    }

    pub fn compute(&self, y_true: &[i64], y_pred: &[i64]) -> f64 {
        match self {
            Metric::Accuracy => accuracy(y_true, y_pred),
            Metric::F1 => macro_f1(y_true, y_pred),
            Metric::Precision => macro_precision(y_true, y_pred),
            Metric::Recall => macro_recall(y_true, y_pred),
        }
    }
}

impl FromStr for Metric {
    type Err = SetFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accuracy" => Ok(Metric::Accuracy),
            "f1" => Ok(Metric::F1),
            "precision" => Ok(Metric::Precision),
            "recall" => Ok(Metric::Recall),
            _ => Err(SetFitError::UnknownMetric(s.to_string())),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Evaluator;

impl Evaluator {
    /// Score `model` on `test` with `metric`.
    pub fn evaluate<M: SentenceEncoder>(
        model: &SetFitModel<M>,
        test: &Dataset,
        metric: Metric,
    ) -> anyhow::Result<f64> {
        Self::evaluate_within(model, test, metric, &Deadline::none())
    }

    /// Like [`Evaluator::evaluate`], failing with `TrialTimeout` once
    /// `deadline` passes, checked around every prediction batch.
    pub fn evaluate_within<M: SentenceEncoder>(
        model: &SetFitModel<M>,
        test: &Dataset,
        metric: Metric,
        deadline: &Deadline,
    ) -> anyhow::Result<f64> {
        if test.is_empty() {
            return Err(SetFitError::EmptyDataset("test".into()).into());
        }
        let texts = test.texts();
        let mut predictions = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EVAL_BATCH_SIZE) {
            deadline.check()?;
            predictions.extend(model.predict(chunk)?);
        }
        deadline.check()?;
        let score = metric.compute(&test.labels(), &predictions);
        tracing::debug!(metric = %metric, score, examples = texts.len(), "evaluated model");
        Ok(score)
    }
}

pub fn accuracy(y_true: &[i64], y_pred: &[i64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

/// Per-class (true positives, false positives, false negatives) over every
/// label seen in either slice.
fn confusion(y_true: &[i64], y_pred: &[i64]) -> Vec<(usize, usize, usize)> {
    let labels: BTreeSet<i64> = y_true.iter().chain(y_pred).copied().collect();
    labels
        .into_iter()
        .map(|label| {
            let mut counts = (0, 0, 0);
            for (&t, &p) in y_true.iter().zip(y_pred) {
                match (t == label, p == label) {
                    (true, true) => counts.0 += 1,
                    (false, true) => counts.1 += 1,
                    (true, false) => counts.2 += 1,
                    (false, false) => {}
                }
            }
            counts
        })
        .collect()
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn macro_mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

pub fn macro_precision(y_true: &[i64], y_pred: &[i64]) -> f64 {
    let per_class = confusion(y_true, y_pred);
    macro_mean(per_class.iter().map(|&(tp, fp, _)| ratio(tp, tp + fp)))
}

pub fn macro_recall(y_true: &[i64], y_pred: &[i64]) -> f64 {
    let per_class = confusion(y_true, y_pred);
    macro_mean(per_class.iter().map(|&(tp, _, fn_)| ratio(tp, tp + fn_)))
}

pub fn macro_f1(y_true: &[i64], y_pred: &[i64]) -> f64 {
    let per_class = confusion(y_true, y_pred);
    macro_mean(
        per_class
            .iter()
            .map(|&(tp, fp, fn_)| ratio(2 * tp, 2 * tp + fp + fn_)),
    )
}
