//! Logistic-regression classification head.
//!
//! A multinomial logistic regression over fixed-length sentence embeddings,
//! fitted full-batch with a candle optimizer. The weights start at zero, so
//! fitting the same embeddings twice yields the same head.

use std::str::FromStr;

use candle_core::{DType, Tensor, Var};
use candle_nn::{loss::cross_entropy, AdamW, Optimizer, ParamsAdamW, SGD};
use serde::{Deserialize, Serialize};

use crate::core::{Deadline, SetFitError};
use crate::pipelines::setfit_pipeline::model::SentenceEncoder;
use crate::training::data::Dataset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadSolver {
    Sgd,
    #[default]
    AdamW,
}

impl FromStr for HeadSolver {
    type Err = SetFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sgd" => Ok(HeadSolver::Sgd),
            "adamw" | "adam" => Ok(HeadSolver::AdamW),
            other => Err(SetFitError::InvalidConfig(format!(
                "unknown solver `{other}` (expected sgd or adamw)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadParams {
    pub max_iter: usize,
    pub solver: HeadSolver,
    /// Inverse regularisation strength, as in scikit-learn.
    pub c: f64,
    pub learning_rate: f64,
    /// Stop once an iteration improves the loss by less than this.
    pub tol: f64,
}

impl Default for HeadParams {
    fn default() -> Self {
        Self {
            max_iter: 100,
            solver: HeadSolver::AdamW,
            c: 1.0,
            learning_rate: 0.1,
            tol: 1e-4,
        }
    }
}

impl HeadParams {
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn solver(mut self, solver: HeadSolver) -> Self {
        self.solver = solver;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadReport {
    pub iterations: usize,
    pub final_loss: f32,
    pub converged: bool,
}

struct FittedWeights {
    weight: Tensor,
    bias: Tensor,
}

pub struct LogisticRegressionHead {
    params: HeadParams,
    classes: Vec<i64>,
    fitted: Option<FittedWeights>,
}

impl LogisticRegressionHead {
    pub fn new(params: HeadParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            fitted: None,
        }
    }

    pub fn params(&self) -> &HeadParams {
        &self.params
    }

    /// Known class ids in ascending order; empty until fitted.
    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn ensure_fitted(&self) -> anyhow::Result<()> {
        if self.fitted.is_none() {
            return Err(SetFitError::NotFitted.into());
        }
        Ok(())
    }

    /// Fit on `(n, dim)` features and their labels, replacing any previous fit.
    pub fn fit(
        &mut self,
        features: &Tensor,
        labels: &[i64],
        deadline: &Deadline,
    ) -> anyhow::Result<HeadReport> {
        let (n, dim) = features.dims2()?;
        if n == 0 {
            return Err(SetFitError::EmptyDataset("head training".into()).into());
        }
        if n != labels.len() {
            anyhow::bail!("{n} feature rows but {} labels", labels.len());
        }

        let mut classes = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        let targets: Vec<u32> = labels
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default() as u32)
            .collect();

        let device = features.device();
        let features = features.to_dtype(DType::F32)?.detach();
        let targets = Tensor::from_vec(targets, n, device)?;
        let weight = Var::zeros((dim, classes.len()), DType::F32, device)?;
        let bias = Var::zeros(classes.len(), DType::F32, device)?;
        let vars = vec![weight.clone(), bias.clone()];

        let report = match self.params.solver {
            HeadSolver::Sgd => {
                let optimizer = SGD::new(vars, self.params.learning_rate)?;
                self.optimise(optimizer, &features, &targets, &weight, &bias, deadline)?
            }
            HeadSolver::AdamW => {
                let params = ParamsAdamW {
                    lr: self.params.learning_rate,
                    weight_decay: 0.0,
                    ..Default::default()
                };
                let optimizer = AdamW::new(vars, params)?;
                self.optimise(optimizer, &features, &targets, &weight, &bias, deadline)?
            }
        };

        tracing::debug!(
            classes = classes.len(),
            iterations = report.iterations,
            loss = report.final_loss,
            converged = report.converged,
            "fitted classification head"
        );

        self.classes = classes;
        self.fitted = Some(FittedWeights {
            weight: weight.as_tensor().detach(),
            bias: bias.as_tensor().detach(),
        });
        Ok(report)
    }

    fn optimise<O: Optimizer>(
        &self,
        mut optimizer: O,
        features: &Tensor,
        targets: &Tensor,
        weight: &Var,
        bias: &Var,
        deadline: &Deadline,
    ) -> anyhow::Result<HeadReport> {
        let n = features.dim(0)?;
        let penalty = 1.0 / (2.0 * self.params.c * n as f64);
        let mut previous = f32::INFINITY;
        let mut report = HeadReport::default();

        for iteration in 0..self.params.max_iter {
            deadline.check()?;
            let logits = features.matmul(weight.as_tensor())?.broadcast_add(bias.as_tensor())?;
            let loss = (cross_entropy(&logits, targets)?
                + weight.as_tensor().sqr()?.sum_all()?.affine(penalty, 0.0)?)?;
            let value = loss.to_scalar::<f32>()?;
            if !value.is_finite() {
                return Err(SetFitError::NonFiniteLoss {
                    epoch: 0,
                    step: iteration,
                    loss: value,
                }
                .into());
            }
            report.final_loss = value;
            if (previous - value).abs() < self.params.tol as f32 {
                report.converged = true;
                break;
            }
            previous = value;
            optimizer.backward_step(&loss)?;
            report.iterations = iteration + 1;
        }
        Ok(report)
    }

    /// Class probabilities for each row of `(n, dim)` features.
    ///
    /// Rows follow [`classes`](Self::classes) order and sum to one.
    pub fn predict_proba(&self, features: &Tensor) -> anyhow::Result<Vec<Vec<f64>>> {
        let fitted = self.fitted.as_ref().ok_or(SetFitError::NotFitted)?;
        if features.dim(0)? == 0 {
            return Ok(Vec::new());
        }
        let logits = features
            .to_dtype(DType::F32)?
            .matmul(&fitted.weight)?
            .broadcast_add(&fitted.bias)?
            .to_dtype(DType::F64)?
            .to_vec2::<f64>()?;
        Ok(logits.into_iter().map(softmax_row).collect())
    }
}

fn softmax_row(logits: Vec<f64>) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Fits a head on embeddings produced by a (tuned) encoder.
pub struct HeadTrainer;

impl HeadTrainer {
    pub fn fit<E: SentenceEncoder>(
        encoder: &E,
        train: &Dataset,
        head: &mut LogisticRegressionHead,
        deadline: &Deadline,
    ) -> anyhow::Result<HeadReport> {
        if train.is_empty() {
            return Err(SetFitError::EmptyDataset("train".into()).into());
        }
        let features = encoder.embed(&train.texts())?;
        head.fit(&features, &train.labels(), deadline)
    }
}
