use std::collections::BTreeMap;
use std::sync::Arc;

use super::model::SentenceEncoder;
use super::pipeline::SetFitModel;
use crate::core::{Hyperparameter, SetFitError, TrialConfig};
use crate::training::head::{HeadParams, HeadSolver};

/// Builds a fresh, untrained pipeline for one trial.
///
/// Implementations must not share learned parameters between the models
/// they return.
pub trait ModelInit<M: SentenceEncoder>: Sync {
    fn init(&self, config: &TrialConfig) -> anyhow::Result<SetFitModel<M>>;
}

impl<M, F> ModelInit<M> for F
where
    M: SentenceEncoder,
    F: Fn(&TrialConfig) -> anyhow::Result<SetFitModel<M>> + Sync,
{
    fn init(&self, config: &TrialConfig) -> anyhow::Result<SetFitModel<M>> {
        self(config)
    }
}

/// Forks registered base encoders into new pipelines.
///
/// `model_id` picks the base (the first registered one by default), while
/// `max_iter` and `solver` override the head parameters.
pub struct ModelFactory<M: SentenceEncoder> {
    bases: BTreeMap<String, Arc<M>>,
    default_model: String,
    head_params: HeadParams,
}

impl<M: SentenceEncoder> ModelFactory<M> {
    pub fn new(model_id: &str, base: Arc<M>) -> Self {
        Self {
            bases: BTreeMap::from([(model_id.to_string(), base)]),
            default_model: model_id.to_string(),
            head_params: HeadParams::default(),
        }
    }

    pub fn with_model(mut self, model_id: &str, base: Arc<M>) -> Self {
        self.bases.insert(model_id.to_string(), base);
        self
    }

    pub fn head_params(mut self, head_params: HeadParams) -> Self {
        self.head_params = head_params;
        self
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.bases.keys().map(String::as_str)
    }

    pub fn instantiate(&self, config: &TrialConfig) -> anyhow::Result<SetFitModel<M>> {
        let model_id = config
            .text(Hyperparameter::ModelId)?
            .unwrap_or(self.default_model.as_str());
        let base = self.bases.get(model_id).ok_or_else(|| {
            SetFitError::InvalidConfig(format!("no base encoder registered as `{model_id}`"))
        })?;

        let mut head = self.head_params.clone();
        if let Some(max_iter) = config.positive_usize(Hyperparameter::MaxIter)? {
            head.max_iter = max_iter;
        }
        if let Some(solver) = config.text(Hyperparameter::Solver)? {
            head.solver = solver.parse::<HeadSolver>()?;
        }

        Ok(SetFitModel::new(base.fork()?, head))
    }
}

impl<M: SentenceEncoder> ModelInit<M> for ModelFactory<M> {
    fn init(&self, config: &TrialConfig) -> anyhow::Result<SetFitModel<M>> {
        self.instantiate(config)
    }
}
