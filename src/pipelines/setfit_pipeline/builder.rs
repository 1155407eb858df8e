use std::sync::Arc;

use super::model::PretrainedEncoder;
use super::pipeline::SetFitModel;
use crate::core::global_cache;
use crate::pipelines::utils::{build_cache_key, DeviceRequest};
use crate::training::head::HeadParams;

pub struct SetFitModelBuilder<M: PretrainedEncoder> {
    options: M::Options,
    device_request: DeviceRequest,
    head_params: HeadParams,
}

impl<M: PretrainedEncoder> SetFitModelBuilder<M> {
    pub fn new(options: M::Options) -> Self {
        Self {
            options,
            device_request: DeviceRequest::Default,
            head_params: HeadParams::default(),
        }
    }

    pub fn cpu(mut self) -> Self {
        self.device_request = DeviceRequest::Cpu;
        self
    }

    pub fn cuda_device(mut self, index: usize) -> Self {
        self.device_request = DeviceRequest::Cuda(index);
        self
    }

    pub fn device(mut self, device: candle_core::Device) -> Self {
        self.device_request = DeviceRequest::Explicit(device);
        self
    }

    pub fn head_params(mut self, head_params: HeadParams) -> Self {
        self.head_params = head_params;
        self
    }

    /// The shared read-only base encoder, loaded once per options and device.
    pub async fn base(&self) -> anyhow::Result<Arc<M>> {
        let device = self.device_request.clone().resolve()?;
        let key = build_cache_key(&self.options, &device);
        global_cache()
            .get_or_create_async(&key, || M::load(self.options.clone(), device.clone()))
            .await
    }

    /// A model with its own copy of the base weights and an unfitted head.
    pub async fn build(self) -> anyhow::Result<SetFitModel<M>> {
        let base = self.base().await?;
        Ok(SetFitModel::new(base.fork()?, self.head_params))
    }
}

impl SetFitModelBuilder<crate::models::HashedBagEncoder> {
    pub fn hashed_bag(config: crate::models::HashedBagConfig) -> Self {
        Self::new(config)
    }
}

impl SetFitModelBuilder<crate::models::BertEncoder> {
    pub fn bert(model_id: &str) -> Self {
        Self::new(crate::models::BertOptions::new(model_id))
    }
}
