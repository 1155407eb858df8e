use candle_core::{DType, Device, Tensor, Var};

use crate::core::ModelOptions;

/// Rows embedded per forward pass when no gradient is needed.
pub const EMBED_BATCH_SIZE: usize = 64;

/// A trainable sentence encoder: text in, fixed-length vector out.
///
/// `encode` must stay differentiable with respect to `trainable_vars` so the
/// contrastive tuner can back-propagate through it.
pub trait SentenceEncoder: Send + Sync {
    fn encode(&self, texts: &[&str]) -> anyhow::Result<Tensor>;

    fn trainable_vars(&self) -> Vec<Var>;

    fn hidden_size(&self) -> usize;

    fn device(&self) -> &Device;

    /// Deep copy with private parameter storage.
    fn fork(&self) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Embed without tracking gradients, batching large inputs.
    fn embed(&self, texts: &[&str]) -> anyhow::Result<Tensor> {
        if texts.is_empty() {
            return Ok(Tensor::zeros((0, self.hidden_size()), DType::F32, self.device())?);
        }
        let chunks = texts
            .chunks(EMBED_BATCH_SIZE)
            .map(|chunk| Ok(self.encode(chunk)?.detach()))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Tensor::cat(&chunks, 0)?)
    }

    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(self.embed(texts)?.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }
}

/// Encoders that can be loaded from a set of options (a hub repo, a local
/// configuration) and cached as a read-only base.
pub trait PretrainedEncoder: SentenceEncoder + Sized + 'static {
    type Options: ModelOptions + std::fmt::Debug + Clone + Send + Sync;

    #[allow(async_fn_in_trait)]
    async fn load(options: Self::Options, device: Device) -> anyhow::Result<Self>;
}
