/*
BERT-family sentence transformer with mean pooling.

Works with the `sentence-transformers` checkpoints built on BERT / MiniLM, e.g.

    sentence-transformers/paraphrase-MiniLM-L3-v2
    sentence-transformers/all-MiniLM-L6-v2

Parameter names follow the Hugging Face layout (`embeddings.word_embeddings.weight`,
`encoder.layer.{i}.attention.self.query.weight`, ...). Checkpoints that prefix
everything with `bert.` or use `gamma`/`beta` for layer norms are accepted too.
*/

use std::collections::HashMap;
use std::sync::Arc;

use candle_core::{DType, Device, Module, Tensor, Var, D};
use candle_nn::{ops::softmax, VarBuilder, VarMap};
use serde::Deserialize;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::core::ModelOptions;
use crate::loaders::{JsonConfigLoader, SafetensorsLoader, TokenizerLoader};
use crate::models::components::{layer_norm, linear, Embedding, LayerNorm, Linear};
use crate::models::utils::{fork_varmap, mean_pool};
use crate::pipelines::setfit_pipeline::model::{PretrainedEncoder, SentenceEncoder};

pub const DEFAULT_BERT_MODEL: &str = "sentence-transformers/paraphrase-MiniLM-L3-v2";

fn default_max_position_embeddings() -> usize {
    512
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BertConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

/// Which checkpoint to load and how long inputs may be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BertOptions {
    pub model_id: String,
    pub max_length: usize,
}

impl BertOptions {
    pub fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            max_length: 128,
        }
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }
}

impl Default for BertOptions {
    fn default() -> Self {
        Self::new(DEFAULT_BERT_MODEL)
    }
}

impl ModelOptions for BertOptions {
    fn cache_key(&self) -> String {
        format!("{}@{}", self.model_id, self.max_length)
    }
}

struct BertEmbeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    layer_norm: LayerNorm,
}

impl BertEmbeddings {
    fn load(vb: VarBuilder, config: &BertConfig) -> candle_core::Result<Self> {
        Ok(Self {
            word_embeddings: Embedding::new(
                config.vocab_size,
                config.hidden_size,
                vb.pp("word_embeddings"),
            )?,
            position_embeddings: Embedding::new(
                config.max_position_embeddings,
                config.hidden_size,
                vb.pp("position_embeddings"),
            )?,
            token_type_embeddings: Embedding::new(
                config.type_vocab_size,
                config.hidden_size,
                vb.pp("token_type_embeddings"),
            )?,
            layer_norm: layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, input_ids: &Tensor, token_type_ids: &Tensor) -> candle_core::Result<Tensor> {
        let (_batch, seq_len) = input_ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?.unsqueeze(0)?;
        let embeddings = (self.word_embeddings.forward(input_ids)?
            + self.token_type_embeddings.forward(token_type_ids)?)?
            .broadcast_add(&self.position_embeddings.forward(&positions)?)?;
        self.layer_norm.forward(&embeddings)
    }
}

struct BertLayer {
    query: Linear,
    key: Linear,
    value: Linear,
    attention_output: Linear,
    attention_norm: LayerNorm,
    intermediate: Linear,
    output: Linear,
    output_norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl BertLayer {
    fn load(vb: VarBuilder, config: &BertConfig) -> candle_core::Result<Self> {
        let h = config.hidden_size;
        let attention = vb.pp("attention");
        let self_attention = attention.pp("self");
        Ok(Self {
            query: linear(h, h, self_attention.pp("query"))?,
            key: linear(h, h, self_attention.pp("key"))?,
            value: linear(h, h, self_attention.pp("value"))?,
            attention_output: linear(h, h, attention.pp("output").pp("dense"))?,
            attention_norm: layer_norm(
                h,
                config.layer_norm_eps,
                attention.pp("output").pp("LayerNorm"),
            )?,
            intermediate: linear(h, config.intermediate_size, vb.pp("intermediate").pp("dense"))?,
            output: linear(config.intermediate_size, h, vb.pp("output").pp("dense"))?,
            output_norm: layer_norm(h, config.layer_norm_eps, vb.pp("output").pp("LayerNorm"))?,
            num_heads: config.num_attention_heads,
            head_dim: h / config.num_attention_heads,
        })
    }

    fn forward(&self, xs: &Tensor, mask_bias: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, seq_len, hidden) = xs.dims3()?;
        let split_heads = |t: Tensor| -> candle_core::Result<Tensor> {
            t.reshape((batch, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };

        let q = split_heads(self.query.forward(xs)?)?;
        let k = split_heads(self.key.forward(xs)?)?;
        let v = split_heads(self.value.forward(xs)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q
            .matmul(&k.t()?.contiguous()?)?
            .affine(scale, 0.0)?
            .broadcast_add(mask_bias)?;
        let probs = softmax(&scores, D::Minus1)?;
        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, hidden))?;

        let attended = self
            .attention_norm
            .forward(&(self.attention_output.forward(&context)? + xs)?)?;
        let intermediate = self.intermediate.forward(&attended)?.gelu_erf()?;
        self.output_norm
            .forward(&(self.output.forward(&intermediate)? + attended)?)
    }
}

pub struct BertEncoder {
    varmap: VarMap,
    embeddings: BertEmbeddings,
    layers: Vec<BertLayer>,
    config: BertConfig,
    tokenizer: Arc<Tokenizer>,
    device: Device,
}

impl BertEncoder {
    fn build(
        config: &BertConfig,
        vb: VarBuilder,
    ) -> candle_core::Result<(BertEmbeddings, Vec<BertLayer>)> {
        let embeddings = BertEmbeddings::load(vb.pp("embeddings"), config)?;
        let encoder = vb.pp("encoder").pp("layer");
        let layers = (0..config.num_hidden_layers)
            .map(|i| BertLayer::load(encoder.pp(i.to_string()), config))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok((embeddings, layers))
    }

    /// Assemble an encoder from a parsed config, a tokenizer and checkpoint tensors.
    pub fn from_parts(
        config: BertConfig,
        mut tokenizer: Tokenizer,
        max_length: usize,
        tensors: &HashMap<String, Tensor>,
        device: &Device,
    ) -> anyhow::Result<Self> {
        if config.num_attention_heads == 0 || config.hidden_size % config.num_attention_heads != 0
        {
            anyhow::bail!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                config.hidden_size,
                config.num_attention_heads
            );
        }

        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_length.min(config.max_position_embeddings),
                ..Default::default()
            }))
            .map_err(anyhow::Error::msg)?;

        let varmap = VarMap::new();
        let (embeddings, layers) =
            Self::build(&config, VarBuilder::from_varmap(&varmap, DType::F32, device))?;

        {
            let vars = varmap
                .data()
                .lock()
                .map_err(|_| anyhow::anyhow!("parameter map is poisoned"))?;
            for (name, var) in vars.iter() {
                let tensor = checkpoint_names(name)
                    .iter()
                    .find_map(|candidate| tensors.get(candidate))
                    .ok_or_else(|| anyhow::anyhow!("checkpoint has no tensor for `{name}`"))?;
                var.set(&tensor.to_dtype(DType::F32)?.to_device(device)?)?;
            }
        }

        tracing::debug!(
            layers = config.num_hidden_layers,
            hidden = config.hidden_size,
            "loaded bert encoder"
        );

        Ok(Self {
            varmap,
            embeddings,
            layers,
            config,
            tokenizer: Arc::new(tokenizer),
            device: device.clone(),
        })
    }

    pub async fn from_hub(options: &BertOptions, device: &Device) -> anyhow::Result<Self> {
        let config = JsonConfigLoader::<BertConfig>::new(&options.model_id, "config.json")
            .load()
            .await?;
        let tokenizer = TokenizerLoader::new(&options.model_id, "tokenizer.json")
            .load()
            .await?;
        let tensors = SafetensorsLoader::new(&options.model_id, "model.safetensors")
            .load(device)
            .await?;
        Self::from_parts(config, tokenizer, options.max_length, &tensors, device)
    }

    pub fn config(&self) -> &BertConfig {
        &self.config
    }
}

/// Names a parameter may carry in a checkpoint, most common first.
fn checkpoint_names(name: &str) -> Vec<String> {
    let mut names = vec![name.to_string(), format!("bert.{name}")];
    if name.contains("LayerNorm") {
        let legacy = name
            .replace("LayerNorm.weight", "LayerNorm.gamma")
            .replace("LayerNorm.bias", "LayerNorm.beta");
        names.push(format!("bert.{legacy}"));
        names.push(legacy);
    }
    names
}

impl SentenceEncoder for BertEncoder {
    fn encode(&self, texts: &[&str]) -> anyhow::Result<Tensor> {
        if texts.is_empty() {
            return Ok(Tensor::zeros((0, self.config.hidden_size), DType::F32, &self.device)?);
        }
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(anyhow::Error::msg)?;
        let seq_len = encodings.first().map_or(0, |e| e.len());

        let mut ids = Vec::with_capacity(texts.len() * seq_len);
        let mut type_ids = Vec::with_capacity(texts.len() * seq_len);
        let mut mask = Vec::with_capacity(texts.len() * seq_len);
        for encoding in &encodings {
            if encoding.len() != seq_len {
                anyhow::bail!("tokenizer returned ragged batch; padding is not configured");
            }
            ids.extend_from_slice(encoding.get_ids());
            type_ids.extend_from_slice(encoding.get_type_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }

        let shape = (texts.len(), seq_len);
        let ids = Tensor::from_vec(ids, shape, &self.device)?;
        let type_ids = Tensor::from_vec(type_ids, shape, &self.device)?;
        let mask = Tensor::from_vec(mask, shape, &self.device)?;

        // 0 for real tokens, -1e4 for padding, broadcast over heads and queries.
        let mask_bias = mask
            .to_dtype(DType::F32)?
            .affine(1e4, -1e4)?
            .reshape((texts.len(), 1, 1, seq_len))?;

        let mut hidden = self.embeddings.forward(&ids, &type_ids)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mask_bias)?;
        }
        Ok(mean_pool(&hidden, &mask)?)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn fork(&self) -> anyhow::Result<Self> {
        let (varmap, (embeddings, layers)) =
            fork_varmap(&self.varmap, &self.device, |vb| Self::build(&self.config, vb))?;
        Ok(Self {
            varmap,
            embeddings,
            layers,
            config: self.config.clone(),
            tokenizer: self.tokenizer.clone(),
            device: self.device.clone(),
        })
    }
}

impl PretrainedEncoder for BertEncoder {
    type Options = BertOptions;

    async fn load(options: Self::Options, device: Device) -> anyhow::Result<Self> {
        Self::from_hub(&options, &device).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_name_fallbacks() {
        let names = checkpoint_names("embeddings.LayerNorm.weight");
        assert_eq!(names[0], "embeddings.LayerNorm.weight");
        assert!(names.contains(&"bert.embeddings.LayerNorm.gamma".to_string()));

        let names = checkpoint_names("encoder.layer.0.attention.self.query.bias");
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_config_defaults() {
        let config: BertConfig = serde_json::from_str(
            r#"{"vocab_size": 30522, "hidden_size": 384, "num_hidden_layers": 3,
                "num_attention_heads": 12, "intermediate_size": 1536, "model_type": "bert"}"#,
        )
        .unwrap();
        assert_eq!(config.max_position_embeddings, 512);
        assert_eq!(config.type_vocab_size, 2);
        assert_eq!(config.layer_norm_eps, 1e-12);
    }

    #[test]
    fn test_options_cache_key() {
        let options = BertOptions::default().max_length(64);
        assert_eq!(
            options.cache_key(),
            "sentence-transformers/paraphrase-MiniLM-L3-v2@64"
        );
    }
}
