//! Hashed bag-of-n-grams sentence encoder.
//!
//! Each text becomes a bag of hashed word and character n-gram buckets; the
//! bucket embeddings are averaged and passed through a linear projection.
//! Needs no download, initialises deterministically from a seed and trains in
//! milliseconds, which makes it the backbone of choice for tests and for
//! quick baselines before reaching for a transformer.

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Module, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::ModelOptions;
use crate::models::components::{linear, Embedding, Linear};
use crate::models::utils::fork_varmap;
use crate::pipelines::setfit_pipeline::model::{PretrainedEncoder, SentenceEncoder};

/// Bucket reserved for texts without any word characters.
const EMPTY_BUCKET: u32 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashedBagConfig {
    pub num_buckets: usize,
    pub hidden_size: usize,
    /// Character n-gram length; 0 keeps whole words only.
    pub ngram: usize,
    pub seed: u64,
}

impl Default for HashedBagConfig {
    fn default() -> Self {
        Self {
            num_buckets: 4096,
            hidden_size: 64,
            ngram: 3,
            seed: 0,
        }
    }
}

impl ModelOptions for HashedBagConfig {
    fn cache_key(&self) -> String {
        format!(
            "hashed-bag-{}x{}-n{}-s{}",
            self.num_buckets, self.hidden_size, self.ngram, self.seed
        )
    }
}

pub struct HashedBagEncoder {
    varmap: VarMap,
    embeddings: Embedding,
    projection: Linear,
    config: HashedBagConfig,
    device: Device,
}

impl HashedBagEncoder {
    pub fn new(config: HashedBagConfig, device: &Device) -> anyhow::Result<Self> {
        if config.num_buckets < 2 || config.hidden_size == 0 {
            anyhow::bail!("hashed bag encoder needs at least 2 buckets and a non-zero hidden size");
        }
        let mut varmap = VarMap::new();
        let (embeddings, projection) = Self::build(
            &config,
            VarBuilder::from_varmap(&varmap, DType::F32, device),
        )?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let (buckets, hidden) = (config.num_buckets, config.hidden_size);
        let emb_bound = 1.0 / (hidden as f32).sqrt();
        let proj_bound = (3.0 / hidden as f32).sqrt();
        varmap.set_one(
            "embeddings.weight",
            uniform(&mut rng, (buckets, hidden), emb_bound, device)?,
        )?;
        varmap.set_one(
            "projection.weight",
            uniform(&mut rng, (hidden, hidden), proj_bound, device)?,
        )?;
        varmap.set_one(
            "projection.bias",
            Tensor::zeros(hidden, DType::F32, device)?,
        )?;

        Ok(Self {
            varmap,
            embeddings,
            projection,
            config,
            device: device.clone(),
        })
    }

    fn build(config: &HashedBagConfig, vb: VarBuilder) -> candle_core::Result<(Embedding, Linear)> {
        let embeddings = Embedding::new(config.num_buckets, config.hidden_size, vb.pp("embeddings"))?;
        let projection = linear(config.hidden_size, config.hidden_size, vb.pp("projection"))?;
        Ok((embeddings, projection))
    }

    pub fn config(&self) -> &HashedBagConfig {
        &self.config
    }

    /// Bucket ids for one text: each lowercase word, then its character n-grams.
    pub fn features(&self, text: &str) -> Vec<u32> {
        let mut ids = Vec::new();
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            ids.push(self.bucket(b'w', &word));
            if self.config.ngram > 0 {
                let chars: Vec<char> = format!("<{word}>").chars().collect();
                for gram in chars.windows(self.config.ngram) {
                    let gram: String = gram.iter().collect();
                    ids.push(self.bucket(b'c', &gram));
                }
            }
        }
        if ids.is_empty() {
            ids.push(EMPTY_BUCKET);
        }
        ids
    }

    fn bucket(&self, namespace: u8, token: &str) -> u32 {
        // FNV-1a, stable across runs and platforms.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in std::iter::once(namespace).chain(token.bytes()) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        1 + (hash % (self.config.num_buckets as u64 - 1)) as u32
    }
}

fn uniform(
    rng: &mut StdRng,
    shape: (usize, usize),
    bound: f32,
    device: &Device,
) -> candle_core::Result<Tensor> {
    let data: Vec<f32> = (0..shape.0 * shape.1)
        .map(|_| rng.random_range(-bound..bound))
        .collect();
    Tensor::from_vec(data, shape, device)
}

impl SentenceEncoder for HashedBagEncoder {
    fn encode(&self, texts: &[&str]) -> anyhow::Result<Tensor> {
        if texts.is_empty() {
            return Ok(Tensor::zeros((0, self.config.hidden_size), DType::F32, &self.device)?);
        }
        let features: Vec<Vec<u32>> = texts.iter().map(|t| self.features(t)).collect();
        let ids: Vec<u32> = features.iter().flatten().copied().collect();
        let total = ids.len();

        // One embedding lookup for the whole batch, then a mean per text segment.
        let bucket_embeddings = self
            .embeddings
            .forward(&Tensor::from_vec(ids, total, &self.device)?)?;
        let mut rows = Vec::with_capacity(texts.len());
        let mut offset = 0;
        for feats in &features {
            rows.push(bucket_embeddings.narrow(0, offset, feats.len())?.mean_keepdim(0)?);
            offset += feats.len();
        }
        let bag = Tensor::cat(&rows, 0)?;
        Ok(self.projection.forward(&bag)?)
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
        let (varmap, (embeddings, projection)) =
            fork_varmap(&self.varmap, &self.device, |vb| Self::build(&self.config, vb))?;
        Ok(Self {
            varmap,
            embeddings,
            projection,
            config: self.config.clone(),
            device: self.device.clone(),
        })
    }
}

impl PretrainedEncoder for HashedBagEncoder {
    type Options = HashedBagConfig;

    async fn load(options: Self::Options, device: Device) -> anyhow::Result<Self> {
        Self::new(options, &device)
    }
}
