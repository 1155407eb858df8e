//! Model and tokenizer loading utilities for Hugging Face Hub integration.
//!
//! Sentence-transformer checkpoints are split into three files that the
//! [`BertEncoder`](crate::models::BertEncoder) needs:
//! - `config.json` (architecture), read by [`JsonConfigLoader`]
//! - `tokenizer.json`, read by [`TokenizerLoader`]
//! - `model.safetensors`, read by [`SafetensorsLoader`]
//!
//! All loaders go through [`HfLoader`], which retries when the hub cache lock
//! is held by another process.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::PathBuf;

use candle_core::{Device, Tensor};
use serde::de::DeserializeOwned;
use tokenizers::Tokenizer;

#[derive(Debug, Clone)]
pub struct HfLoader {
    pub repo: String,
    pub filename: String,
}

impl HfLoader {
    pub fn new(repo: &str, filename: &str) -> Self {
        Self {
            repo: repo.into(),
            filename: filename.into(),
        }
    }

    pub async fn load(&self) -> anyhow::Result<PathBuf> {
        let hf_api = hf_hub::api::tokio::ApiBuilder::new()
            .with_chunk_size(None)
            .build()?;
        let hf_api = hf_api.model(self.repo.clone());

        let max_retries = 3;
        let mut attempt = 0;
        loop {
            match hf_api.get(self.filename.as_str()).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    let lock_contention = e.to_string().contains("Lock acquisition failed");
                    if lock_contention && attempt + 1 < max_retries {
                        let wait_time = std::time::Duration::from_millis(100 * (1 << attempt));
                        tracing::debug!(
                            repo = %self.repo,
                            file = %self.filename,
                            attempt,
                            "hub cache locked, retrying"
                        );
                        tokio::time::sleep(wait_time).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(anyhow::Error::from(e)
                        .context(format!("fetching {} from {}", self.filename, self.repo)));
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct TokenizerLoader {
    pub tokenizer_file_loader: HfLoader,
}

impl TokenizerLoader {
    pub fn new(repo: &str, filename: &str) -> Self {
        Self {
            tokenizer_file_loader: HfLoader::new(repo, filename),
        }
    }

    pub async fn load(&self) -> anyhow::Result<Tokenizer> {
        let tokenizer_file_path = self.tokenizer_file_loader.load().await?;
        Tokenizer::from_file(tokenizer_file_path).map_err(anyhow::Error::msg)
    }
}

/// Loads and deserializes a JSON file such as `config.json`.
pub struct JsonConfigLoader<T> {
    pub config_file_loader: HfLoader,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> JsonConfigLoader<T> {
    pub fn new(repo: &str, filename: &str) -> Self {
        Self {
            config_file_loader: HfLoader::new(repo, filename),
            _marker: PhantomData,
        }
    }

    pub async fn load(&self) -> anyhow::Result<T> {
        let path = self.config_file_loader.load().await?;
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
    }
}

/// Loads every tensor of a `.safetensors` checkpoint onto a device.
#[derive(Clone)]
pub struct SafetensorsLoader {
    pub model_file_loader: HfLoader,
}

impl SafetensorsLoader {
    pub fn new(repo: &str, filename: &str) -> Self {
        Self {
            model_file_loader: HfLoader::new(repo, filename),
        }
    }

    pub async fn load(&self, device: &Device) -> anyhow::Result<HashMap<String, Tensor>> {
        let path = self.model_file_loader.load().await?;
        let tensors = candle_core::safetensors::load(&path, device)
            .map_err(|e| e.with_path(path))?;
        Ok(tensors)
    }
}
