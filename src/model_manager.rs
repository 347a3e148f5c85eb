use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use serde::Deserialize;
use tokenizers::{
    PaddingParams,
    PaddingStrategy,
    Tokenizer,
    TruncationParams,
};

use crate::{
    embedding::{
        Embedder,
        HASH_EMBEDDER_MODEL_ID,
        HashEmbedder,
        masked_mean_l2,
        tensor_to_rows,
    },
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const MODEL_ENV_VAR: &str = "DIVINE_EMBEDDING_MODEL";
pub const FAKE_EMBEDDINGS_ENV_VAR: &str = "DIVINE_FAKE_EMBEDDINGS";

/// all-MiniLM-L6-v2 was trained with 256-token inputs.
const MAX_SEQUENCE_LENGTH: usize = 256;

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

fn embedding_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Embedding(format!("{context}: {e}"))
}

/// Decides which embedder a command runs with and loads it.
///
/// Loading happens eagerly in [`ModelManager::load`] so that a missing
/// model fails a build before any artifact is written.
#[derive(Debug, Clone)]
pub struct ModelManager {
    model_id: String,
    fake: bool,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Creates a new `ModelManager`. The model ID is resolved from:
    /// 1. The `DIVINE_EMBEDDING_MODEL` environment variable, if set
    /// 2. Otherwise, the default model (`sentence-transformers/all-MiniLM-L6-v2`)
    ///
    /// Setting `DIVINE_FAKE_EMBEDDINGS=1` swaps in the hashing embedder.
    pub fn new() -> Self {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());
        Self {
            model_id,
            fake: fake_embeddings_requested(),
        }
    }

    /// Creates a `ModelManager` with an explicit model ID, bypassing
    /// environment variable resolution.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model_id,
            fake: false,
        }
    }

    pub fn with_fake_embeddings(mut self, fake: bool) -> Self {
        self.fake = self.fake || fake;
        self
    }

    /// Returns the model ID that will be loaded.
    pub fn model_id(&self) -> &str {
        if self.fake {
            HASH_EMBEDDER_MODEL_ID
        } else {
            &self.model_id
        }
    }

    pub fn uses_fake_embeddings(&self) -> bool {
        self.fake
    }

    pub fn load(&self) -> Result<Arc<dyn Embedder>> {
        if self.fake {
            tracing::info!("using hashing embedder");
            return Ok(Arc::new(HashEmbedder::default()));
        }
        Ok(Arc::new(SentenceEmbedder::load(&self.model_id)?))
    }
}

/// Whether `DIVINE_FAKE_EMBEDDINGS` asks for the hashing embedder.
pub fn fake_embeddings_requested() -> bool {
    std::env::var(FAKE_EMBEDDINGS_ENV_VAR)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[derive(Deserialize)]
struct HiddenSize {
    hidden_size: usize,
}

/// A BERT sentence encoder: token states mean-pooled over the attention
/// mask and L2-normalized.
pub struct SentenceEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    dimension: usize,
}

impl SentenceEmbedder {
    /// Load from a local directory or download from the Hugging Face Hub.
    pub fn load(model_id: &str) -> Result<Self> {
        let files = ModelFiles::resolve(model_id)?;
        let device = default_device();

        let config_json = std::fs::read_to_string(&files.config)?;
        let config: Config = serde_json::from_str(&config_json)?;
        let HiddenSize { hidden_size } = serde_json::from_str(&config_json)?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| embedding_err("failed to load tokenizer", e))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| embedding_err("invalid truncation", e))?;

        // SAFETY: the weights file is not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(
                &[files.weights],
                DTYPE,
                &device,
            )?
        };
        let model = BertModel::load(vb, &config)?;

        tracing::info!(
            model = model_id,
            dimension = hidden_size,
            "embedding model loaded"
        );

        Ok(Self {
            model,
            tokenizer,
            device,
            model_id: model_id.to_string(),
            dimension: hidden_size,
        })
    }

    fn encode(&self, texts: &[String]) -> Result<Tensor> {
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| embedding_err("tokenization failed", e))?;

        let ids = encodings
            .iter()
            .map(|e| Tensor::new(e.get_ids(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let masks = encodings
            .iter()
            .map(|e| Tensor::new(e.get_attention_mask(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;

        let input_ids = Tensor::stack(&ids, 0)?;
        let attention_mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden = self.model.forward(
            &input_ids,
            &token_type_ids,
            Some(&attention_mask),
        )?;
        Ok(masked_mean_l2(&hidden, &attention_mask)?)
    }
}

impl Embedder for SentenceEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tensor_to_rows(&self.encode(texts)?)
    }
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl ModelFiles {
    fn resolve(model_id: &str) -> Result<Self> {
        let local = Path::new(model_id);
        if local.is_dir() {
            return Ok(Self {
                config: local.join("config.json"),
                tokenizer: local.join("tokenizer.json"),
                weights: local.join("model.safetensors"),
            });
        }

        let api = Api::new().map_err(|e| embedding_err(model_id, e))?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
        let fetch =
            |name: &str| repo.get(name).map_err(|e| embedding_err(model_id, e));

        Ok(Self {
            config: fetch("config.json")?,
            tokenizer: fetch("tokenizer.json")?,
            weights: fetch("model.safetensors")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_model_id() {
        let manager = ModelManager::with_model_id("custom/model".to_string());
        assert_eq!(manager.model_id(), "custom/model");
        assert!(!manager.uses_fake_embeddings());
    }

    #[test]
    fn fake_embeddings_report_hash_model() {
        let manager = ModelManager::with_model_id(DEFAULT_MODEL_ID.to_string())
            .with_fake_embeddings(true);
        let embedder = manager.load().unwrap();

        assert_eq!(manager.model_id(), embedder.model_id());
        assert_eq!(embedder.dimension(), 384);
    }

    #[test]
    fn missing_local_model_fails_to_load() {
        let tmp = tempfile::tempdir().unwrap();
        let result = SentenceEmbedder::load(tmp.path().to_str().unwrap());
        assert!(result.is_err());
    }
}
