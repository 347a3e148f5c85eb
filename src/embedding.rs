use std::hash::Hasher;

use candle_core::{DType, Tensor};
use twox_hash::XxHash64;

use crate::error::{Error, Result};

/// Turns text into fixed-length dense vectors.
///
/// The same implementation (and model id) must be used to build an index
/// and to query it; [`crate::store::IndexStore::check_embedder`] enforces
/// that at load time.
pub trait Embedder: Send + Sync {
    /// Identifier recorded in the index file.
    fn model_id(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Encode a batch of texts, one vector per input, in input order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| Error::Embedding("encoder returned no vector".into()))
    }
}

pub const HASH_EMBEDDER_DIM: usize = 384;
pub const HASH_EMBEDDER_MODEL_ID: &str = "hash-embedder-384";

/// Deterministic bag-of-words embedder for offline use and tests.
///
/// Each lowercase alphanumeric token is hashed into one of `dimension`
/// buckets and the result is L2-normalized. Texts sharing words land close
/// together, which is enough for exercising the retrieval pipeline without
/// downloading a model.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: format!("hash-embedder-{dimension}"),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty());

        for token in tokens {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.to_lowercase().as_bytes());
            let h = hasher.finish();
            v[(h as usize) % self.dimension] += 1.0;
        }

        l2_normalize(&mut v);
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_EMBEDDER_DIM)
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Mean-pool token states over the attention mask, then L2-normalize.
///
/// `hidden` is `[B, T, H]`, `attention_mask` is `[B, T]`; returns `[B, H]`.
pub fn masked_mean_l2(
    hidden: &Tensor,
    attention_mask: &Tensor,
) -> candle_core::Result<Tensor> {
    let mask = attention_mask
        .to_device(hidden.device())?
        .to_dtype(hidden.dtype())?
        .unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let lengths = mask.sum(1)?;
    let mean = summed.broadcast_div(&lengths)?;

    let eps = match hidden.dtype() {
        DType::F16 | DType::BF16 => 1e-6,
        _ => 1e-12,
    };
    let norm = (mean.sqr()?.sum_keepdim(1)?.sqrt()? + eps)?;
    mean.broadcast_div(&norm)
}

/// Convert a 2D tensor `[B, H]` into one `Vec<f32>` per row.
pub fn tensor_to_rows(tensor: &Tensor) -> Result<Vec<Vec<f32>>> {
    Ok(tensor.to_dtype(DType::F32)?.to_vec2::<f32>()?)
}
