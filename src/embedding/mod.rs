//! Embedding Provider capability and vector utilities.
//!
//! [`Embedder`] is the shared capability handle: constructed once at startup
//! by [`create_embedder`], wrapped in an `Arc`, and passed to the pipeline,
//! the tagger, and the query engine. Implementations:
//! - **[`DisabledEmbedder`]**: every call fails with `ModelUnavailable`.
//! - **`LocalEmbedder`**: fastembed CLIP ViT-B/32 (512-d image space) and
//!   all-MiniLM-L6-v2 (384-d text space), loaded lazily and exactly once.
//!
//! Vectors are stored in SQLite as little-endian `f32` BLOBs
//! ([`vec_to_blob`] / [`blob_to_vec`]) and compared with
//! [`cosine_similarity`].

#[cfg(feature = "local-embeddings-fastembed")]
pub mod local;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::config::ModelsConfig;
use crate::error::EmbedError;
use crate::models::{Modality, Tag};

/// Image, text, and zero-shot classification capabilities.
///
/// Implementations are deterministic for a given set of weights and input.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// Embed encoded image bytes into the 512-d image space.
    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError>;

    /// Embed text into the 384-d text space.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embed text into the image space, for cross-modal comparison against
    /// image entries.
    async fn embed_text_for_images(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Rank `labels` for an image by zero-shot similarity.
    async fn zero_shot_tags(
        &self,
        image: &[u8],
        labels: &[String],
    ) -> Result<Vec<Tag>, EmbedError> {
        let image_vec = self.embed_image(image).await?;
        let mut label_vecs = Vec::with_capacity(labels.len());
        for label in labels {
            label_vecs.push(self.embed_text_for_images(&crate::tagger::prompt_for(label)).await?);
        }
        Ok(crate::tagger::rank_labels(&image_vec, labels, &label_vecs))
    }
}

/// An embedder whose models are never available.
pub struct DisabledEmbedder {
    reason: String,
}

impl DisabledEmbedder {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable(&self, modality: Modality) -> EmbedError {
        EmbedError::ModelUnavailable {
            modality,
            reason: self.reason.clone(),
        }
    }
}

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn embed_image(&self, _bytes: &[u8]) -> Result<Vec<f32>, EmbedError> {
        Err(self.unavailable(Modality::Image))
    }

    async fn embed_text(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(self.unavailable(Modality::Text))
    }

    async fn embed_text_for_images(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(self.unavailable(Modality::Image))
    }
}

/// Build the embedder named by `[models] provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires the `local-embeddings-fastembed` feature) |
///
/// Model weights are not touched here; the local embedder loads them on
/// first use.
pub fn create_embedder(config: &ModelsConfig) -> Arc<dyn Embedder> {
    match config.provider.as_str() {
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Arc::new(local::LocalEmbedder::new(config)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => {
            warn!("models.provider = \"local\" but built without local-embeddings-fastembed");
            Arc::new(DisabledEmbedder::new(
                "built without the local-embeddings-fastembed feature",
            ))
        }
        "disabled" => Arc::new(DisabledEmbedder::new("models.provider is disabled")),
        other => {
            warn!(provider = other, "unknown models provider; embeddings disabled");
            Arc::new(DisabledEmbedder::new(format!("unknown provider {}", other)))
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use lifevault::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Scale to unit length. Zero vectors are returned unchanged.
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}
