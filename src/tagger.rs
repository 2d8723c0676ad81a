//! Zero-shot auto-tagging of images.
//!
//! Each candidate label is embedded once as the prompt `"a photo of {label}"`
//! in the image space. An image's tags are the `top_n` labels ranked by
//! softmax over `100 × cosine` similarities.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::EmbedError;
use crate::models::Tag;

/// Temperature applied before the softmax, matching CLIP's logit scale.
const LOGIT_SCALE: f32 = 100.0;

#[rustfmt::skip]
const DEFAULT_LABELS: &[&str] = &[
    "nature", "landscape", "sunset", "mountains", "beach", "ocean", "forest",
    "city", "architecture", "building", "street",
    "people", "portrait", "group photo", "selfie", "family",
    "food", "cooking", "restaurant",
    "animal", "pet", "dog", "cat", "bird", "wildlife",
    "car", "vehicle", "travel", "airplane",
    "sports", "fitness", "outdoor activity",
    "celebration", "party", "wedding", "birthday",
    "document", "screenshot", "text", "whiteboard", "handwriting",
    "art", "painting", "illustration", "design",
    "technology", "computer", "gadget",
    "flower", "garden", "plant",
    "night", "indoor", "outdoor",
    "meme", "comic", "infographic",
];

pub fn default_labels() -> Vec<String> {
    DEFAULT_LABELS.iter().map(|s| s.to_string()).collect()
}

pub fn prompt_for(label: &str) -> String {
    format!("a photo of {}", label)
}

/// Rank every label by softmax probability, highest first.
pub fn rank_labels(image_vec: &[f32], labels: &[String], label_vecs: &[Vec<f32>]) -> Vec<Tag> {
    let logits: Vec<f32> = label_vecs
        .iter()
        .map(|v| cosine_similarity(image_vec, v) * LOGIT_SCALE)
        .collect();
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    let mut tags: Vec<Tag> = labels
        .iter()
        .zip(exps)
        .map(|(label, e)| Tag {
            label: label.clone(),
            score: if sum > 0.0 { e / sum } else { 0.0 },
        })
        .collect();
    tags.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.label.cmp(&b.label)));
    tags
}

/// Tags images against a fixed label set, caching the label embeddings.
pub struct ZeroShotTagger {
    embedder: Arc<dyn Embedder>,
    labels: Vec<String>,
    top_n: usize,
    label_vecs: OnceCell<Vec<Vec<f32>>>,
}

impl ZeroShotTagger {
    pub fn new(embedder: Arc<dyn Embedder>, labels: Vec<String>, top_n: usize) -> Self {
        Self {
            embedder,
            labels,
            top_n,
            label_vecs: OnceCell::new(),
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Only a complete set is cached; a failed attempt is retried on the
    /// next image.
    async fn label_vectors(&self) -> Result<&Vec<Vec<f32>>, EmbedError> {
        self.label_vecs
            .get_or_try_init(|| async {
                let mut vecs = Vec::with_capacity(self.labels.len());
                for label in &self.labels {
                    vecs.push(self.embedder.embed_text_for_images(&prompt_for(label)).await?);
                }
                debug!(count = vecs.len(), "tag label embeddings ready");
                Ok::<_, EmbedError>(vecs)
            })
            .await
    }

    /// Top tags for an already-embedded image. Tagging is best effort: any
    /// failure yields no tags.
    pub async fn tag(&self, image_vec: &[f32]) -> Vec<Tag> {
        if self.labels.is_empty() || self.top_n == 0 {
            return Vec::new();
        }
        match self.label_vectors().await {
            Ok(label_vecs) => {
                let mut tags = rank_labels(image_vec, &self.labels, label_vecs);
                tags.truncate(self.top_n);
                tags
            }
            Err(e) if e.is_model_unavailable() => {
                debug!(error = %e, "auto-tagging unavailable");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "auto-tagging failed for this image");
                Vec::new()
            }
        }
    }
}
