//! fastembed-backed local models.
//!
//! Three models back the two embedding spaces:
//!
//! | Model | Space | Used for |
//! |-------|-------|----------|
//! | CLIP ViT-B/32 vision | image (512) | image entries |
//! | CLIP ViT-B/32 text | image (512) | queries and tag prompts against images |
//! | all-MiniLM-L6-v2 | text (384) | documents, OCR text, text queries |
//!
//! Each model is initialized on first use inside a `tokio::sync::OnceCell`,
//! so concurrent first callers wait on a single load. The outcome is cached
//! either way: a model that failed to load reports `ModelUnavailable` for
//! the rest of the process without retrying the download.
//!
//! fastembed models are not `Sync`; each lives behind a `Mutex` and runs
//! inside `spawn_blocking`.

use async_trait::async_trait;
use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
    TextEmbedding,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::{normalize, Embedder};
use crate::config::ModelsConfig;
use crate::error::EmbedError;
use crate::models::Modality;

type Shared<T> = Arc<Mutex<T>>;
type Slot<T> = OnceCell<Result<Shared<T>, String>>;

pub struct LocalEmbedder {
    cache_dir: Option<PathBuf>,
    show_download_progress: bool,
    sentence: Slot<TextEmbedding>,
    clip_text: Slot<TextEmbedding>,
    clip_vision: Slot<ImageEmbedding>,
}

impl LocalEmbedder {
    pub fn new(config: &ModelsConfig) -> Self {
        Self {
            cache_dir: config.cache_dir.clone(),
            show_download_progress: config.show_download_progress,
            sentence: OnceCell::new(),
            clip_text: OnceCell::new(),
            clip_vision: OnceCell::new(),
        }
    }

    fn text_options(&self, model: EmbeddingModel) -> InitOptions {
        let mut init =
            InitOptions::new(model).with_show_download_progress(self.show_download_progress);
        if let Some(dir) = &self.cache_dir {
            init = init.with_cache_dir(dir.clone());
        }
        init
    }

    fn image_options(&self) -> ImageInitOptions {
        let mut init = ImageInitOptions::new(ImageEmbeddingModel::ClipVitB32)
            .with_show_download_progress(self.show_download_progress);
        if let Some(dir) = &self.cache_dir {
            init = init.with_cache_dir(dir.clone());
        }
        init
    }

    async fn text_model(
        &self,
        slot: &Slot<TextEmbedding>,
        model: EmbeddingModel,
        modality: Modality,
    ) -> Result<Shared<TextEmbedding>, EmbedError> {
        let options = self.text_options(model.clone());
        let loaded = slot
            .get_or_init(|| async move {
                info!(?model, "loading text embedding model");
                let result = tokio::task::spawn_blocking(move || TextEmbedding::try_new(options))
                    .await
                    .map_err(|e| format!("model load task failed: {}", e))
                    .and_then(|r| r.map_err(|e| e.to_string()));
                if let Err(e) = &result {
                    warn!(?model, error = %e, "text embedding model unavailable");
                }
                result.map(|m| Arc::new(Mutex::new(m)))
            })
            .await;
        loaded.clone().map_err(|reason| EmbedError::ModelUnavailable { modality, reason })
    }

    async fn vision_model(&self) -> Result<Shared<ImageEmbedding>, EmbedError> {
        let options = self.image_options();
        let loaded = self
            .clip_vision
            .get_or_init(|| async move {
                info!("loading CLIP vision model");
                let result = tokio::task::spawn_blocking(move || ImageEmbedding::try_new(options))
                    .await
                    .map_err(|e| format!("model load task failed: {}", e))
                    .and_then(|r| r.map_err(|e| e.to_string()));
                if let Err(e) = &result {
                    warn!(error = %e, "CLIP vision model unavailable");
                }
                result.map(|m| Arc::new(Mutex::new(m)))
            })
            .await;
        loaded.clone().map_err(|reason| EmbedError::ModelUnavailable {
            modality: Modality::Image,
            reason,
        })
    }

    async fn run_text(model: Shared<TextEmbedding>, text: String) -> Result<Vec<f32>, EmbedError> {
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|e| EmbedError::Embedding(format!("model lock poisoned: {}", e)))?;
            let out = model
                .embed(vec![text], None)
                .map_err(|e| EmbedError::Embedding(e.to_string()))?;
            out.into_iter()
                .next()
                .map(normalize)
                .ok_or_else(|| EmbedError::Embedding("empty embedding response".to_string()))
        })
        .await
        .map_err(|e| EmbedError::Embedding(format!("embedding task failed: {}", e)))?
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn name(&self) -> &str {
        "local"
    }

    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError> {
        let model = self.vision_model().await?;
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|e| EmbedError::Embedding(format!("model lock poisoned: {}", e)))?;
            let out = model
                .embed_bytes(&[bytes.as_slice()], None)
                .map_err(|e| EmbedError::Embedding(e.to_string()))?;
            out.into_iter()
                .next()
                .map(normalize)
                .ok_or_else(|| EmbedError::Embedding("empty embedding response".to_string()))
        })
        .await
        .map_err(|e| EmbedError::Embedding(format!("embedding task failed: {}", e)))?
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let model = self
            .text_model(&self.sentence, EmbeddingModel::AllMiniLML6V2, Modality::Text)
            .await?;
        Self::run_text(model, text.to_string()).await
    }

    async fn embed_text_for_images(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let model = self
            .text_model(&self.clip_text, EmbeddingModel::ClipVitB32, Modality::Image)
            .await?;
        Self::run_text(model, text.to_string()).await
    }
}
