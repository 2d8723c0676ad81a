//! The assembled vault.
//!
//! [`Vault`] wires configuration to the index, the ingestion pipeline, the
//! watcher, and the query engine, and exposes the operations outer surfaces
//! (the CLI, or an HTTP layer) consume. Capabilities (embedder, OCR,
//! intent parser) are built once and shared; [`Capabilities`] lets callers
//! swap them, which is how the tests inject deterministic fakes.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::extract::ContentExtractor;
use crate::index::VectorIndex;
use crate::intent::{create_intent_parser, IntentParser};
use crate::models::{FileRecord, IndexStats, SearchFilters};
use crate::ocr::{create_recognizer, TextRecognizer};
use crate::pipeline::{IngestOutcome, IngestPipeline, ScanReport};
use crate::search::{QueryEngine, SearchResponse};
use crate::tagger::ZeroShotTagger;
use crate::walk::PathFilter;
use crate::watcher::{FileWatcher, WatcherHealth};

/// The external capabilities the vault depends on.
#[derive(Clone)]
pub struct Capabilities {
    pub embedder: Arc<dyn Embedder>,
    pub ocr: Arc<dyn TextRecognizer>,
    pub intent: Arc<dyn IntentParser>,
}

impl Capabilities {
    pub fn from_config(config: &Config) -> Self {
        Self {
            embedder: create_embedder(&config.models),
            ocr: create_recognizer(&config.ocr),
            intent: create_intent_parser(&config.intent),
        }
    }
}

pub struct Vault {
    config: Config,
    index: VectorIndex,
    pipeline: Arc<IngestPipeline>,
    engine: QueryEngine,
    health: Arc<WatcherHealth>,
}

impl Vault {
    pub async fn open(config: Config) -> Result<Self> {
        let capabilities = Capabilities::from_config(&config);
        Self::open_with(config, capabilities).await
    }

    pub async fn open_with(config: Config, capabilities: Capabilities) -> Result<Self> {
        let filter = Arc::new(PathFilter::from_config(&config)?);
        let index = VectorIndex::open(&config.db.path)
            .await
            .with_context(|| format!("Failed to open index at {}", config.db.path.display()))?;

        let extractor = ContentExtractor::new(
            capabilities.ocr.clone(),
            config.ingest.max_text_chars,
            config.ingest.min_text_chars,
        );
        let tagger = config.tagging.enabled.then(|| {
            ZeroShotTagger::new(
                capabilities.embedder.clone(),
                config.tagging.labels.clone(),
                config.tagging.top_n,
            )
        });
        let pipeline = Arc::new(IngestPipeline::new(
            filter,
            config.watch.max_file_size,
            config.ingest.workers,
            extractor,
            capabilities.embedder.clone(),
            tagger,
            index.clone(),
        ));
        let engine = QueryEngine::new(
            capabilities.embedder,
            index.clone(),
            capabilities.intent,
            config.search.clone(),
        );

        Ok(Self {
            config,
            index,
            pipeline,
            engine,
            health: Arc::new(WatcherHealth::default()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn pipeline(&self) -> &Arc<IngestPipeline> {
        &self.pipeline
    }

    pub fn watcher_health(&self) -> &Arc<WatcherHealth> {
        &self.health
    }

    pub async fn search(
        &self,
        query: &str,
        k: Option<usize>,
        filters: SearchFilters,
    ) -> SearchResponse {
        self.engine.search(query, k, filters).await
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let mut stats = self.index.stats().await?;
        stats.in_flight = self.pipeline.in_flight();
        stats.watcher_error = self.health.last_error();
        Ok(stats)
    }

    pub async fn list_all(&self) -> Result<Vec<FileRecord>> {
        Ok(self.index.list_records().await?)
    }

    /// One random indexed file.
    pub async fn surprise(&self) -> Result<Option<FileRecord>> {
        Ok(self.index.random_indexed().await?)
    }

    /// Re-ingest one file even if its content is unchanged.
    pub async fn ingest(&self, path: &Path) -> Result<IngestOutcome> {
        Ok(self.pipeline.ingest(path, true).await?)
    }

    pub async fn scan_now(&self) -> Result<ScanReport> {
        let report = self.pipeline.scan_now().await?;
        Ok(report)
    }

    /// Reconcile, then follow filesystem changes until `shutdown` resolves.
    /// In-flight ingestions are abandoned at shutdown; none of them can
    /// leave a partial write behind.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (tx, rx) = mpsc::channel(self.config.watch.queue_capacity);
        let consumer = tokio::spawn(self.pipeline.clone().run(rx));

        let watcher = match FileWatcher::start(
            self.pipeline.filter().clone(),
            tx,
            self.config.watch.debounce(),
            self.health.clone(),
        ) {
            Ok(w) => Some(w),
            Err(e) => {
                self.health.mark_degraded(e.to_string());
                None
            }
        };

        // Anything that changed while we were not running.
        match self.scan_now().await {
            Ok(report) => info!(?report, "startup scan complete"),
            Err(e) => error!(error = %e, "startup scan failed"),
        }

        let mut ticker = tokio::time::interval(self.config.watch.degraded_rescan());
        ticker.tick().await;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if self.health.is_degraded() {
                        warn!("watcher degraded; rescanning");
                        if let Err(e) = self.scan_now().await {
                            error!(error = %e, "rescan failed");
                        }
                    }
                }
            }
        }

        info!("shutting down");
        if let Some(watcher) = watcher {
            watcher.stop(self.pipeline.filter().root());
        }
        consumer.abort();
        let _ = consumer.await;
        Ok(())
    }

    pub async fn close(&self) {
        self.index.close().await;
    }
}
