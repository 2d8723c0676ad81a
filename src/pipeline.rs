//! Ingestion Pipeline.
//!
//! Drives one file at a time through
//!
//! ```text
//! Discovered ─▶ Extracting ─▶ Embedding ─▶ Indexed
//!                   │              └─▶ EmbeddingFailed
//!                   ├─▶ ExtractionFailed
//!                   └─▶ Unsupported
//! ```
//!
//! and keeps the [`VectorIndex`] in step with the filesystem.
//!
//! - **Idempotence**: a file whose SHA-256 matches its stored record never
//!   re-enters extraction unless the caller forces it. Failed files are
//!   therefore retried only when their content changes.
//! - **All-or-nothing**: a file's entries are replaced in one index
//!   transaction after every embedding has been computed. An embedding
//!   error discards the whole attempt and leaves the file with no entries.
//! - **Per-path serialization**: every operation on a path holds that
//!   path's async lock. Different paths proceed concurrently, bounded by the
//!   worker semaphore.
//! - **Model availability**: a modality whose model is unavailable is
//!   skipped; the file is still indexed under its remaining modalities.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::error::{EmbedError, Error, ExtractError, Result};
use crate::extract::{ContentExtractor, Extraction};
use crate::index::VectorIndex;
use crate::models::{FileRecord, FileStatus, FileType, IndexEntry, Modality};
use crate::tagger::ZeroShotTagger;
use crate::walk::{absolutize, unix_secs, PathFilter};
use crate::watcher::FileEvent;

/// What happened to one path.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Content hash matched the stored record; nothing was done.
    Unchanged,
    Indexed { entries: usize },
    Unsupported,
    ExtractionFailed(String),
    EmbeddingFailed(String),
    Removed,
    Renamed,
    /// Not a trackable file (excluded, a directory, or already gone).
    Skipped,
}

/// Totals from a full reconciliation scan.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub unsupported: usize,
    pub failed: usize,
    pub removed: usize,
    /// Files whose processing hit an index error.
    pub errors: usize,
}

impl ScanReport {
    fn record(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Unchanged => self.unchanged += 1,
            IngestOutcome::Indexed { .. } | IngestOutcome::Renamed => self.indexed += 1,
            IngestOutcome::Unsupported => self.unsupported += 1,
            IngestOutcome::ExtractionFailed(_) | IngestOutcome::EmbeddingFailed(_) => {
                self.failed += 1
            }
            IngestOutcome::Removed => self.removed += 1,
            IngestOutcome::Skipped => {}
        }
    }
}

pub struct IngestPipeline {
    filter: Arc<PathFilter>,
    max_file_size: u64,
    extractor: ContentExtractor,
    embedder: Arc<dyn Embedder>,
    tagger: Option<ZeroShotTagger>,
    index: VectorIndex,
    workers: Arc<Semaphore>,
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
    in_flight: Mutex<HashMap<PathBuf, FileStatus>>,
}

impl IngestPipeline {
    pub fn new(
        filter: Arc<PathFilter>,
        max_file_size: u64,
        workers: usize,
        extractor: ContentExtractor,
        embedder: Arc<dyn Embedder>,
        tagger: Option<ZeroShotTagger>,
        index: VectorIndex,
    ) -> Self {
        Self {
            filter,
            max_file_size,
            extractor,
            embedder,
            tagger,
            index,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            locks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn filter(&self) -> &Arc<PathFilter> {
        &self.filter
    }

    /// Files currently in a transient state, counted by state.
    pub fn in_flight(&self) -> BTreeMap<String, i64> {
        let mut counts = BTreeMap::new();
        if let Ok(map) = self.in_flight.lock() {
            for status in map.values() {
                *counts.entry(status.as_str().to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Consume watcher events until the channel closes. Each event runs on
    /// its own task once a worker slot is free; waiting for a slot stops
    /// this loop from draining the queue.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<FileEvent>) {
        let mut tasks = JoinSet::new();
        while let Some(event) = events.recv().await {
            let Ok(permit) = self.workers.clone().acquire_owned().await else {
                break;
            };
            let pipeline = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                pipeline.handle_event(event).await;
            });
            // reap finished tasks so the set stays small
            while tasks.try_join_next().is_some() {}
        }
        while tasks.join_next().await.is_some() {}
        debug!("event channel closed; pipeline stopped");
    }

    /// Apply one watcher event. Errors are logged, never propagated: one bad
    /// file must not stop the others.
    pub async fn handle_event(&self, event: FileEvent) {
        let result = match &event {
            FileEvent::Created(path) | FileEvent::Modified(path) => {
                if path.is_dir() {
                    self.ingest_tree(path).await.map(|_| IngestOutcome::Skipped)
                } else {
                    self.ingest(path, false).await
                }
            }
            FileEvent::Deleted(path) => self.remove(path).await,
            FileEvent::Renamed { from, to } => self.rename(from, to).await,
        };
        match result {
            Ok(outcome) => debug!(?event, ?outcome, "event handled"),
            Err(e) => warn!(?event, error = %e, "event failed"),
        }
    }

    /// Ingest every accepted file below `dir` (a directory that appeared).
    async fn ingest_tree(&self, dir: &Path) -> Result<()> {
        let filter = self.filter.clone();
        let dir_owned = dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || filter.walk_from(&dir_owned))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        for file in files {
            if let Err(e) = self.ingest(&file, false).await {
                warn!(path = %file.display(), error = %e, "ingest failed");
            }
        }
        Ok(())
    }

    fn normalize(&self, path: &Path) -> Result<PathBuf> {
        let path = absolutize(path).map_err(|e| Error::Io(std::io::Error::other(e)))?;
        if self.filter.relative(&path).is_none() {
            return Err(Error::OutsideRoot(path.display().to_string()));
        }
        Ok(path)
    }

    fn lock_for(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn release_lock(&self, path: &Path, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // the map's handle plus ours means nobody else is waiting
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(path);
        }
    }

    fn set_state(&self, path: &Path, status: Option<FileStatus>) {
        let mut map = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        match status {
            Some(s) => {
                map.insert(path.to_path_buf(), s);
            }
            None => {
                map.remove(path);
            }
        }
    }

    /// Bring the index up to date for one path. With `force`, the
    /// idempotence guard is bypassed and the file is re-extracted even if
    /// its content is unchanged.
    pub async fn ingest(&self, path: &Path, force: bool) -> Result<IngestOutcome> {
        let path = self.normalize(path)?;
        let lock = self.lock_for(&path);
        let outcome = {
            let _guard = lock.lock().await;
            let result = self.ingest_locked(&path, force).await;
            self.set_state(&path, None);
            result
        };
        self.release_lock(&path, lock);
        outcome
    }

    async fn ingest_locked(&self, path: &Path, force: bool) -> Result<IngestOutcome> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.remove_locked(path).await;
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Ok(IngestOutcome::Skipped);
        }
        if !self.filter.accepts(path) {
            // excluded now; drop anything tracked from before
            return match self.index.delete(path).await? {
                true => Ok(IngestOutcome::Removed),
                false => Ok(IngestOutcome::Skipped),
            };
        }

        self.set_state(path, Some(FileStatus::Discovered));
        let file_type = FileType::from_path(path);
        let oversized = metadata.len() > self.max_file_size;

        let (content_hash, bytes) = if oversized {
            (hash_file(path).await?, None)
        } else {
            let bytes = tokio::fs::read(path).await?;
            (hash_bytes(&bytes), Some(bytes))
        };

        let existing = self.index.get_record(path).await?;
        if !force {
            if let Some(record) = &existing {
                if record.content_hash == content_hash {
                    return Ok(IngestOutcome::Unchanged);
                }
            }
        }

        let now = chrono::Utc::now().timestamp();
        let modified_at = unix_secs(metadata.modified());
        let mut record = FileRecord {
            path: path.to_path_buf(),
            content_hash: content_hash.clone(),
            file_type,
            size: metadata.len(),
            modified_at,
            created_at: existing
                .as_ref()
                .map(|r| r.created_at)
                .unwrap_or_else(|| match unix_secs(metadata.created()) {
                    0 => modified_at,
                    t => t,
                }),
            status: FileStatus::Discovered,
            error: None,
            width: None,
            height: None,
            indexed_at: now,
        };

        let Some(bytes) = bytes else {
            record.status = FileStatus::Unsupported;
            record.error = Some(format!(
                "file exceeds max_file_size ({} > {} bytes)",
                metadata.len(),
                self.max_file_size
            ));
            self.index.upsert(&record, &[]).await?;
            return Ok(IngestOutcome::Unsupported);
        };

        self.set_state(path, Some(FileStatus::Extracting));
        let extraction = match self.extractor.extract(path, file_type, bytes).await {
            Ok(extraction) => extraction,
            Err(ExtractError::UnsupportedType(ext)) => {
                debug!(path = %path.display(), ext = %ext, "unsupported type; tracking metadata only");
                record.status = FileStatus::Unsupported;
                self.index.upsert(&record, &[]).await?;
                return Ok(IngestOutcome::Unsupported);
            }
            Err(e) => return self.fail(record, FileStatus::ExtractionFailed, e.to_string()).await,
        };
        if extraction.is_empty() {
            return self
                .fail(record, FileStatus::ExtractionFailed, "no indexable content".to_string())
                .await;
        }
        if let Some((w, h)) = extraction.dimensions {
            record.width = Some(w);
            record.height = Some(h);
        }

        self.set_state(path, Some(FileStatus::Embedding));
        let (entries, skipped) = match self.embed_all(path, &content_hash, &extraction).await {
            Ok(result) => result,
            Err(e) => return self.fail(record, FileStatus::EmbeddingFailed, e.to_string()).await,
        };
        if entries.is_empty() {
            let reason = skipped.join("; ");
            return self.fail(record, FileStatus::EmbeddingFailed, reason).await;
        }
        if !skipped.is_empty() {
            record.error = Some(skipped.join("; "));
        }

        record.status = FileStatus::Indexed;
        self.index.upsert(&record, &entries).await?;
        info!(
            path = %path.display(),
            entries = entries.len(),
            "indexed"
        );
        Ok(IngestOutcome::Indexed {
            entries: entries.len(),
        })
    }

    /// Compute every entry for the extraction. Returns the entries and a
    /// note for each modality skipped because its model is unavailable.
    /// Any other embedding error aborts the whole file.
    async fn embed_all(
        &self,
        path: &Path,
        content_hash: &str,
        extraction: &Extraction,
    ) -> std::result::Result<(Vec<IndexEntry>, Vec<String>), EmbedError> {
        let mut entries = Vec::new();
        let mut skipped = Vec::new();

        let entry = |modality, vector, snippet: Option<&String>, tags| IndexEntry {
            path: path.to_path_buf(),
            modality,
            vector,
            snippet: snippet.map(|s| snippet_of(s)),
            tags,
            content_hash: content_hash.to_string(),
        };

        if let Some(image) = &extraction.image {
            match self.embedder.embed_image(image).await {
                Ok(vector) => {
                    let tags = match &self.tagger {
                        Some(tagger) => tagger.tag(&vector).await,
                        None => Vec::new(),
                    };
                    entries.push(entry(Modality::Image, vector, None, tags));
                }
                Err(e) if e.is_model_unavailable() => skipped.push(e.to_string()),
                Err(e) => return Err(e),
            }
        }

        for (modality, text) in [
            (Modality::Text, &extraction.text),
            (Modality::OcrText, &extraction.ocr_text),
        ] {
            let Some(text) = text else { continue };
            match self.embedder.embed_text(text).await {
                Ok(vector) => entries.push(entry(modality, vector, Some(text), Vec::new())),
                Err(EmbedError::ModelUnavailable { reason, .. }) => {
                    skipped.push(
                        EmbedError::ModelUnavailable { modality, reason }.to_string(),
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok((entries, skipped))
    }

    /// Record a failure: the new hash is stored and every old entry is
    /// dropped, so nothing stale stays searchable.
    async fn fail(
        &self,
        mut record: FileRecord,
        status: FileStatus,
        reason: String,
    ) -> Result<IngestOutcome> {
        warn!(path = %record.path.display(), status = %status, error = %reason, "ingest failed");
        record.status = status;
        record.error = Some(reason.clone());
        self.index.upsert(&record, &[]).await?;
        Ok(match status {
            FileStatus::EmbeddingFailed => IngestOutcome::EmbeddingFailed(reason),
            _ => IngestOutcome::ExtractionFailed(reason),
        })
    }

    /// Drop a path from the index. A path that was a directory takes every
    /// record beneath it along.
    pub async fn remove(&self, path: &Path) -> Result<IngestOutcome> {
        let path = self.normalize(path)?;
        let lock = self.lock_for(&path);
        let outcome = {
            let _guard = lock.lock().await;
            self.remove_locked(&path).await
        };
        self.release_lock(&path, lock);
        outcome
    }

    async fn remove_locked(&self, path: &Path) -> Result<IngestOutcome> {
        let removed_file = self.index.delete(path).await?;
        let removed_children = self.index.delete_under(path).await?;
        if removed_file || !removed_children.is_empty() {
            info!(
                path = %path.display(),
                children = removed_children.len(),
                "removed from index"
            );
            Ok(IngestOutcome::Removed)
        } else {
            Ok(IngestOutcome::Skipped)
        }
    }

    /// Handle a move. When the content at `to` is what was indexed at
    /// `from`, the record is moved without re-embedding; otherwise this is
    /// a delete of `from` plus an ingest of `to`.
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<IngestOutcome> {
        let to = match self.normalize(to) {
            Ok(p) => p,
            // moved out of the tree
            Err(Error::OutsideRoot(_)) => return self.remove(from).await,
            Err(e) => return Err(e),
        };
        let from = match self.normalize(from) {
            Ok(p) => p,
            // moved into the tree
            Err(Error::OutsideRoot(_)) => return self.ingest(&to, false).await,
            Err(e) => return Err(e),
        };
        if to.is_dir() {
            self.remove(&from).await?;
            self.ingest_tree(&to).await?;
            return Ok(IngestOutcome::Renamed);
        }

        if self.try_move_record(&from, &to).await? {
            info!(from = %from.display(), to = %to.display(), "renamed without re-embedding");
            return Ok(IngestOutcome::Renamed);
        }

        self.remove(&from).await?;
        self.ingest(&to, false).await
    }

    async fn try_move_record(&self, from: &Path, to: &Path) -> Result<bool> {
        if !self.filter.accepts(to) || FileType::from_path(from) != FileType::from_path(to) {
            return Ok(false);
        }
        // lock both paths in a fixed order
        let (first, second) = if from <= to { (from, to) } else { (to, from) };
        let (lock_a, lock_b) = (self.lock_for(first), self.lock_for(second));
        let moved = {
            let _a = lock_a.lock().await;
            let _b = if first == second {
                None
            } else {
                Some(lock_b.lock().await)
            };
            match self.index.get_record(from).await? {
                Some(record) if record.status == FileStatus::Indexed => {
                    match tokio::fs::read(to).await {
                        Ok(bytes) if hash_bytes(&bytes) == record.content_hash => {
                            self.index.rename(from, to).await?
                        }
                        _ => false,
                    }
                }
                _ => false,
            }
        };
        self.release_lock(first, lock_a);
        self.release_lock(second, lock_b);
        Ok(moved)
    }

    /// Walk the whole root, ingest every file (cheap for unchanged ones),
    /// and drop records whose files no longer exist. This is the recovery
    /// path after the watcher was down or degraded.
    pub async fn scan_now(self: &Arc<Self>) -> Result<ScanReport> {
        let filter = self.filter.clone();
        let files = tokio::task::spawn_blocking(move || filter.walk())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        info!(root = %self.filter.root().display(), files = files.len(), "scan started");

        let mut report = ScanReport {
            scanned: files.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for file in files {
            let permit = self
                .workers
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
            let pipeline = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = pipeline.ingest(&file, false).await;
                (file, result)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.record(&outcome),
                Ok((file, Err(e))) => {
                    warn!(path = %file.display(), error = %e, "scan ingest failed");
                    report.errors += 1;
                }
                Err(e) => {
                    warn!(error = %e, "scan task panicked");
                    report.errors += 1;
                }
            }
        }

        for tracked in self.index.all_paths().await? {
            let still_there = tokio::fs::metadata(&tracked)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !still_there || !self.filter.accepts(&tracked) {
                match self.remove(&tracked).await {
                    Ok(IngestOutcome::Removed) => report.removed += 1,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(path = %tracked.display(), error = %e, "failed to drop stale record");
                        report.errors += 1;
                    }
                }
            }
        }

        info!(?report, "scan finished");
        Ok(report)
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

async fn hash_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

const SNIPPET_CHARS: usize = 240;

fn snippet_of(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
