//! End-to-end tests of the assembled vault against real SQLite in a temp
//! directory. Models, OCR, and the intent parser are deterministic fakes.

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinSet;

use lifevault::config::parse_config;
use lifevault::embedding::{normalize, Embedder};
use lifevault::error::{EmbedError, ExtractError, IntentError};
use lifevault::intent::{Intent, IntentParser};
use lifevault::models::{FileStatus, FileType, Modality, SearchFilters, IMAGE_DIMS, TEXT_DIMS};
use lifevault::ocr::TextRecognizer;
use lifevault::pipeline::{hash_bytes, IngestOutcome};
use lifevault::vault::{Capabilities, Vault};

const SUNSET: [u8; 3] = [250, 120, 10];
const BEACH: [u8; 3] = [20, 90, 230];

/// Images embed as their mean colour; image-space text maps a few words
/// onto colour directions; text embeds as hashed bag-of-words.
struct FakeEmbedder {
    image_available: bool,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    fn new(image_available: bool) -> Self {
        Self {
            image_available,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn unavailable(&self) -> EmbedError {
        EmbedError::ModelUnavailable {
            modality: Modality::Image,
            reason: "no weights in test".to_string(),
        }
    }
}

fn padded(head: &[f32], dims: usize) -> Vec<f32> {
    let mut v = vec![0.0; dims];
    v[..head.len()].copy_from_slice(head);
    normalize(v)
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn name(&self) -> &str {
        "fake"
    }

    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.image_available {
            return Err(self.unavailable());
        }
        let img = image::load_from_memory(bytes)
            .map_err(|e| EmbedError::Embedding(e.to_string()))?
            .to_rgb8();
        let mut sum = [0f32; 3];
        for px in img.pixels() {
            for (s, c) in sum.iter_mut().zip(px.0) {
                *s += c as f32;
            }
        }
        Ok(padded(&sum, IMAGE_DIMS))
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut v = vec![0.0; TEXT_DIMS];
        for word in words(text) {
            if word == "poison" {
                return Err(EmbedError::Embedding("inference crashed".to_string()));
            }
            let bucket = word
                .bytes()
                .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
            v[bucket as usize % TEXT_DIMS] += 1.0;
        }
        Ok(normalize(v))
    }

    async fn embed_text_for_images(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.image_available {
            return Err(self.unavailable());
        }
        let mut head = [0f32; 4];
        for word in words(text) {
            match word.as_str() {
                "sunset" => head[..3].copy_from_slice(&[1.0, 0.48, 0.04]),
                "beach" | "ocean" => head[..3].copy_from_slice(&[0.08, 0.36, 0.92]),
                _ => {}
            }
        }
        if head == [0.0; 4] {
            // orthogonal to every test image
            head[3] = 1.0;
        }
        Ok(padded(&head, IMAGE_DIMS))
    }
}

/// OCR text keyed by file name.
#[derive(Default)]
struct FakeOcr {
    texts: Mutex<HashMap<String, String>>,
}

impl FakeOcr {
    fn set(&self, file_name: &str, text: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(file_name.to_string(), text.to_string());
    }
}

#[async_trait]
impl TextRecognizer for FakeOcr {
    fn name(&self) -> &str {
        "fake"
    }

    async fn recognize(&self, path: &Path, _bytes: &[u8]) -> Result<String, ExtractError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        Ok(self.texts.lock().unwrap().get(&name).cloned().unwrap_or_default())
    }
}

struct FakeIntent(Result<Intent, String>);

#[async_trait]
impl IntentParser for FakeIntent {
    fn name(&self) -> &str {
        "fake"
    }

    async fn parse(&self, _query: &str) -> Result<Intent, IntentError> {
        self.0.clone().map_err(IntentError::Unavailable)
    }
}

struct Harness {
    _tmp: TempDir,
    root: PathBuf,
    vault: Vault,
    embedder: Arc<FakeEmbedder>,
    ocr: Arc<FakeOcr>,
}

impl Harness {
    async fn new() -> Self {
        Self::with(FakeEmbedder::new(true), Arc::new(lifevault::intent::DisabledParser)).await
    }

    async fn with(embedder: FakeEmbedder, intent: Arc<dyn IntentParser>) -> Self {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().canonicalize().unwrap();
        let root = base.join("vault");
        fs::create_dir_all(&root).unwrap();

        let config = parse_config(&format!(
            r#"
[db]
path = "{}/data/vault.sqlite"

[watch]
root = "{}"
debounce_ms = 100
degraded_rescan_secs = 1

[ingest]
min_text_chars = 5

[models]
provider = "disabled"
"#,
            base.display(),
            root.display()
        ))
        .unwrap();

        let embedder = Arc::new(embedder);
        let ocr = Arc::new(FakeOcr::default());
        let vault = Vault::open_with(
            config,
            Capabilities {
                embedder: embedder.clone(),
                ocr: ocr.clone(),
                intent,
            },
        )
        .await
        .unwrap();

        Self {
            _tmp: tmp,
            root,
            vault,
            embedder,
            ocr,
        }
    }

    fn image(&self, name: &str, rgb: [u8; 3]) -> PathBuf {
        let path = self.root.join(name);
        RgbImage::from_pixel(16, 16, Rgb(rgb)).save(&path).unwrap();
        path
    }

    fn text(&self, name: &str, body: &str) -> PathBuf {
        let path = self.root.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    async fn status(&self, path: &Path) -> Option<FileStatus> {
        self.vault
            .index()
            .get_record(path)
            .await
            .unwrap()
            .map(|r| r.status)
    }

    async fn entry_count(&self, path: &Path) -> usize {
        self.vault.index().entries_for(path).await.unwrap().len()
    }

    /// Either nothing is tracked at `path`, or an indexed record whose
    /// entries (one per modality) all match the bytes on disk.
    async fn assert_consistent(&self, path: &Path, modalities: usize) -> bool {
        let record = self.vault.index().get_record(path).await.unwrap();
        let entries = self.vault.index().entries_for(path).await.unwrap();
        let Some(record) = record else {
            assert!(entries.is_empty(), "orphaned entries at {}", path.display());
            return false;
        };
        assert_eq!(record.status, FileStatus::Indexed, "{:?}", record.error);
        assert_eq!(record.content_hash, hash_bytes(&fs::read(path).unwrap()));
        let mut seen: Vec<Modality> = entries.iter().map(|e| e.modality).collect();
        assert_eq!(seen.len(), modalities, "{:?}", seen);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), modalities, "duplicate modality at {}", path.display());
        assert!(entries.iter().all(|e| e.content_hash == record.content_hash));
        true
    }

    async fn wait_for(&self, path: &Path, present: bool) -> bool {
        for _ in 0..100 {
            let found = self.vault.index().get_record(path).await.unwrap().is_some();
            if found == present {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }
}

#[tokio::test]
async fn second_scan_is_a_no_op() {
    let h = Harness::new().await;
    h.image("sunset.png", SUNSET);
    h.text("notes.txt", "rust borrow checker notes");

    let first = h.vault.scan_now().await.unwrap();
    assert_eq!(first.scanned, 2);
    assert_eq!(first.indexed, 2);
    let calls = h.embedder.calls();

    let second = h.vault.scan_now().await.unwrap();
    assert_eq!(second.unchanged, 2);
    assert_eq!(second.indexed, 0);
    assert_eq!(h.embedder.calls(), calls, "unchanged files must not be re-embedded");
}

#[tokio::test]
async fn sunset_query_finds_tagged_sunset_photo() {
    let h = Harness::new().await;
    let sunset = h.image("sunset.png", SUNSET);
    h.image("beach.png", BEACH);
    h.text("notes.txt", "quarterly budget spreadsheet notes");
    h.vault.scan_now().await.unwrap();

    let record = h.vault.index().get_record(&sunset).await.unwrap().unwrap();
    assert_eq!(record.file_type, FileType::Image);
    assert_eq!((record.width, record.height), (Some(16), Some(16)));

    let response = h.vault.search("sunset", None, SearchFilters::default()).await;
    assert!(!response.degraded, "{:?}", response.warnings);
    let top = &response.results[0];
    assert_eq!(top.path, sunset);
    assert_eq!(top.modality, Modality::Image);
    assert_eq!(top.tags[0].label, "sunset");
}

#[tokio::test]
async fn modified_text_file_is_reindexed_without_duplicates() {
    let h = Harness::new().await;
    let notes = h.text("notes.txt", "rust borrow checker notes");
    h.vault.scan_now().await.unwrap();

    let response = h.vault.search("borrow checker", None, SearchFilters::default()).await;
    assert_eq!(response.results[0].path, notes);

    for body in ["gardening tomatoes compost", "gardening tomatoes and compost bins"] {
        h.text("notes.txt", body);
        let outcome = h.vault.pipeline().ingest(&notes, false).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Indexed { entries: 1 });
    }
    assert_eq!(h.entry_count(&notes).await, 1);

    let response = h.vault.search("tomatoes", None, SearchFilters::default()).await;
    assert_eq!(response.results[0].path, notes);
    assert!(response.results[0]
        .snippet
        .as_deref()
        .unwrap()
        .contains("compost bins"));
}

#[tokio::test]
async fn failed_embedding_leaves_no_entries_behind() {
    let h = Harness::new().await;
    h.ocr.set("receipt.png", "grocery receipt total due");
    let receipt = h.image("receipt.png", SUNSET);
    h.vault.scan_now().await.unwrap();
    assert_eq!(h.entry_count(&receipt).await, 2);

    // image embeds fine, then the OCR text fails
    h.ocr.set("receipt.png", "poison grocery receipt");
    h.image("receipt.png", BEACH);
    let outcome = h.vault.pipeline().ingest(&receipt, false).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::EmbeddingFailed(_)));
    assert_eq!(h.status(&receipt).await, Some(FileStatus::EmbeddingFailed));
    assert_eq!(h.entry_count(&receipt).await, 0);

    let response = h.vault.search("grocery receipt", None, SearchFilters::default()).await;
    assert!(response.results.iter().all(|r| r.path != receipt));

    // same bytes again: not retried
    let calls = h.embedder.calls();
    let outcome = h.vault.pipeline().ingest(&receipt, false).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Unchanged);
    assert_eq!(h.embedder.calls(), calls);
}

#[tokio::test]
async fn unavailable_image_model_skips_that_modality() {
    let h = Harness::with(
        FakeEmbedder::new(false),
        Arc::new(lifevault::intent::DisabledParser),
    )
    .await;
    h.ocr.set("sign.png", "main street parking sign");
    let sign = h.image("sign.png", SUNSET);
    let blank = h.image("blank.png", BEACH);
    h.vault.scan_now().await.unwrap();

    assert_eq!(h.status(&sign).await, Some(FileStatus::Indexed));
    let entries = h.vault.index().entries_for(&sign).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].modality, Modality::OcrText);
    let record = h.vault.index().get_record(&sign).await.unwrap().unwrap();
    assert!(record.error.unwrap().contains("model unavailable"));

    assert_eq!(h.status(&blank).await, Some(FileStatus::EmbeddingFailed));

    let response = h.vault.search("parking sign", None, SearchFilters::default()).await;
    assert!(response.degraded);
    assert_eq!(response.results[0].path, sign);
}

#[tokio::test]
async fn deleted_files_leave_the_index_on_scan() {
    let h = Harness::new().await;
    let notes = h.text("notes.txt", "rust borrow checker notes");
    let keep = h.text("keep.md", "meeting agenda for monday");
    h.vault.scan_now().await.unwrap();

    fs::remove_file(&notes).unwrap();
    let report = h.vault.scan_now().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(h.status(&notes).await, None);
    assert_eq!(h.status(&keep).await, Some(FileStatus::Indexed));

    let response = h.vault.search("borrow checker", None, SearchFilters::default()).await;
    assert!(response.results.iter().all(|r| r.path != notes));
}

#[tokio::test]
async fn deleting_a_directory_drops_everything_under_it() {
    let h = Harness::new().await;
    fs::create_dir_all(h.root.join("trip")).unwrap();
    let a = h.image("trip/a.png", SUNSET);
    let b = h.image("trip/b.png", BEACH);
    h.vault.scan_now().await.unwrap();

    fs::remove_dir_all(h.root.join("trip")).unwrap();
    let outcome = h.vault.pipeline().remove(&h.root.join("trip")).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Removed);
    assert_eq!(h.status(&a).await, None);
    assert_eq!(h.status(&b).await, None);
}

#[tokio::test]
async fn rename_moves_the_record_without_embedding() {
    let h = Harness::new().await;
    let from = h.image("IMG_0001.png", SUNSET);
    h.vault.scan_now().await.unwrap();
    let calls = h.embedder.calls();

    let to = h.root.join("golden-hour.png");
    fs::rename(&from, &to).unwrap();
    let outcome = h.vault.pipeline().rename(&from, &to).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Renamed);
    assert_eq!(h.embedder.calls(), calls);

    assert_eq!(h.status(&from).await, None);
    assert_eq!(h.status(&to).await, Some(FileStatus::Indexed));
    assert_eq!(h.entry_count(&to).await, 1);
}

#[tokio::test]
async fn unsupported_files_are_tracked_without_entries() {
    let h = Harness::new().await;
    let blob = h.root.join("archive.bin");
    fs::write(&blob, [0u8, 1, 2, 3]).unwrap();
    let report = h.vault.scan_now().await.unwrap();
    assert_eq!(report.unsupported, 1);

    assert_eq!(h.status(&blob).await, Some(FileStatus::Unsupported));
    assert_eq!(h.entry_count(&blob).await, 0);
    let stats = h.vault.stats().await.unwrap();
    assert_eq!(stats.by_status.get("unsupported"), Some(&1));
    assert_eq!(stats.by_type.get("other"), Some(&1));
}

#[tokio::test]
async fn search_without_intent_parser_still_answers() {
    let h = Harness::new().await;
    let beach = h.image("beach.png", BEACH);
    h.image("sunset.png", SUNSET);
    h.vault.scan_now().await.unwrap();

    let response = h
        .vault
        .search("beach photos from last year", None, SearchFilters::default())
        .await;
    assert!(!response.degraded);
    assert!(response.intent.is_none());
    assert_eq!(response.refined_query, "beach photos from last year");
    assert_eq!(response.results[0].path, beach);
}

#[tokio::test]
async fn failing_intent_parser_degrades_but_answers() {
    let h = Harness::with(
        FakeEmbedder::new(true),
        Arc::new(FakeIntent(Err("quota exceeded".to_string()))),
    )
    .await;
    let beach = h.image("beach.png", BEACH);
    h.vault.scan_now().await.unwrap();

    let response = h.vault.search("beach", None, SearchFilters::default()).await;
    assert!(response.degraded);
    assert!(response.warnings[0].contains("quota exceeded"));
    assert_eq!(response.results[0].path, beach);
}

#[tokio::test]
async fn intent_rewrites_query_and_restricts_types() {
    let intent = Intent {
        refined_query: Some("borrow checker".to_string()),
        file_type: Some("document".to_string()),
        ..Default::default()
    };
    let h = Harness::with(FakeEmbedder::new(true), Arc::new(FakeIntent(Ok(intent)))).await;
    let notes = h.text("notes.txt", "rust borrow checker notes");
    h.image("sunset.png", SUNSET);
    h.vault.scan_now().await.unwrap();

    let response = h
        .vault
        .search("that rust thing I wrote about lifetimes", Some(5), SearchFilters::default())
        .await;
    assert_eq!(response.refined_query, "borrow checker");
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].path, notes);
}

#[tokio::test]
async fn caller_type_filter_excludes_other_types() {
    let h = Harness::new().await;
    h.text("sunset-poem.txt", "a poem about the sunset over the bay");
    let sunset = h.image("sunset.png", SUNSET);
    h.vault.scan_now().await.unwrap();

    let filters = SearchFilters {
        file_types: vec![FileType::Image],
        ..Default::default()
    };
    let response = h.vault.search("sunset", None, filters).await;
    assert!(!response.results.is_empty());
    assert!(response.results.iter().all(|r| r.file_type == FileType::Image));
    assert_eq!(response.results[0].path, sunset);
}

#[tokio::test]
async fn surprise_and_list_cover_indexed_files() {
    let h = Harness::new().await;
    assert!(h.vault.surprise().await.unwrap().is_none());

    let notes = h.text("notes.txt", "rust borrow checker notes");
    h.vault.scan_now().await.unwrap();
    assert_eq!(h.vault.surprise().await.unwrap().unwrap().path, notes);
    assert_eq!(h.vault.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn watcher_indexes_new_files() {
    let h = Harness::new().await;
    let vault = Arc::new(h.vault);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let runner = {
        let vault = vault.clone();
        tokio::spawn(async move {
            vault
                .run(async {
                    let _ = stop_rx.await;
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    let path = h.root.join("fresh.md");
    fs::write(&path, "freshly written meeting notes").unwrap();

    let mut status = None;
    for _ in 0..100 {
        status = vault
            .index()
            .get_record(&path)
            .await
            .unwrap()
            .map(|r| r.status);
        if status.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(status, Some(FileStatus::Indexed));

    let _ = stop_tx.send(());
    runner.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_work_on_one_path_stays_consistent() {
    let h = Harness::new().await;
    h.ocr.set("receipt.png", "grocery receipt total due");
    h.ocr.set("copy.png", "grocery receipt total due");
    let receipt = h.image("receipt.png", SUNSET);
    let pipeline = h.vault.pipeline().clone();

    let mut tasks = JoinSet::new();
    for _ in 0..12 {
        let (pipeline, path) = (pipeline.clone(), receipt.clone());
        tasks.spawn(async move { pipeline.ingest(&path, true).await });
    }
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.unwrap().unwrap();
        assert_eq!(outcome, IngestOutcome::Indexed { entries: 2 });
    }
    assert!(h.assert_consistent(&receipt, 2).await);

    let copy = h.root.join("copy.png");
    fs::copy(&receipt, &copy).unwrap();
    let mut tasks = JoinSet::new();
    for i in 0..24 {
        let (pipeline, from, to) = (pipeline.clone(), receipt.clone(), copy.clone());
        tasks.spawn(async move {
            match i % 3 {
                0 => pipeline.ingest(&from, true).await,
                1 => pipeline.remove(&from).await,
                _ => pipeline.rename(&from, &to).await,
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }
    h.assert_consistent(&receipt, 2).await;
    h.assert_consistent(&copy, 2).await;
    assert!(h.vault.pipeline().in_flight().is_empty());

    h.vault.pipeline().ingest(&receipt, true).await.unwrap();
    assert!(h.assert_consistent(&receipt, 2).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn degraded_watcher_triggers_periodic_rescans() {
    let h = Harness::new().await;
    let notes = h.text("notes.txt", "rust borrow checker notes");
    h.vault.scan_now().await.unwrap();

    // A record with no file behind it. Nothing on disk changes, so only a
    // reconciliation scan can drop it.
    let ghost = h.root.join("ghost.txt");
    let mut ghost_record = h.vault.index().get_record(&notes).await.unwrap().unwrap();
    ghost_record.path = ghost.clone();
    h.vault.index().upsert(&ghost_record, &[]).await.unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let run = h.vault.run(async {
        let _ = stop_rx.await;
    });
    let drive = async {
        assert!(h.wait_for(&ghost, false).await, "startup scan kept the ghost");

        h.vault.index().upsert(&ghost_record, &[]).await.unwrap();
        // healthy watcher: ticks pass without a rescan
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(h.vault.index().get_record(&ghost).await.unwrap().is_some());

        h.vault.watcher_health().mark_degraded("lost the inotify watch");
        assert!(h.wait_for(&ghost, false).await, "degraded vault never rescanned");
        let stats = h.vault.stats().await.unwrap();
        assert_eq!(stats.watcher_error.as_deref(), Some("lost the inotify watch"));
        assert_eq!(stats.total_files, 1);

        let _ = stop_tx.send(());
    };
    let (result, ()) = tokio::join!(run, drive);
    result.unwrap();
}
