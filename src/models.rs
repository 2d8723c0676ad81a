//! Core data models used throughout LifeVault.
//!
//! These types represent the files, index entries, filters, and search
//! results that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Dimensionality of the CLIP image space.
pub const IMAGE_DIMS: usize = 512;
/// Dimensionality of the sentence-embedding text space.
pub const TEXT_DIMS: usize = 384;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "gif", "tif", "tiff"];
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "docx"];
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "rst", "csv", "log", "json", "toml", "yaml", "yml"];

/// Declared type of a file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Document,
    Text,
    Other,
}

impl FileType {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let ext = ext.as_str();
        if IMAGE_EXTENSIONS.contains(&ext) {
            FileType::Image
        } else if DOCUMENT_EXTENSIONS.contains(&ext) {
            FileType::Document
        } else if TEXT_EXTENSIONS.contains(&ext) {
            FileType::Text
        } else {
            FileType::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Document => "document",
            FileType::Text => "text",
            FileType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(FileType::Image),
            "document" => Some(FileType::Document),
            "text" => Some(FileType::Text),
            "other" => Some(FileType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file lifecycle state.
///
/// ```text
/// Discovered → Extracting → Embedding → Indexed
///      │            │            └──→ EmbeddingFailed
///      │            ├──→ ExtractionFailed
///      │            └──→ Unsupported
///      └── (any) ──→ Removed
/// ```
///
/// Only the terminal states are persisted; the transient ones are visible
/// through the pipeline while a file is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Discovered,
    Extracting,
    Embedding,
    Indexed,
    Unsupported,
    ExtractionFailed,
    EmbeddingFailed,
    Removed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Discovered => "discovered",
            FileStatus::Extracting => "extracting",
            FileStatus::Embedding => "embedding",
            FileStatus::Indexed => "indexed",
            FileStatus::Unsupported => "unsupported",
            FileStatus::ExtractionFailed => "extraction_failed",
            FileStatus::EmbeddingFailed => "embedding_failed",
            FileStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(FileStatus::Discovered),
            "extracting" => Some(FileStatus::Extracting),
            "embedding" => Some(FileStatus::Embedding),
            "indexed" => Some(FileStatus::Indexed),
            "unsupported" => Some(FileStatus::Unsupported),
            "extraction_failed" => Some(FileStatus::ExtractionFailed),
            "embedding_failed" => Some(FileStatus::EmbeddingFailed),
            "removed" => Some(FileStatus::Removed),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FileStatus::ExtractionFailed | FileStatus::EmbeddingFailed
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of content an index entry's vector represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// CLIP embedding of the decoded image.
    Image,
    /// Sentence embedding of document or plain-text content.
    Text,
    /// Sentence embedding of text recognized inside an image.
    OcrText,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Image, Modality::Text, Modality::OcrText];

    pub fn dims(&self) -> usize {
        match self {
            Modality::Image => IMAGE_DIMS,
            Modality::Text | Modality::OcrText => TEXT_DIMS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Image => "image",
            Modality::Text => "text",
            Modality::OcrText => "ocr_text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Modality::Image),
            "text" => Some(Modality::Text),
            "ocr_text" => Some(Modality::OcrText),
            _ => None,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked state of one file under the watch root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    /// Absolute, normalized path. Identity of the record.
    pub path: PathBuf,
    /// SHA-256 of the file bytes (hex).
    pub content_hash: String,
    pub file_type: FileType,
    pub size: u64,
    pub modified_at: i64,
    pub created_at: i64,
    pub status: FileStatus,
    pub error: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub indexed_at: i64,
}

/// A zero-shot label and its softmax probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub label: String,
    pub score: f32,
}

/// One vector per (file, modality).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub path: PathBuf,
    pub modality: Modality,
    pub vector: Vec<f32>,
    pub snippet: Option<String>,
    pub tags: Vec<Tag>,
    /// Hash of the content this vector was computed from.
    pub content_hash: String,
}

/// Structured restrictions applied to a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Empty means every type.
    #[serde(default)]
    pub file_types: Vec<FileType>,
    /// Inclusive lower bound on modification time (unix seconds).
    #[serde(default)]
    pub modified_after: Option<i64>,
    /// Inclusive upper bound on modification time (unix seconds).
    #[serde(default)]
    pub modified_before: Option<i64>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.file_types.is_empty() && self.modified_after.is_none() && self.modified_before.is_none()
    }

    pub fn matches(&self, file_type: FileType, modified_at: i64) -> bool {
        if !self.file_types.is_empty() && !self.file_types.contains(&file_type) {
            return false;
        }
        if let Some(after) = self.modified_after {
            if modified_at < after {
                return false;
            }
        }
        if let Some(before) = self.modified_before {
            if modified_at > before {
                return false;
            }
        }
        true
    }

    /// Whether any entry of this modality could pass the type filter.
    pub fn admits_modality(&self, modality: Modality) -> bool {
        if self.file_types.is_empty() {
            return true;
        }
        match modality {
            Modality::Image | Modality::OcrText => self.file_types.contains(&FileType::Image),
            Modality::Text => self
                .file_types
                .iter()
                .any(|t| matches!(t, FileType::Document | FileType::Text)),
        }
    }
}

/// A single nearest-neighbour hit from one modality's space.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub path: PathBuf,
    pub modality: Modality,
    pub score: f32,
    pub file_type: FileType,
    pub modified_at: i64,
    pub snippet: Option<String>,
    pub tags: Vec<Tag>,
}

/// A fused, ranked file reference returned by the query engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub path: PathBuf,
    pub score: f32,
    /// Modality that produced the winning score.
    pub modality: Modality,
    pub file_type: FileType,
    pub modified_at: i64,
    pub snippet: Option<String>,
    pub tags: Vec<Tag>,
}

/// Counts by type, state, and modality.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_files: i64,
    pub by_type: BTreeMap<String, i64>,
    pub by_status: BTreeMap<String, i64>,
    pub entries_by_modality: BTreeMap<String, i64>,
    /// Files currently moving through the pipeline, by transient state.
    pub in_flight: BTreeMap<String, i64>,
    /// Set while the watcher cannot observe the tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watcher_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_from_extension_is_case_insensitive() {
        assert_eq!(FileType::from_path(Path::new("/a/B.JPG")), FileType::Image);
        assert_eq!(FileType::from_path(Path::new("/a/report.pdf")), FileType::Document);
        assert_eq!(FileType::from_path(Path::new("/a/notes.md")), FileType::Text);
        assert_eq!(FileType::from_path(Path::new("/a/movie.mp4")), FileType::Other);
        assert_eq!(FileType::from_path(Path::new("/a/Makefile")), FileType::Other);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            FileStatus::Indexed,
            FileStatus::Unsupported,
            FileStatus::ExtractionFailed,
            FileStatus::EmbeddingFailed,
        ] {
            assert_eq!(FileStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn modality_dimensions() {
        assert_eq!(Modality::Image.dims(), 512);
        assert_eq!(Modality::Text.dims(), 384);
        assert_eq!(Modality::OcrText.dims(), 384);
    }

    #[test]
    fn filters_match_type_and_time_window() {
        let filters = SearchFilters {
            file_types: vec![FileType::Image],
            modified_after: Some(100),
            modified_before: Some(200),
        };
        assert!(filters.matches(FileType::Image, 150));
        assert!(filters.matches(FileType::Image, 100));
        assert!(!filters.matches(FileType::Image, 201));
        assert!(!filters.matches(FileType::Text, 150));
        assert!(SearchFilters::default().matches(FileType::Other, 0));
    }

    #[test]
    fn filters_admit_modalities_by_type() {
        let docs_only = SearchFilters {
            file_types: vec![FileType::Document],
            ..Default::default()
        };
        assert!(docs_only.admits_modality(Modality::Text));
        assert!(!docs_only.admits_modality(Modality::Image));
        assert!(!docs_only.admits_modality(Modality::OcrText));
    }
}
