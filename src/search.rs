//! Query Engine.
//!
//! ```text
//! query ─▶ intent parser (optional) ─▶ refined phrase + filters
//!       ─▶ embed phrase in each space ─▶ per-modality index query
//!       ─▶ fuse per file (best score + tag boost) ─▶ filter ─▶ top-N
//! ```
//!
//! The engine never fails a search. Parser errors, unavailable models, and
//! index errors each degrade the response and are reported in
//! [`SearchResponse::warnings`].

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::embedding::Embedder;
use crate::error::IntentError;
use crate::index::VectorIndex;
use crate::intent::{Intent, IntentParser};
use crate::models::{IndexHit, Modality, SearchFilters, SearchResult, Tag};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub query: String,
    /// The phrase actually embedded.
    pub refined_query: String,
    pub intent: Option<Intent>,
    /// Filters in effect after merging caller and intent filters.
    pub filters: SearchFilters,
    pub results: Vec<SearchResult>,
    /// True when some part of the search could not run.
    pub degraded: bool,
    pub warnings: Vec<String>,
}

impl SearchResponse {
    fn warn(&mut self, message: String) {
        warn!(warning = %message, "search degraded");
        self.degraded = true;
        self.warnings.push(message);
    }
}

pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    index: VectorIndex,
    intent_parser: Arc<dyn IntentParser>,
    config: SearchConfig,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: VectorIndex,
        intent_parser: Arc<dyn IntentParser>,
        config: SearchConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            intent_parser,
            config,
        }
    }

    /// Search for `query`, returning at most `k` files (the configured
    /// default when `None`). `filters` come from the caller and win over
    /// any the intent parser suggests.
    pub async fn search(&self, query: &str, k: Option<usize>, filters: SearchFilters) -> SearchResponse {
        let k = k.unwrap_or(self.config.default_k);
        let mut response = SearchResponse {
            query: query.to_string(),
            refined_query: query.trim().to_string(),
            filters: filters.clone(),
            ..Default::default()
        };
        if response.refined_query.is_empty() || k == 0 {
            return response;
        }

        // 1. intent
        match self.intent_parser.parse(query).await {
            Ok(intent) => {
                if let Some(refined) = intent.refined_query.as_deref().map(str::trim) {
                    if !refined.is_empty() {
                        response.refined_query = refined.to_string();
                    }
                }
                response.filters = merge_filters(filters, intent.filters(chrono::Utc::now()));
                response.intent = Some(intent);
            }
            Err(IntentError::Unavailable(reason)) if self.intent_parser.name() == "disabled" => {
                debug!(reason = %reason, "intent parsing skipped");
            }
            Err(e) => response.warn(e.to_string()),
        }

        // 2-3. embed and query each space
        let candidate_k = self.config.candidate_k.max(k);
        let mut hits: Vec<IndexHit> = Vec::new();
        let phrase = response.refined_query.clone();

        if admits_any(&response.filters, &[Modality::Text, Modality::OcrText]) {
            match self.embedder.embed_text(&phrase).await {
                Ok(vector) => {
                    for modality in [Modality::Text, Modality::OcrText] {
                        self.collect(&mut response, &mut hits, modality, &vector, candidate_k)
                            .await;
                    }
                }
                Err(e) => response.warn(format!("text search skipped: {}", e)),
            }
        }
        if admits_any(&response.filters, &[Modality::Image]) {
            match self.embedder.embed_text_for_images(&phrase).await {
                Ok(vector) => {
                    self.collect(&mut response, &mut hits, Modality::Image, &vector, candidate_k)
                        .await
                }
                Err(e) => response.warn(format!("image search skipped: {}", e)),
            }
        }

        // 4-6. fuse, post-filter, rank
        let terms = query_terms(&phrase, response.intent.as_ref());
        let mut results: Vec<SearchResult> = fuse(hits, &terms, self.config.tag_boost)
            .into_iter()
            .filter(|r| response.filters.matches(r.file_type, r.modified_at))
            .collect();
        rank(&mut results);
        results.truncate(k);
        response.results = results;
        response
    }

    async fn collect(
        &self,
        response: &mut SearchResponse,
        hits: &mut Vec<IndexHit>,
        modality: Modality,
        vector: &[f32],
        candidate_k: usize,
    ) {
        let found = self
            .index
            .query(modality, vector, candidate_k, &response.filters)
            .await;
        match found {
            Ok(found) => hits.extend(found),
            Err(e) => response.warn(format!("{} query failed: {}", modality, e)),
        }
    }
}

fn admits_any(filters: &SearchFilters, modalities: &[Modality]) -> bool {
    modalities.iter().any(|m| filters.admits_modality(*m))
}

/// Caller filters override intent filters field by field.
fn merge_filters(caller: SearchFilters, intent: SearchFilters) -> SearchFilters {
    SearchFilters {
        file_types: if caller.file_types.is_empty() {
            intent.file_types
        } else {
            caller.file_types
        },
        modified_after: caller.modified_after.or(intent.modified_after),
        modified_before: caller.modified_before.or(intent.modified_before),
    }
}

/// Lowercased words of the phrase plus any intent tags, with a trailing
/// plural `s` also accepted.
fn query_terms(phrase: &str, intent: Option<&Intent>) -> HashSet<String> {
    let mut terms = HashSet::new();
    let tags = intent.map(|i| i.tags.as_slice()).unwrap_or(&[]);
    let words = phrase
        .split(|c: char| !c.is_alphanumeric())
        .chain(tags.iter().flat_map(|t| t.split(|c: char| !c.is_alphanumeric())));
    for word in words.filter(|w| !w.is_empty()) {
        let word = word.to_lowercase();
        if let Some(singular) = word.strip_suffix('s') {
            if !singular.is_empty() {
                terms.insert(singular.to_string());
            }
        }
        terms.insert(word);
    }
    terms
}

/// A tag matches when every word of its label is a query term.
fn tag_matches(tag: &Tag, terms: &HashSet<String>) -> bool {
    let mut words = tag.label.split_whitespace().peekable();
    words.peek().is_some() && words.all(|w| terms.contains(&w.to_lowercase()))
}

/// One result per file: the best-scoring modality wins, then a matching
/// auto-tag adds `tag_boost`, clamped to 1.0.
fn fuse(hits: Vec<IndexHit>, terms: &HashSet<String>, tag_boost: f32) -> Vec<SearchResult> {
    let mut best: HashMap<PathBuf, SearchResult> = HashMap::new();
    let mut tags_by_path: HashMap<PathBuf, Vec<Tag>> = HashMap::new();

    for hit in hits {
        if !hit.tags.is_empty() {
            tags_by_path
                .entry(hit.path.clone())
                .or_default()
                .extend(hit.tags.iter().cloned());
        }
        let replace = best
            .get(&hit.path)
            .map(|current| hit.score > current.score)
            .unwrap_or(true);
        if replace {
            best.insert(
                hit.path.clone(),
                SearchResult {
                    path: hit.path,
                    score: hit.score,
                    modality: hit.modality,
                    file_type: hit.file_type,
                    modified_at: hit.modified_at,
                    snippet: hit.snippet,
                    tags: Vec::new(),
                },
            );
        }
    }

    best.into_values()
        .map(|mut result| {
            if let Some(tags) = tags_by_path.remove(&result.path) {
                if tags.iter().any(|t| tag_matches(t, terms)) {
                    result.score = (result.score + tag_boost).min(1.0);
                }
                result.tags = tags;
            }
            result
        })
        .collect()
}

/// Score descending, then most recently modified, then path.
fn rank(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.modified_at.cmp(&a.modified_at))
            .then_with(|| a.path.cmp(&b.path))
    });
}
