//! Optional natural-language intent parsing.
//!
//! An [`IntentParser`] turns a free-text query into a rewritten search
//! phrase plus structured hints (file type, time phrase, tags). The query
//! engine treats every parser error as "no intent": search always works
//! without one.
//!
//! Implementations: [`DisabledParser`] (the default, and what a missing
//! credential yields) and [`GeminiParser`], which asks the Gemini
//! `generateContent` endpoint for a JSON object.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::IntentConfig;
use crate::error::IntentError;
use crate::models::{FileType, SearchFilters};

/// Structured reading of a query, as returned by the parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(default)]
    pub refined_query: Option<String>,
    /// `image`, `document`, or `any`.
    #[serde(default)]
    pub file_type: Option<String>,
    /// Free-form time phrase such as `"last week"` or `"2024"`.
    #[serde(default)]
    pub time_filter: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub emotion: Option<String>,
}

impl Intent {
    /// Filters implied by this intent, with time phrases resolved against `now`.
    pub fn filters(&self, now: DateTime<Utc>) -> SearchFilters {
        let file_types = match self.file_type.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("image") | Some("images") | Some("photo") | Some("photos") => vec![FileType::Image],
            Some("document") | Some("documents") | Some("text") => {
                vec![FileType::Document, FileType::Text]
            }
            _ => Vec::new(),
        };
        let (modified_after, modified_before) = self
            .time_filter
            .as_deref()
            .and_then(|phrase| resolve_time_phrase(phrase, now))
            .map(|(a, b)| (Some(a), Some(b)))
            .unwrap_or((None, None));
        SearchFilters {
            file_types,
            modified_after,
            modified_before,
        }
    }
}

#[async_trait]
pub trait IntentParser: Send + Sync {
    fn name(&self) -> &str;
    async fn parse(&self, query: &str) -> Result<Intent, IntentError>;
}

pub struct DisabledParser;

#[async_trait]
impl IntentParser for DisabledParser {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn parse(&self, _query: &str) -> Result<Intent, IntentError> {
        Err(IntentError::Unavailable("intent parsing is disabled".to_string()))
    }
}

pub struct GeminiParser {
    client: reqwest::Client,
    model: String,
    api_key: String,
}

impl GeminiParser {
    pub fn new(config: &IntentConfig, api_key: String) -> Result<Self, IntentError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IntentError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl IntentParser for GeminiParser {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn parse(&self, query: &str) -> Result<Intent, IntentError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": build_prompt(query) }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| IntentError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(IntentError::Unavailable(format!(
                "Gemini API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IntentError::Malformed(e.to_string()))?;
        let text = json
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| IntentError::Malformed("response has no candidate text".to_string()))?;

        let intent = parse_intent_text(text)?;
        debug!(?intent, "parsed query intent");
        Ok(intent)
    }
}

fn build_prompt(query: &str) -> String {
    format!(
        r#"You are a search intent parser for a personal file memory system.
Given a user query, extract the intent and return a JSON object with these fields:
- "refined_query": A concise, searchable version of the user's query.
- "file_type": One of "image", "document", "any".
- "time_filter": Relevant time context (e.g., "last week", "2024") or null.
- "tags": List of relevant tags/keywords.
- "emotion": Detected emotional tone (e.g., "nostalgic", "urgent", "casual") or null.

RESPOND WITH ONLY valid JSON. No markdown, no explanation.

User query: {}
"#,
        serde_json::Value::String(query.to_string())
    )
}

/// Parse the model's reply, tolerating a surrounding markdown code fence.
pub fn parse_intent_text(raw: &str) -> Result<Intent, IntentError> {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // drop the fence's language tag line
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        text = text.trim_end().trim_end_matches("```").trim();
    }
    serde_json::from_str(text).map_err(|e| IntentError::Malformed(e.to_string()))
}

/// Resolve a time phrase to an inclusive `[start, end]` range of unix
/// seconds. Unrecognized phrases resolve to `None` and are ignored.
pub fn resolve_time_phrase(phrase: &str, now: DateTime<Utc>) -> Option<(i64, i64)> {
    let phrase = phrase.trim().to_ascii_lowercase();
    let today = now.date_naive();
    let day_start = |d: NaiveDate| d.and_hms_opt(0, 0, 0).map(|t| Utc.from_utc_datetime(&t).timestamp());
    let end = now.timestamp();

    let words: Vec<&str> = phrase.split_whitespace().collect();
    match words.as_slice() {
        ["today"] => Some((day_start(today)?, end)),
        ["yesterday"] => {
            let y = today.pred_opt()?;
            Some((day_start(y)?, day_start(today)? - 1))
        }
        ["this", "week"] => {
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            Some((day_start(monday)?, end))
        }
        ["last", "week"] => {
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            let prev = monday - Duration::days(7);
            Some((day_start(prev)?, day_start(monday)? - 1))
        }
        ["this", "month"] => Some((day_start(today.with_day(1)?)?, end)),
        ["last", "month"] => {
            let first = today.with_day(1)?;
            let prev_first = first.pred_opt()?.with_day(1)?;
            Some((day_start(prev_first)?, day_start(first)? - 1))
        }
        ["this", "year"] => Some((day_start(NaiveDate::from_ymd_opt(today.year(), 1, 1)?)?, end)),
        ["last", "year"] => year_range(today.year() - 1),
        ["last" | "past", n, unit] => {
            let n: i64 = n.parse().ok()?;
            if n < 0 {
                return None;
            }
            let per_unit = match unit.trim_end_matches('s') {
                "day" => 1,
                "week" => 7,
                "month" => 30,
                "year" => 365,
                _ => return None,
            };
            // counts past chrono's range are ignored, not clamped
            let span = Duration::try_days(n.checked_mul(per_unit)?)?;
            Some((now.checked_sub_signed(span)?.timestamp(), end))
        }
        [year] if year.len() == 4 => year_range(year.parse().ok()?),
        _ => None,
    }
}

fn year_range(year: i32) -> Option<(i64, i64)> {
    let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
    let next = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?;
    Some((start.timestamp(), next.timestamp() - 1))
}

/// Build the parser named by `[intent] provider`. A missing credential
/// disables parsing rather than failing startup.
pub fn create_intent_parser(config: &IntentConfig) -> Arc<dyn IntentParser> {
    if config.provider != "gemini" {
        return Arc::new(DisabledParser);
    }
    let Some(api_key) = config.api_key() else {
        info!(env = %config.api_key_env, "intent parser credential not set; using direct search");
        return Arc::new(DisabledParser);
    };
    match GeminiParser::new(config, api_key) {
        Ok(parser) => {
            info!(model = %config.model, "Gemini intent parsing enabled");
            Arc::new(parser)
        }
        Err(e) => {
            info!(error = %e, "Gemini client unavailable; using direct search");
            Arc::new(DisabledParser)
        }
    }
}
