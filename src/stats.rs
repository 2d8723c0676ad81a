//! Human-readable rendering for `lifevault stats`, `list`, and `surprise`.
//!
//! Everything here formats values the [`Vault`](crate::vault::Vault) already
//! computed; nothing touches the database.

use std::fmt::Write;
use std::path::Path;

use crate::models::{FileRecord, IndexStats};
use crate::search::SearchResponse;

/// Render an index summary.
pub fn render_stats(stats: &IndexStats, db_path: &Path) -> String {
    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);
    let mut out = String::new();

    let _ = writeln!(out, "LifeVault: Index Stats");
    let _ = writeln!(out, "======================");
    let _ = writeln!(out);
    let _ = writeln!(out, "  Database:    {}", db_path.display());
    let _ = writeln!(out, "  Size:        {}", format_bytes(db_size));
    let _ = writeln!(out);
    let _ = writeln!(out, "  Files:       {}", stats.total_files);

    let indexed = stats.by_status.get("indexed").copied().unwrap_or(0);
    let _ = writeln!(
        out,
        "  Indexed:     {} / {} ({}%)",
        indexed,
        stats.total_files,
        if stats.total_files > 0 {
            (indexed * 100) / stats.total_files
        } else {
            0
        }
    );

    for (title, counts) in [
        ("By type", &stats.by_type),
        ("By status", &stats.by_status),
        ("Entries by modality", &stats.entries_by_modality),
        ("In flight", &stats.in_flight),
    ] {
        if counts.is_empty() {
            continue;
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "  {}:", title);
        for (key, count) in counts {
            let _ = writeln!(out, "    {:<20} {:>8}", key, count);
        }
    }

    if let Some(err) = &stats.watcher_error {
        let _ = writeln!(out);
        let _ = writeln!(out, "  Watcher:     DEGRADED ({})", err);
    }
    out
}

/// One line per record: status, type, size, age, path.
pub fn render_records(records: &[FileRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<18} {:<9} {:>9}  {:<16} PATH",
        "STATUS", "TYPE", "SIZE", "MODIFIED"
    );
    let _ = writeln!(out, "{}", "-".repeat(76));
    for r in records {
        let _ = writeln!(
            out,
            "{:<18} {:<9} {:>9}  {:<16} {}",
            r.status.as_str(),
            r.file_type.as_str(),
            format_bytes(r.size),
            format_ts_relative(r.modified_at),
            r.path.display()
        );
    }
    out
}

pub fn render_search(response: &SearchResponse) -> String {
    let mut out = String::new();
    if response.refined_query != response.query.trim() {
        let _ = writeln!(out, "Searching for: {}", response.refined_query);
    }
    for warning in &response.warnings {
        let _ = writeln!(out, "warning: {}", warning);
    }
    if response.results.is_empty() {
        let _ = writeln!(out, "No results.");
        return out;
    }
    for (i, r) in response.results.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>2}. [{:.3}] {} ({}, {})",
            i + 1,
            r.score,
            r.path.display(),
            r.modality,
            format_ts_relative(r.modified_at)
        );
        if !r.tags.is_empty() {
            let labels: Vec<&str> = r.tags.iter().map(|t| t.label.as_str()).collect();
            let _ = writeln!(out, "    tags: {}", labels.join(", "));
        }
        if let Some(snippet) = &r.snippet {
            let _ = writeln!(out, "    {}", snippet);
        }
    }
    out
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
pub fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
