//! # LifeVault
//!
//! A local semantic index over one folder tree. LifeVault watches the
//! folder, extracts what it can from each file (pixels, document text,
//! OCR text), embeds it into shared vector spaces, and answers
//! natural-language queries with ranked file references.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │ FileWatcher │──▶│   IngestPipeline     │──▶│ VectorIndex  │
//! │ (debounced) │   │ extract ▶ embed ▶ tag│   │ SQLite (WAL) │
//! └─────────────┘   └──────────────────────┘   └──────┬───────┘
//!                                                     │
//!                    ┌──────────────┐          ┌──────┴───────┐
//!                    │ IntentParser │─────────▶│ QueryEngine  │
//!                    │  (optional)  │          │ fuse ▶ rank  │
//!                    └──────────────┘          └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lifevault init                           # create database
//! lifevault scan                           # index the folder once
//! lifevault watch                          # follow changes until Ctrl-C
//! lifevault search "sunset at the beach"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`walk`] | Root, include/exclude globs, tree walking |
//! | [`watcher`] | Debounced filesystem events |
//! | [`extract`] | Per-type content extraction |
//! | [`ocr`] | Optional text recognition for images |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`tagger`] | Zero-shot image labels |
//! | [`pipeline`] | Ingestion state machine and worker pool |
//! | [`index`] | Persistent vector index |
//! | [`intent`] | Natural-language query parsing |
//! | [`search`] | Query engine and result fusion |
//! | [`vault`] | The assembled service |
//! | [`stats`] | CLI rendering |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod intent;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod search;
pub mod stats;
pub mod tagger;
pub mod vault;
pub mod walk;
pub mod watcher;
