// SPDX-License-Identifier: MIT OR Apache-2.0

//! mddedup - Semantic deduplication library for markdown documents
//!
//! Shared modules for the mddedup CLI tool: section extraction, the
//! embedding cache, similarity scoring and the two-stage engine.

pub mod config;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod output;
pub mod section;
pub mod similarity;
pub mod utils;

pub use engine::{DedupEngine, DedupSettings, Evaluation, RankedMatch, Thresholds, Tier};
pub use errors::{DedupError, DedupResult};
