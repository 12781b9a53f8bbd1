// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two-stage deduplication engine.
//!
//! Stage 1 is a verbatim substring check against the whole document. Stage 2
//! embeds the target section (through the cache) and the query, ranks section
//! lines by cosine similarity and classifies the best match.

use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::embedding::{
    CacheKey, CacheStatus, CacheStore, ClearScope, EmbeddingProvider, VectorCache,
};
use crate::errors::{DedupError, DedupResult};
use crate::section;
use crate::similarity::{self, SimilarityMatch};
use crate::utils::{document_identity, resolve_in_workspace};

/// Classification tier for a similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Different,
    Related,
    Duplicate,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Duplicate => write!(f, "DUPLICATE"),
            Tier::Related => write!(f, "RELATED"),
            Tier::Different => write!(f, "DIFFERENT"),
        }
    }
}

/// Similarity thresholds. Lower bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    /// `similarity >= duplicate` is a duplicate
    pub duplicate: f32,
    /// `related <= similarity < duplicate` is related
    pub related: f32,
    /// Anything below the floor is not reported at all
    pub floor: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            duplicate: 0.85,
            related: 0.70,
            floor: 0.65,
        }
    }
}

impl Thresholds {
    /// Validated constructor: `-1 <= floor <= related <= duplicate <= 1`.
    pub fn new(duplicate: f32, related: f32, floor: f32) -> DedupResult<Self> {
        let ordered =
            -1.0 <= floor && floor <= related && related <= duplicate && duplicate <= 1.0;
        if !ordered {
            return Err(DedupError::Config(format!(
                "thresholds must satisfy -1 <= floor ({}) <= related ({}) <= duplicate ({}) <= 1",
                floor, related, duplicate
            )));
        }
        Ok(Self {
            duplicate,
            related,
            floor,
        })
    }

    /// Tier for a score, or `None` when it falls below the relevance floor.
    pub fn classify(&self, similarity: f32) -> Option<Tier> {
        if similarity >= self.duplicate {
            Some(Tier::Duplicate)
        } else if similarity >= self.related {
            Some(Tier::Related)
        } else if similarity >= self.floor {
            Some(Tier::Different)
        } else {
            None
        }
    }
}

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupSettings {
    pub thresholds: Thresholds,
    /// Maximum number of ranked matches to report
    pub max_matches: usize,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            max_matches: 5,
        }
    }
}

/// A section line that cleared the relevance floor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch {
    #[serde(flatten)]
    pub line: SimilarityMatch,
    /// Tier of this match on its own, independent of the overall verdict
    pub tier: Tier,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Evaluation {
    /// The query text appears verbatim in the document.
    ExactMatch {
        /// 1-indexed line where the verbatim match starts
        line: usize,
    },
    /// No heading matched the requested section. Not a dedup verdict.
    SectionNotFound { section: String },
    /// Nothing in the section reached the relevance floor.
    NoSimilarContent { max_similarity: f32 },
    /// Ranked matches, best first.
    Matches {
        verdict: Tier,
        max_similarity: f32,
        matches: Vec<RankedMatch>,
    },
}

impl Evaluation {
    /// Which stage produced the result: 1 for exact, 2 for semantic.
    pub fn stage(&self) -> u8 {
        match self {
            Evaluation::ExactMatch { .. } => 1,
            _ => 2,
        }
    }

    /// Human-readable recommendation label.
    pub fn recommendation(&self) -> String {
        match self {
            Evaluation::ExactMatch { .. } => "DUPLICATE (exact match)".to_string(),
            Evaluation::SectionNotFound { .. } => "CHECK SECTION NAME".to_string(),
            Evaluation::NoSimilarContent { .. } => {
                "DIFFERENT (no similar content found)".to_string()
            }
            Evaluation::Matches { verdict, .. } => verdict.to_string(),
        }
    }

    /// Overall tier, if the evaluation produced a verdict.
    pub fn verdict(&self) -> Option<Tier> {
        match self {
            Evaluation::ExactMatch { .. } => Some(Tier::Duplicate),
            Evaluation::SectionNotFound { .. } => None,
            Evaluation::NoSimilarContent { .. } => Some(Tier::Different),
            Evaluation::Matches { verdict, .. } => Some(*verdict),
        }
    }
}

/// Deduplication engine over an embedding provider and a cache store.
pub struct DedupEngine<P, S> {
    provider: P,
    cache: VectorCache<S>,
    settings: DedupSettings,
}

impl<P: EmbeddingProvider, S: CacheStore> DedupEngine<P, S> {
    pub fn new(provider: P, store: S) -> Self {
        Self::with_settings(provider, store, DedupSettings::default())
    }

    pub fn with_settings(provider: P, store: S, settings: DedupSettings) -> Self {
        Self {
            provider,
            cache: VectorCache::new(store),
            settings,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn cache(&self) -> &VectorCache<S> {
        &self.cache
    }

    pub fn settings(&self) -> &DedupSettings {
        &self.settings
    }

    /// Checks whether `query` is already present in `section_name` of `document`.
    ///
    /// `document_id` identifies the document for caching and must be stable
    /// across runs. The provider is only touched in stage 2.
    pub fn evaluate(
        &mut self,
        query: &str,
        document_id: &str,
        document: &str,
        section_name: &str,
    ) -> DedupResult<Evaluation> {
        validate_inputs(query, section_name)?;

        if let Some(offset) = document.find(query) {
            let line = document[..offset].matches('\n').count() + 1;
            tracing::debug!(line, "exact match");
            return Ok(Evaluation::ExactMatch { line });
        }

        let lines = section::extract(document, section_name);
        if lines.is_empty() {
            return Ok(Evaluation::SectionNotFound {
                section: section_name.to_string(),
            });
        }

        if !self.provider.is_ready() {
            self.provider.initialize().map_err(DedupError::provider)?;
        }

        let key = CacheKey::new(document_id, section_name);
        let lookup = self.cache.get_or_compute(&key, &lines, &mut self.provider)?;
        if lookup.status != CacheStatus::Hit {
            tracing::debug!(status = ?lookup.status, "section embeddings rebuilt");
        }

        let query_vector = self
            .provider
            .embed_one(query)
            .map_err(DedupError::provider)?;
        let ranked = similarity::score(&query_vector, &lookup.embeddings)?;
        Ok(self.classify(ranked))
    }

    /// Loads `path` from inside `workspace_root` and evaluates it.
    ///
    /// The query and section are validated before the file is touched, and
    /// the workspace-relative path is used as the document identity.
    pub fn evaluate_file(
        &mut self,
        query: &str,
        workspace_root: &Path,
        path: &Path,
        section_name: &str,
    ) -> DedupResult<Evaluation> {
        validate_inputs(query, section_name)?;

        let resolved = resolve_in_workspace(workspace_root, path)?;
        let document = std::fs::read_to_string(&resolved).map_err(|source| DedupError::Io {
            path: resolved.clone(),
            source,
        })?;
        let document_id = document_identity(workspace_root, &resolved);

        self.evaluate(query, &document_id, &document, section_name)
    }

    /// Removes cached embeddings. Clearing an empty cache succeeds with 0.
    pub fn clear_cache(&mut self, scope: &ClearScope) -> anyhow::Result<usize> {
        self.cache.clear(scope)
    }

    fn classify(&self, ranked: Vec<SimilarityMatch>) -> Evaluation {
        let thresholds = self.settings.thresholds;
        let max_similarity = ranked.first().map(|m| m.similarity).unwrap_or(0.0);

        let matches: Vec<RankedMatch> = ranked
            .into_iter()
            .take(self.settings.max_matches)
            .filter_map(|line| {
                let tier = thresholds.classify(line.similarity)?;
                Some(RankedMatch { line, tier })
            })
            .collect();

        match matches.first() {
            None => Evaluation::NoSimilarContent { max_similarity },
            Some(best) => Evaluation::Matches {
                verdict: best.tier,
                max_similarity,
                matches,
            },
        }
    }
}

fn validate_inputs(query: &str, section_name: &str) -> DedupResult<()> {
    if query.trim().is_empty() {
        return Err(DedupError::InputValidation(
            "query text must not be empty".to_string(),
        ));
    }
    if section_name.trim().is_empty() {
        return Err(DedupError::InputValidation(
            "section name must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{HashingProvider, MemoryStore};

    fn engine() -> DedupEngine<HashingProvider, MemoryStore> {
        DedupEngine::new(HashingProvider::new(64), MemoryStore::new())
    }

    fn ranked(scores: &[f32]) -> Vec<SimilarityMatch> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &similarity)| SimilarityMatch {
                text: format!("line {}", i),
                source_line: i + 1,
                similarity,
            })
            .collect()
    }

    #[test]
    fn test_classification_boundaries() {
        let t = Thresholds::default();
        assert_eq!(t.classify(1.0), Some(Tier::Duplicate));
        assert_eq!(t.classify(0.85), Some(Tier::Duplicate));
        assert_eq!(t.classify(0.8499), Some(Tier::Related));
        assert_eq!(t.classify(0.70), Some(Tier::Related));
        assert_eq!(t.classify(0.6999), Some(Tier::Different));
        assert_eq!(t.classify(0.65), Some(Tier::Different));
        assert_eq!(t.classify(0.6499), None);
        assert_eq!(t.classify(-1.0), None);
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(Thresholds::new(0.9, 0.8, 0.7).is_ok());
        assert!(Thresholds::new(0.8, 0.8, 0.8).is_ok());
        assert!(Thresholds::new(0.7, 0.8, 0.6).is_err());
        assert!(Thresholds::new(1.5, 0.8, 0.6).is_err());
        assert!(Thresholds::new(0.9, 0.8, f32::NAN).is_err());
    }

    #[test]
    fn test_classify_keeps_top_five_above_floor() {
        let engine = engine();
        let result = engine.classify(ranked(&[0.9, 0.86, 0.75, 0.7, 0.66, 0.66, 0.5]));

        let Evaluation::Matches {
            verdict,
            max_similarity,
            matches,
        } = result
        else {
            panic!("expected matches");
        };
        assert_eq!(verdict, Tier::Duplicate);
        assert_eq!(max_similarity, 0.9);
        assert_eq!(matches.len(), 5);
        let tiers: Vec<Tier> = matches.iter().map(|m| m.tier).collect();
        assert_eq!(
            tiers,
            vec![
                Tier::Duplicate,
                Tier::Duplicate,
                Tier::Related,
                Tier::Related,
                Tier::Different
            ]
        );
    }

    #[test]
    fn test_classify_weak_signal_verdict() {
        let result = engine().classify(ranked(&[0.67, 0.2]));
        assert_eq!(result.verdict(), Some(Tier::Different));
        assert_eq!(result.recommendation(), "DIFFERENT");
        match result {
            Evaluation::Matches { matches, .. } => assert_eq!(matches.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_nothing_above_floor() {
        let result = engine().classify(ranked(&[0.64, 0.1]));
        assert_eq!(
            result,
            Evaluation::NoSimilarContent {
                max_similarity: 0.64
            }
        );
        assert_eq!(result.recommendation(), "DIFFERENT (no similar content found)");
    }

    #[test]
    fn test_exact_match_reports_line() {
        let mut engine = engine();
        let doc = "# Rules\n\n- Never rewrite entire sections at once.\n";
        let result = engine
            .evaluate("Never rewrite entire sections", "doc.md", doc, "Rules")
            .unwrap();
        assert_eq!(result, Evaluation::ExactMatch { line: 3 });
        assert_eq!(result.stage(), 1);
        assert_eq!(result.recommendation(), "DUPLICATE (exact match)");
        assert!(engine.cache().store().is_empty());
    }

    #[test]
    fn test_empty_query_rejected() {
        let mut engine = engine();
        for query in ["", "   \n"] {
            let err = engine.evaluate(query, "doc.md", "# Rules\nx\n", "Rules");
            assert!(matches!(err, Err(DedupError::InputValidation(_))));
        }
    }

    #[test]
    fn test_empty_section_name_rejected() {
        let mut engine = engine();
        let err = engine.evaluate("query", "doc.md", "# Rules\nx\n", " ");
        assert!(matches!(err, Err(DedupError::InputValidation(_))));
    }

    #[test]
    fn test_section_not_found() {
        let mut engine = engine();
        let result = engine
            .evaluate("something new", "doc.md", "# Rules\n- a rule\n", "Missing")
            .unwrap();
        assert_eq!(
            result,
            Evaluation::SectionNotFound {
                section: "Missing".to_string()
            }
        );
        assert_eq!(result.verdict(), None);
        assert_eq!(result.recommendation(), "CHECK SECTION NAME");
    }

    #[test]
    fn test_evaluation_serializes_with_outcome_tag() {
        let value = serde_json::to_value(Evaluation::Matches {
            verdict: Tier::Related,
            max_similarity: 0.75,
            matches: vec![RankedMatch {
                line: SimilarityMatch {
                    text: "x".to_string(),
                    source_line: 2,
                    similarity: 0.75,
                },
                tier: Tier::Related,
            }],
        })
        .unwrap();

        assert_eq!(value["outcome"], "matches");
        assert_eq!(value["verdict"], "RELATED");
        assert_eq!(value["matches"][0]["source_line"], 2);
        assert_eq!(value["matches"][0]["tier"], "RELATED");
    }
}
