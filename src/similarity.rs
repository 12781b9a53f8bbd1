// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cosine similarity scoring and ranking.

use serde::Serialize;

use crate::embedding::CachedEmbedding;
use crate::errors::SimilarityError;

/// One section line scored against the query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatch {
    pub text: String,
    /// 1-indexed line in the source document
    pub source_line: usize,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
}

/// Checks that a vector can take part in a cosine comparison and returns its norm.
pub fn vector_norm(vector: &[f32]) -> Result<f32, SimilarityError> {
    if vector.is_empty() {
        return Err(SimilarityError::Empty);
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(SimilarityError::NonFinite);
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return Err(SimilarityError::ZeroVector);
    }
    Ok(norm)
}

/// Computes cosine similarity between two vectors.
///
/// Unlike a plain dot product this does not assume unit-length input, so
/// providers that skip normalization still compare correctly.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let magnitude_a = vector_norm(a)?;
    let magnitude_b = vector_norm(b)?;
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();

    // Rounding can push |cos| a hair past 1 for parallel vectors.
    Ok((dot_product / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0))
}

/// Scores every candidate against the query and ranks them.
///
/// Sorted by descending similarity. The sort is stable, so candidates with
/// equal scores keep their document order.
pub fn score(
    query: &[f32],
    candidates: &[CachedEmbedding],
) -> Result<Vec<SimilarityMatch>, SimilarityError> {
    let mut results = candidates
        .iter()
        .map(|candidate| {
            Ok(SimilarityMatch {
                text: candidate.text.clone(),
                source_line: candidate.source_line,
                similarity: cosine_similarity(query, &candidate.vector)?,
            })
        })
        .collect::<Result<Vec<_>, SimilarityError>>()?;

    results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str, line: usize, vector: Vec<f32>) -> CachedEmbedding {
        CachedEmbedding {
            text: text.to_string(),
            source_line: line,
            vector,
        }
    }

    #[test]
    fn test_self_similarity_is_one() {
        let a = vec![0.3, -1.2, 4.5, 0.01];
        let sim = cosine_similarity(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-2.0, 0.5, 1.0];
        assert_eq!(
            cosine_similarity(&a, &b).unwrap(),
            cosine_similarity(&b, &a).unwrap()
        );
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-6);
        let opposite = cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]).unwrap();
        assert!((opposite + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_zero_vector() {
        assert_eq!(
            cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]),
            Err(SimilarityError::ZeroVector)
        );
        assert_eq!(
            cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]),
            Err(SimilarityError::ZeroVector)
        );
    }

    #[test]
    fn test_rejects_mismatched_and_empty() {
        assert_eq!(
            cosine_similarity(&[1.0], &[1.0, 0.0]),
            Err(SimilarityError::DimensionMismatch { left: 1, right: 2 })
        );
        assert_eq!(cosine_similarity(&[], &[]), Err(SimilarityError::Empty));
        assert_eq!(
            cosine_similarity(&[f32::NAN], &[1.0]),
            Err(SimilarityError::NonFinite)
        );
    }

    #[test]
    fn test_score_ranks_descending_with_stable_ties() {
        let candidates = vec![
            candidate("far", 3, vec![0.0, 1.0]),
            candidate("tie-first", 5, vec![1.0, 1.0]),
            candidate("exact", 7, vec![1.0, 0.0]),
            candidate("tie-second", 9, vec![2.0, 2.0]),
        ];

        let ranked = score(&[1.0, 0.0], &candidates).unwrap();
        let order: Vec<&str> = ranked.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(order, vec!["exact", "tie-first", "tie-second", "far"]);
        assert_eq!(ranked[1].source_line, 5);
    }

    #[test]
    fn test_score_propagates_bad_candidate() {
        let candidates = vec![candidate("zero", 1, vec![0.0, 0.0])];
        assert_eq!(
            score(&[1.0, 0.0], &candidates),
            Err(SimilarityError::ZeroVector)
        );
    }
}
