//! Similarity computation for embeddings.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical vectors
/// - 0.0 means orthogonal vectors
/// - -1.0 means opposite vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot_product / (magnitude_a * magnitude_b))
}

/// Normalize an embedding to unit length.
pub fn normalize(embedding: &mut Embedding) {
    let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in embedding.iter_mut() {
            *x /= magnitude;
        }
    }
}

/// A scored candidate from a similarity ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scored {
    /// Identifier of the matched candidate.
    pub id: String,

    /// Cosine similarity against the query.
    pub score: f32,
}

/// Find the top-k most similar embeddings among `candidates`.
///
/// Candidates whose dimension does not match the query are skipped rather
/// than failing the whole ranking; a candidate set is typically assembled
/// from entries written by different models.
pub fn find_top_k(
    query: &Embedding,
    candidates: &[(String, Embedding)],
    k: usize,
    min_score: f32,
) -> Vec<Scored> {
    let mut scores: Vec<(OrderedFloat<f32>, &str)> = candidates
        .iter()
        .filter_map(|(id, embedding)| {
            let score = cosine_similarity(query, embedding).ok()?;
            (score >= min_score).then_some((OrderedFloat(score), id.as_str()))
        })
        .collect();

    // Sort by score descending
    scores.sort_by(|a, b| b.0.cmp(&a.0));

    scores
        .into_iter()
        .take(k)
        .map(|(score, id)| Scored {
            id: id.to_string(),
            score: score.0,
        })
        .collect()
}
