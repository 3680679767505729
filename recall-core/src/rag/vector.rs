//! Vector math and local ranking.

use super::types::{KnowledgeDocument, SearchResult};
use std::cmp::Ordering;

/// Euclidean norm.
pub fn magnitude(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scales `vector` to unit length.
///
/// A zero vector is returned unchanged rather than divided by zero.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = magnitude(vector);
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / norm).collect()
}

/// Cosine of the angle between `a` and `b`, in `[-1.0, 1.0]`.
///
/// Returns `0.0` ("no similarity") when the lengths differ, either vector is
/// empty, or either has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a = magnitude(a);
    let magnitude_b = magnitude(b);

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

/// Scores every document against `query` and keeps the best `top_k`.
///
/// Documents without an embedding are skipped. A result is kept only when
/// its similarity is strictly greater than `threshold`. Results are ordered
/// by descending similarity; equal scores are ordered by ascending id.
pub fn rank_documents<I>(query: &[f32], documents: I, threshold: f32, top_k: usize) -> Vec<SearchResult>
where
    I: IntoIterator<Item = KnowledgeDocument>,
{
    let mut results: Vec<SearchResult> = documents
        .into_iter()
        .filter_map(|document| {
            let similarity = cosine_similarity(query, document.embedding.as_deref()?);
            Some(SearchResult {
                id: document.id,
                content: document.content,
                metadata: document.metadata,
                similarity,
            })
        })
        .filter(|result| result.similarity > threshold)
        .collect();

    results.sort_by(by_similarity_desc);
    results.truncate(top_k);
    results
}

fn by_similarity_desc(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.id.cmp(&b.id))
}
