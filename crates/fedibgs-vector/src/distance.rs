//! Brute-force cosine ranking over stored vectors.

use uuid::Uuid;

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Cosine distance, `1 - similarity`. Lower is closer.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b)
}

/// Order `candidates` by ascending cosine distance to `query`.
///
/// Ties are broken by id so that rankings are reproducible.
pub fn nearest<I>(query: &[f32], candidates: I) -> Vec<(Uuid, f64)>
where
    I: IntoIterator<Item = (Uuid, Vec<f32>)>,
{
    let mut scored: Vec<(Uuid, f64)> = candidates
        .into_iter()
        .map(|(id, v)| (id, cosine_distance(query, &v)))
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    scored
}
