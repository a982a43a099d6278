use crate::model::ScoredCandidate;

/// Cosine similarity in `[-1, 1]`. Zero-norm, empty or mismatched vectors
/// score 0.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, na, nb) = a
        .iter()
        .zip(b.iter())
        .fold((0.0f64, 0.0f64, 0.0f64), |(d, aa, bb), (x, y)| {
            let (x, y) = (*x as f64, *y as f64);
            (d + x * y, aa + x * x, bb + y * y)
        });

    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0) as f32
    }
}

/// Scores every candidate against the query, keeping input order.
pub fn score_candidates<S: AsRef<str>, V: AsRef<[f32]>>(
    query: &[f32],
    candidates: &[(S, V)],
) -> Vec<ScoredCandidate> {
    candidates
        .iter()
        .map(|(id, emb)| ScoredCandidate::new(id.as_ref(), similarity(query, emb.as_ref())))
        .collect()
}
