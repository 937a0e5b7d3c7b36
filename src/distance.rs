//! Cosine similarity kernels

/// Dot product of two equally sized slices, accumulated in f64.
pub fn dot_product(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum()
}

/// L2 norm, accumulated in f64.
pub fn norm(a: &[f32]) -> f64 {
    a.iter().map(|&x| x as f64 * x as f64).sum::<f64>().sqrt()
}

/// Cosine similarity from a dot product and the two norms.
///
/// A zero norm on either side yields 0 instead of dividing by zero. A zero
/// dot product yields `+0.0`, never `-0.0`, so equal scores rank equal.
/// Vectors with NaN or infinite components score 0 as well.
#[inline]
pub fn cosine_from_parts(dot: f64, norm_a: f64, norm_b: f64) -> f64 {
    let denom = norm_a * norm_b;
    if denom == 0.0 || dot == 0.0 {
        return 0.0;
    }
    let score = dot / denom;
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// Cosine similarity of two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    cosine_from_parts(dot_product(a, b), norm(a), norm(b))
}
