//! Vector normalization and scoring.
//!
//! Cosine similarity reduces to a dot product once all stored vectors
//! and queries are unit-normalized, so normalization happens exactly
//! once, at insert and at query time.

/// L2-normalize a vector to the unit sphere.
///
/// If the vector is already unit length (within ε) or is the zero
/// vector, the input is returned unscaled.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm_sq: f32 = vector.iter().map(|x| x * x).sum();
    if (norm_sq - 1.0).abs() < 1e-6 || norm_sq <= 1e-12 {
        return vector.to_vec();
    }
    let inv = 1.0 / norm_sq.sqrt();
    vector.iter().map(|x| x * inv).collect()
}

/// Dot product of two equal-length vectors. On unit-normalized inputs
/// this is the cosine similarity, in `[-1, 1]`.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "dimension mismatch");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_scales_to_unit_length() {
        let v = normalize(&[3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_unit_and_zero_vectors_alone() {
        assert_eq!(normalize(&[1.0, 0.0]), vec![1.0, 0.0]);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn cosine_ranking_via_dot() {
        let query = normalize(&[1.0, 0.0]);
        let near = normalize(&[0.9, 0.1]);
        let far = normalize(&[0.1, 0.9]);
        assert!(dot(&query, &near) > dot(&query, &far));
    }
}
