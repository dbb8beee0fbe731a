//! Cosine similarity between embedding vectors.
//!
//! Pure math, no state. Dimension mismatches are reported as errors so
//! callers can decide whether to treat them as "no match" or abort;
//! zero-magnitude vectors score 0 against everything.

/// Errors from vector math.
#[derive(Debug, thiserror::Error)]
pub enum SimilarityError {
    #[error("Dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1], clamped to absorb floating-point drift.
/// A zero-magnitude input yields `Ok(0.0)`: a degenerate vector can never
/// be "most similar" to anything.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return Ok(0.0);
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();

    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Whether a vector has (effectively) zero magnitude.
pub fn is_degenerate(v: &[f32]) -> bool {
    l2_norm(v) < f32::EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine(&a, &a).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine(&a, &b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_opposite_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, -2.0, -3.0];
        assert!((cosine(&a, &b).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_symmetric() {
        let a = vec![0.3, -0.7, 0.2];
        let b = vec![0.9, 0.1, -0.4];
        assert_eq!(cosine(&a, &b).unwrap(), cosine(&b, &a).unwrap());
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let a = vec![1.0, 2.0, 3.0];
        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(cosine(&a, &zero).unwrap(), 0.0);
        assert_eq!(cosine(&zero, &a).unwrap(), 0.0);
        assert_eq!(cosine(&zero, &zero).unwrap(), 0.0);
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(matches!(
            cosine(&a, &b),
            Err(SimilarityError::DimensionMismatch { left: 2, right: 3 })
        ));
    }

    #[test]
    fn test_clamped_to_unit_range() {
        // Large collinear values can push the raw ratio past 1.0 in f32.
        let a = vec![1e20, 1e20, 1e20];
        let b = vec![1e20, 1e20, 1e20];
        let sim = cosine(&a, &b).unwrap();
        assert!((-1.0..=1.0).contains(&sim));

        let c = vec![3.0e-5, 4.0e-5];
        let sim = cosine(&c, &c).unwrap();
        assert!((-1.0..=1.0).contains(&sim));
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_is_degenerate() {
        assert!(is_degenerate(&[0.0, 0.0]));
        assert!(!is_degenerate(&[0.0, 0.1]));
    }
}
