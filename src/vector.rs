//! This is the vector math module
//! Provide L2 normalization and dot product for sparse feature vectors

/// A sparse vector: `(term index, weight)` pairs sorted by term index,
/// with no repeated index.
pub type SparseVec = Vec<(usize, f32)>;

/// L2 Normalization
/// norm_vec = vec / ||vec||
/// An empty or all-zero vector has no direction and normalizes to the empty
/// vector, which is orthogonal to everything.
pub fn l2_norm(vector: &[(usize, f32)]) -> SparseVec {
    let norm = vector.iter()
        .map(|(_, x)| x * x)
        .sum::<f32>()
        .sqrt();

    if norm == 0.0 {
        return Vec::new();
    }

    vector.iter()
        .map(|&(i, x)| (i, x / norm))
        .collect()
}

/// Dot Product
/// dot_prod = sum(a[i] * b[i]) over indices present in both vectors
/// Both inputs must be sorted by index
pub fn dot_product(left: &[(usize, f32)], right: &[(usize, f32)]) -> f32 {
    let mut dot_prod = 0.0;
    let (mut l, mut r) = (0, 0);

    while l < left.len() && r < right.len() {
        let (li, lv) = left[l];
        let (ri, rv) = right[r];
        if li == ri {
            dot_prod += lv * rv;
            l += 1;
            r += 1;
        } else if li < ri {
            l += 1;
        } else {
            r += 1;
        }
    }

    dot_prod
}

#[cfg(test)]
mod vector_test {
    use super::*;

    // ========== L2 Normalization Tests ==========

    #[test]
    fn test_l2_norm_basic() {
        // ||[3,4]|| = 5
        let result = l2_norm(&[(0, 3.0), (7, 4.0)]);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].0, 0);
        assert_eq!(result[1].0, 7);
        assert!((result[0].1 - 0.6).abs() < 1e-6);
        assert!((result[1].1 - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_norm_is_unit_length() {
        let result = l2_norm(&[(1, 1.0), (2, 2.0), (5, 3.0), (9, 4.0)]);

        let norm: f32 = result.iter().map(|(_, x)| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_norm_zero_vector_is_empty() {
        assert!(l2_norm(&[(0, 0.0), (1, 0.0)]).is_empty());
    }

    #[test]
    fn test_l2_norm_empty_vector() {
        assert!(l2_norm(&[]).is_empty());
    }

    // ========== Dot Product Tests ==========

    #[test]
    fn test_dot_product_shared_indices_only() {
        let a = vec![(0, 1.0), (2, 2.0), (4, 3.0)];
        let b = vec![(1, 9.0), (2, 5.0), (4, 6.0), (8, 1.0)];
        // 2*5 + 3*6 = 28
        assert!((dot_product(&a, &b) - 28.0).abs() < 1e-6);
    }

    #[test]
    fn test_dot_product_disjoint() {
        let a = vec![(0, 1.0)];
        let b = vec![(1, 1.0)];
        assert_eq!(dot_product(&a, &b), 0.0);
    }

    #[test]
    fn test_dot_product_empty_vectors() {
        assert_eq!(dot_product(&[], &[]), 0.0);
        assert_eq!(dot_product(&[(0, 1.0)], &[]), 0.0);
    }

    #[test]
    fn test_normalize_then_dot_product() {
        let n1 = l2_norm(&[(0, 1.0)]);
        let n2 = l2_norm(&[(0, 0.7), (1, 0.7)]);

        // cosine of 45 degrees
        assert!((dot_product(&n1, &n2) - 0.707).abs() < 0.001);
    }
}
