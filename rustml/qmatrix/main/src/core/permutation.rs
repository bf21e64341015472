/// Row permutation codec.
///
/// Rows are reordered before quantization so that rows with similar value
/// ranges land in the same group. `forward[original] = permuted` and
/// `inverse[permuted] = original`; the two are always kept consistent.
use crate::api::error::{QMatrixError, QMatrixResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    forward: Vec<u32>,
    inverse: Vec<u32>,
}

/// Invert a permutation of `[0, n)`, rejecting anything that is not a bijection.
pub fn invert(forward: &[u32]) -> QMatrixResult<Vec<u32>> {
    let n = forward.len();
    if n > u32::MAX as usize {
        return Err(QMatrixError::InvalidPermutation(format!(
            "length {} exceeds the u32 index range",
            n
        )));
    }

    let mut inverse = vec![u32::MAX; n];
    for (i, &p) in forward.iter().enumerate() {
        let p_idx = p as usize;
        if p_idx >= n {
            return Err(QMatrixError::InvalidPermutation(format!(
                "value {} at position {} is outside [0, {})",
                p, i, n
            )));
        }
        if inverse[p_idx] != u32::MAX {
            return Err(QMatrixError::InvalidPermutation(format!(
                "value {} appears at positions {} and {}",
                p, inverse[p_idx], i
            )));
        }
        inverse[p_idx] = i as u32;
    }
    // n distinct values in [0, n): every slot is filled.
    Ok(inverse)
}

impl Permutation {
    pub fn identity(n: usize) -> Self {
        let forward: Vec<u32> = (0..n as u32).collect();
        Self {
            inverse: forward.clone(),
            forward,
        }
    }

    /// Build from the forward map, deriving the inverse.
    pub fn from_forward(forward: Vec<u32>) -> QMatrixResult<Self> {
        let inverse = invert(&forward)?;
        Ok(Self { forward, inverse })
    }

    /// Build from the inverse map, deriving the forward one.
    pub fn from_inverse(inverse: Vec<u32>) -> QMatrixResult<Self> {
        let forward = invert(&inverse)?;
        Ok(Self { forward, inverse })
    }

    /// Build from both maps and check that they agree.
    pub fn from_parts(forward: Vec<u32>, inverse: Vec<u32>) -> QMatrixResult<Self> {
        if forward.len() != inverse.len() {
            return Err(QMatrixError::InvalidPermutation(format!(
                "forward has {} entries, inverse has {}",
                forward.len(),
                inverse.len()
            )));
        }
        let derived = invert(&forward)?;
        if let Some(p) = derived.iter().zip(&inverse).position(|(a, b)| a != b) {
            return Err(QMatrixError::InvalidPermutation(format!(
                "inverse[{}] = {} but forward[{}] = {}",
                p, inverse[p], derived[p], p
            )));
        }
        Ok(Self { forward, inverse })
    }

    /// Accept whichever maps the caller supplied; none means identity.
    pub fn resolve(n: usize, forward: Option<Vec<u32>>, inverse: Option<Vec<u32>>) -> QMatrixResult<Self> {
        let perm = match (forward, inverse) {
            (None, None) => return Ok(Self::identity(n)),
            (Some(f), None) => Self::from_forward(f)?,
            (None, Some(i)) => Self::from_inverse(i)?,
            (Some(f), Some(i)) => Self::from_parts(f, i)?,
        };
        if perm.len() != n {
            return Err(QMatrixError::shape("permutation", &[n], &[perm.len()]));
        }
        Ok(perm)
    }

    /// Stable ordering of rows by `keys`: permuted row `p` holds the row with
    /// the `p`-th smallest key, ties kept in original order.
    pub fn sort_by_key(keys: &[u32]) -> Self {
        let mut order: Vec<u32> = (0..keys.len() as u32).collect();
        order.sort_by_key(|&i| keys[i as usize]);
        let mut forward = vec![0u32; keys.len()];
        for (p, &orig) in order.iter().enumerate() {
            forward[orig as usize] = p as u32;
        }
        Self {
            forward,
            inverse: order,
        }
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn forward(&self) -> &[u32] {
        &self.forward
    }

    pub fn inverse(&self) -> &[u32] {
        &self.inverse
    }

    #[inline]
    pub fn permuted_index(&self, original: usize) -> usize {
        self.forward[original] as usize
    }

    #[inline]
    pub fn original_index(&self, permuted: usize) -> usize {
        self.inverse[permuted] as usize
    }

    pub fn is_identity(&self) -> bool {
        self.forward.iter().enumerate().all(|(i, &p)| i == p as usize)
    }

    pub fn into_parts(self) -> (Vec<u32>, Vec<u32>) {
        (self.forward, self.inverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let p = Permutation::identity(5);
        assert!(p.is_identity());
        assert_eq!(p.inverse(), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_invert_roundtrip() {
        let forward = vec![3u32, 0, 4, 1, 2];
        let p = Permutation::from_forward(forward.clone()).unwrap();
        for i in 0..forward.len() {
            assert_eq!(p.original_index(p.permuted_index(i)), i);
            assert_eq!(p.permuted_index(p.original_index(i)), i);
        }
        assert!(!p.is_identity());
    }

    #[test]
    fn test_invert_rejects_out_of_range() {
        let err = invert(&[0, 1, 3]).unwrap_err();
        assert!(matches!(err, QMatrixError::InvalidPermutation(_)));
    }

    #[test]
    fn test_invert_rejects_duplicate() {
        let err = invert(&[0, 2, 2]).unwrap_err();
        assert!(matches!(err, QMatrixError::InvalidPermutation(_)));
    }

    #[test]
    fn test_from_parts_rejects_inconsistent_pair() {
        let err = Permutation::from_parts(vec![1, 2, 0], vec![1, 2, 0]).unwrap_err();
        assert!(matches!(err, QMatrixError::InvalidPermutation(_)));
        assert!(Permutation::from_parts(vec![1, 2, 0], vec![2, 0, 1]).is_ok());
    }

    #[test]
    fn test_resolve_length_mismatch() {
        let err = Permutation::resolve(4, Some(vec![0, 1, 2]), None).unwrap_err();
        assert!(matches!(err, QMatrixError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_resolve_from_inverse_only() {
        let p = Permutation::resolve(3, None, Some(vec![2, 0, 1])).unwrap();
        assert_eq!(p.forward(), &[1, 2, 0]);
    }

    #[test]
    fn test_sort_by_key_is_stable() {
        let keys = [1u32, 0, 1, 0, 2];
        let p = Permutation::sort_by_key(&keys);
        assert_eq!(p.inverse(), &[1, 3, 0, 2, 4]);
        assert_eq!(invert(p.forward()).unwrap(), p.inverse());
    }
}
