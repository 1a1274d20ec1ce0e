/// Hamming distance between two 64-bit fingerprints.
///
/// Always in `0..=64`. Symmetric and satisfies the triangle inequality, which
/// the BK-tree relies on for pruning.
#[inline]
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
