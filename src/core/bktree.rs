use crate::core::distance::hamming_distance;
use std::collections::BTreeMap;

/// A single indexed fingerprint. Children are keyed by their exact distance
/// to this node and refer to other nodes in the arena.
#[derive(Debug, Clone)]
struct BkNode {
    hash: u64,
    index: usize,
    children: BTreeMap<u32, usize>,
}

/// BK-tree over 64-bit fingerprints under Hamming distance.
///
/// Nodes live in a flat arena and reference each other by position, so
/// insertion and search are iterative and never recurse. The tree is never
/// rebalanced; its shape depends on insertion order. Identical fingerprints
/// chain downwards along edge label 0.
#[derive(Debug, Clone, Default)]
pub struct BkTree {
    nodes: Vec<BkNode>,
}

impl BkTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    /// Number of inserted fingerprints.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index `hash` under the caller's item `index`.
    pub fn insert(&mut self, hash: u64, index: usize) {
        let slot = self.nodes.len();
        self.nodes.push(BkNode {
            hash,
            index,
            children: BTreeMap::new(),
        });

        if slot == 0 {
            return;
        }

        let mut current = 0;
        loop {
            let dist = hamming_distance(hash, self.nodes[current].hash);
            match self.nodes[current].children.get(&dist) {
                Some(&child) => current = child,
                None => {
                    self.nodes[current].children.insert(dist, slot);
                    return;
                }
            }
        }
    }

    /// Item indices of every inserted fingerprint within `radius` of `query`.
    ///
    /// A subtree hanging off edge label `c` can only contain matches when
    /// `|d - c| <= radius`, where `d` is the query's distance to the parent.
    /// Results come back in traversal order, not insertion order.
    pub fn find_within(&self, query: u64, radius: u32) -> Vec<usize> {
        let mut results = Vec::new();
        if self.nodes.is_empty() {
            return results;
        }

        let mut stack = vec![0usize];
        while let Some(current) = stack.pop() {
            let node = &self.nodes[current];
            let dist = hamming_distance(query, node.hash);
            if dist <= radius {
                results.push(node.index);
            }

            let lo = dist.saturating_sub(radius);
            let hi = dist.saturating_add(radius);
            stack.extend(node.children.range(lo..=hi).map(|(_, &child)| child));
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut v: Vec<usize>) -> Vec<usize> {
        v.sort_unstable();
        v
    }

    #[test]
    fn test_empty_tree() {
        let tree = BkTree::new();
        assert!(tree.find_within(0, 10).is_empty());
        assert_eq!(tree.size(), 0);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_single_element() {
        let mut tree = BkTree::new();
        tree.insert(0b1111, 0);

        assert_eq!(tree.find_within(0b1111, 0), vec![0]);
        assert_eq!(tree.find_within(0b1110, 1), vec![0]);
        assert!(tree.find_within(0b0000, 3).is_empty());
    }

    #[test]
    fn test_multiple_elements() {
        let mut tree = BkTree::new();
        let hashes = [0b0000u64, 0b0001, 0b0011, 0b1111, 0b0000];
        for (i, &h) in hashes.iter().enumerate() {
            tree.insert(h, i);
        }
        assert_eq!(tree.size(), 5);

        assert_eq!(sorted(tree.find_within(0b0000, 0)), vec![0, 4]);
        assert_eq!(sorted(tree.find_within(0b0000, 1)), vec![0, 1, 4]);
        assert_eq!(sorted(tree.find_within(0b0000, 2)), vec![0, 1, 2, 4]);
        assert_eq!(sorted(tree.find_within(0b0000, 4)), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_duplicates_chain_on_zero_edge() {
        let mut tree = BkTree::new();
        for i in 0..50 {
            tree.insert(42, i);
        }
        assert_eq!(tree.size(), 50);
        assert_eq!(sorted(tree.find_within(42, 0)), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_matches_linear_scan() {
        let mut tree = BkTree::new();
        let hashes: Vec<u64> = (0..500u64)
            .map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left((i % 64) as u32))
            .collect();
        for (i, &h) in hashes.iter().enumerate() {
            tree.insert(h, i);
        }

        for radius in [0, 3, 10, 20, 32] {
            for &query in hashes.iter().step_by(37) {
                let expected: Vec<usize> = hashes
                    .iter()
                    .enumerate()
                    .filter(|(_, h)| hamming_distance(query, **h) <= radius)
                    .map(|(i, _)| i)
                    .collect();
                assert_eq!(sorted(tree.find_within(query, radius)), expected);
            }
        }
    }

    #[test]
    fn test_large_radius_returns_everything() {
        let mut tree = BkTree::new();
        for i in 0..10u64 {
            tree.insert(i, i as usize);
        }
        assert_eq!(sorted(tree.find_within(0, 64)), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_degenerate_chain_is_walked_iteratively() {
        // Identical hashes degrade the tree into one long path.
        let n = 5_000;
        let mut tree = BkTree::with_capacity(n);
        for i in 0..n {
            tree.insert(7, i);
        }
        tree.insert(0, n);

        assert_eq!(tree.size(), n + 1);
        assert_eq!(tree.find_within(7, 0).len(), n);
        assert_eq!(tree.find_within(0, 0), vec![n]);
        assert_eq!(tree.find_within(0, 3).len(), n + 1);
    }
}
