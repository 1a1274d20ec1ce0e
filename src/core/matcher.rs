use crate::core::bktree::BkTree;
use crate::core::duplicate::{build_groups, DuplicateGroup, DuplicateType, ImageInfo};
use crate::core::union_find::DisjointSet;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hamming threshold used when the requested one is outside `0..=64`.
pub const DEFAULT_THRESHOLD: u32 = 10;

/// Largest meaningful threshold for 64-bit fingerprints.
pub const MAX_THRESHOLD: u32 = 64;

/// Clamp an arbitrary caller threshold into the valid range.
///
/// Anything outside `0..=64`, negatives included, falls back to
/// [`DEFAULT_THRESHOLD`] rather than being rejected.
pub fn clamp_threshold(threshold: i64) -> u32 {
    match u32::try_from(threshold) {
        Ok(t) if t <= MAX_THRESHOLD => t,
        _ => DEFAULT_THRESHOLD,
    }
}

/// A duplicate detection strategy.
pub trait Matcher: Send + Sync {
    /// Partition `images` into duplicate groups of two or more, each with its
    /// keeper selected, ordered by group ID.
    fn find_groups(&self, images: &[ImageInfo]) -> Vec<DuplicateGroup>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Perceptual,
    Exact,
}

impl MatchMode {
    pub fn matcher(self, threshold: i64) -> Box<dyn Matcher> {
        match self {
            MatchMode::Perceptual => Box::new(PerceptualMatcher::new(threshold)),
            MatchMode::Exact => Box::new(ExactMatcher::new()),
        }
    }
}

/// Groups images whose fingerprints are connected by chains of pairs at most
/// `threshold` bits apart.
#[derive(Debug, Clone)]
pub struct PerceptualMatcher {
    threshold: u32,
}

impl PerceptualMatcher {
    pub fn new(threshold: i64) -> Self {
        Self {
            threshold: clamp_threshold(threshold),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl Default for PerceptualMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Matcher for PerceptualMatcher {
    fn find_groups(&self, images: &[ImageInfo]) -> Vec<DuplicateGroup> {
        if images.len() < 2 {
            return Vec::new();
        }

        let mut forest = DisjointSet::new(images.len());
        let mut tree = BkTree::with_capacity(images.len());

        // Query before insert: each pair is seen once and nothing matches itself.
        for (i, image) in images.iter().enumerate() {
            for j in tree.find_within(image.hash, self.threshold) {
                forest.union(i, j);
            }
            tree.insert(image.hash, i);
        }

        let groups = build_groups(images, forest.components(), DuplicateType::Similar);
        log::debug!(
            "perceptual matcher: {} images, threshold {}, {} groups",
            images.len(),
            self.threshold,
            groups.len()
        );
        groups
    }
}

/// Groups images with identical content hashes. Images without a content hash
/// never match anything.
#[derive(Debug, Clone, Default)]
pub struct ExactMatcher;

impl ExactMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Matcher for ExactMatcher {
    fn find_groups(&self, images: &[ImageInfo]) -> Vec<DuplicateGroup> {
        if images.len() < 2 {
            return Vec::new();
        }

        let mut buckets: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, image) in images.iter().enumerate() {
            match image.file_hash.as_deref() {
                Some(hash) if !hash.is_empty() => buckets.entry(hash).or_default().push(i),
                _ => {}
            }
        }

        let groups = build_groups(
            images,
            buckets.into_values().collect(),
            DuplicateType::Exact,
        );
        log::debug!(
            "exact matcher: {} images, {} groups",
            images.len(),
            groups.len()
        );
        groups
    }
}
