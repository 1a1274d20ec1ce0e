// Duplicate groups and the Keep/Remove decision
//
// Items are never mutated here: groups hold their own copies of the member
// records and point at the keeper by position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

/// One scanned image, as produced by the hashing collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub path: PathBuf,
    /// 64-bit perceptual fingerprint
    pub hash: u64,
    /// SHA-256 of the file contents, when it was computed
    pub file_hash: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub file_size: u64,
    pub mod_time: DateTime<Utc>,
    pub has_exif: bool,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateType {
    Exact,   // identical content hash
    Similar, // within the Hamming threshold
}

impl DuplicateType {
    pub fn as_str(self) -> &'static str {
        match self {
            DuplicateType::Exact => "exact",
            DuplicateType::Similar => "similar",
        }
    }

    /// Inverse of [`DuplicateType::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exact" => Some(DuplicateType::Exact),
            "similar" => Some(DuplicateType::Similar),
            _ => None,
        }
    }
}

/// A set of two or more near-identical images with one designated keeper.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub id: usize,
    pub group_type: DuplicateType,
    images: Vec<ImageInfo>,
    keep: usize,
}

impl DuplicateGroup {
    /// Build a group from its members, in their stable order, and select the
    /// keeper. Returns `None` for fewer than two members.
    pub fn new(id: usize, group_type: DuplicateType, images: Vec<ImageInfo>) -> Option<Self> {
        if images.len() < 2 {
            return None;
        }
        let keep = select_keep(&images)?;
        Some(Self {
            id,
            group_type,
            images,
            keep,
        })
    }

    pub fn images(&self) -> &[ImageInfo] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn keep(&self) -> &ImageInfo {
        &self.images[self.keep]
    }

    pub fn is_keep(&self, image: &ImageInfo) -> bool {
        self.keep().path == image.path
    }

    /// Every member except the keeper, in member order.
    pub fn remove(&self) -> impl Iterator<Item = &ImageInfo> {
        self.images
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.keep)
            .map(|(_, image)| image)
    }

    /// Bytes freed by deleting every Remove member.
    pub fn reclaimable_bytes(&self) -> u64 {
        self.remove().map(|image| image.file_size).sum()
    }
}

/// Quality order used to pick the keeper. `Ordering::Greater` means `a` is
/// the better image.
///
/// Higher score, then larger file, then newer modification time, then the
/// lexicographically smaller path.
pub fn quality_order(a: &ImageInfo, b: &ImageInfo) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| a.file_size.cmp(&b.file_size))
        .then_with(|| a.mod_time.cmp(&b.mod_time))
        .then_with(|| b.path.cmp(&a.path))
}

/// Position of the best image under [`quality_order`].
pub fn select_keep(images: &[ImageInfo]) -> Option<usize> {
    images
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| quality_order(a, b))
        .map(|(i, _)| i)
}

/// Turn index partitions over `images` into numbered groups.
///
/// Singleton partitions are dropped. Members keep ascending input order.
/// Groups are numbered from 1 in order of their smallest member path so the
/// numbering is stable for a given input set.
pub fn build_groups(
    images: &[ImageInfo],
    partitions: Vec<Vec<usize>>,
    group_type: DuplicateType,
) -> Vec<DuplicateGroup> {
    let mut partitions: Vec<Vec<usize>> = partitions
        .into_iter()
        .filter(|members| members.len() >= 2)
        .map(|mut members| {
            members.sort_unstable();
            members
        })
        .collect();

    partitions.sort_by_cached_key(|members| {
        members
            .iter()
            .map(|&i| images[i].path.clone())
            .min()
            .unwrap_or_default()
    });

    partitions
        .into_iter()
        .enumerate()
        .filter_map(|(n, members)| {
            let members = members.into_iter().map(|i| images[i].clone()).collect();
            DuplicateGroup::new(n + 1, group_type, members)
        })
        .collect()
}
