use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of `scan_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: i64,
    pub folder: String,
    pub scanned_at: DateTime<Utc>,
    pub total_images: usize,
    pub total_groups: usize,
    pub total_duplicates: usize,
}

/// Raw `images` row before timestamp parsing.
#[derive(Debug)]
pub(crate) struct ImageRow {
    pub path: String,
    pub hash: i64,
    pub file_hash: Option<String>,
    pub width: i64,
    pub height: i64,
    pub format: String,
    pub file_size: i64,
    pub mod_time: String,
    pub has_exif: bool,
    pub score: f64,
    pub group_id: i64,
    pub group_type: String,
}
