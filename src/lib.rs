//! Perceptual duplicate image finder.
//!
//! Images are fingerprinted with a 64-bit DCT hash, clustered by Hamming
//! distance through a BK-tree and a disjoint-set forest (or by SHA-256 in
//! exact mode), and each cluster names one image to keep.

pub mod commands;
pub mod config;
pub mod core;
pub mod database;
pub mod history;
pub mod server;

pub use crate::config::{AppConfig, ScanConfig, ServeConfig};
pub use crate::core::duplicate::{DuplicateGroup, DuplicateType, ImageInfo};
pub use crate::core::matcher::{ExactMatcher, MatchMode, Matcher, PerceptualMatcher};
pub use crate::database::Storage;
