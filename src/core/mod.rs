pub mod bktree;
pub mod distance;
pub mod duplicate;
pub mod exif;
pub mod fileutil;
pub mod hash;
pub mod matcher;
pub mod scanner;
pub mod union_find;
