use crate::core::duplicate::ImageInfo;
use crate::core::exif::ExifService;
use chrono::{DateTime, Utc};
use image::{DynamicImage, GenericImageView, ImageReader};
use image_hasher::{HashAlg, HasherConfig};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Hash computation failed: {message}")]
    ComputationFailed { message: String },
}

/// Side length of the DCT hash grid; 8x8 gives a 64-bit fingerprint.
const HASH_SIDE: u32 = 8;

/// Service for computing fingerprints and metadata for images
#[derive(Debug, Clone, Default)]
pub struct HashService {
    exif_service: ExifService,
}

impl HashService {
    pub fn new() -> Self {
        Self {
            exif_service: ExifService::new(),
        }
    }

    /// Decode `path` and build its [`ImageInfo`]: perceptual hash, dimensions,
    /// detected format, size, modification time, EXIF presence and score.
    /// The SHA-256 content hash is only computed when asked for.
    pub fn hash_image(&self, path: &Path, with_content_hash: bool) -> Result<ImageInfo, HashError> {
        let metadata = fs::metadata(path)?;
        let mod_time: DateTime<Utc> = metadata.modified()?.into();

        let has_exif = self.exif_service.has_exif(path);

        let reader = ImageReader::open(path)?.with_guessed_format()?;
        let format = reader
            .format()
            .and_then(|f| f.extensions_str().first().copied())
            .map(str::to_string)
            .or_else(|| {
                path.extension()
                    .map(|ext| ext.to_string_lossy().to_lowercase())
            })
            .unwrap_or_else(|| "unknown".to_string());
        let img = reader.decode()?;

        let hash = self.compute_perceptual_hash(&img)?;
        let (width, height) = img.dimensions();

        let file_hash = if with_content_hash {
            Some(self.compute_content_hash(path)?)
        } else {
            None
        };

        let score = calculate_score(width, height, &format, has_exif);

        Ok(ImageInfo {
            path: path.to_path_buf(),
            hash,
            file_hash,
            width,
            height,
            format,
            file_size: metadata.len(),
            mod_time,
            has_exif,
            score,
        })
    }

    /// 64-bit DCT mean hash (pHash) of a decoded image
    pub fn compute_perceptual_hash(&self, img: &DynamicImage) -> Result<u64, HashError> {
        let hasher = HasherConfig::new()
            .hash_size(HASH_SIDE, HASH_SIDE)
            .hash_alg(HashAlg::Mean)
            .preproc_dct()
            .to_hasher();

        let image_hash = hasher.hash_image(img);
        let raw = image_hash.as_bytes();
        let bytes: [u8; 8] = raw.try_into().map_err(|_| HashError::ComputationFailed {
            message: format!("expected 8 hash bytes, got {}", raw.len()),
        })?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Compute SHA-256 content hash from original file
    /// This is used for exact duplicate detection
    pub fn compute_content_hash(&self, file_path: &Path) -> Result<String, HashError> {
        let file = File::open(file_path)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buffer = [0; 8192];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Quality multiplier for an image format. Lossless formats rank highest.
pub fn format_quality_multiplier(format: &str) -> f64 {
    match format {
        "png" | "tiff" | "tif" | "bmp" => 1.2,
        "webp" => 1.1,
        "jpeg" | "jpg" => 1.0,
        "gif" => 0.9,
        _ => 1.0,
    }
}

pub fn metadata_multiplier(has_exif: bool) -> f64 {
    if has_exif { 1.1 } else { 1.0 }
}

/// Resolution weighted by format and metadata multipliers.
pub fn calculate_score(width: u32, height: u32, format: &str, has_exif: bool) -> f64 {
    let resolution = f64::from(width) * f64::from(height);
    resolution * format_quality_multiplier(format) * metadata_multiplier(has_exif)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn gradient(path: &Path, width: u32, height: u32) -> PathBuf {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x * 255 / width.max(1)) as u8).wrapping_add((y % 7) as u8);
            Rgb([intensity, intensity, intensity])
        });
        img.save(path).unwrap();
        path.to_path_buf()
    }

    fn checkerboard(path: &Path, size: u32) -> PathBuf {
        let img = ImageBuffer::from_fn(size, size, |x, y| {
            if (x * 4 / size + y * 4 / size) % 2 == 0 {
                Rgb([255u8, 255, 255])
            } else {
                Rgb([0u8, 0, 0])
            }
        });
        img.save(path).unwrap();
        path.to_path_buf()
    }

    #[test]
    fn test_compute_content_hash() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, b"Hello, World!").unwrap();

        let hash_service = HashService::new();
        let hash = hash_service.compute_content_hash(&file_path).unwrap();
        let hash2 = hash_service.compute_content_hash(&file_path).unwrap();
        assert_eq!(hash, hash2);

        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_different_files_different_content_hash() {
        let temp_dir = TempDir::new().unwrap();
        let file1 = temp_dir.path().join("file1.txt");
        let file2 = temp_dir.path().join("file2.txt");
        fs::write(&file1, b"Content A").unwrap();
        fs::write(&file2, b"Content B").unwrap();

        let hash_service = HashService::new();
        assert_ne!(
            hash_service.compute_content_hash(&file1).unwrap(),
            hash_service.compute_content_hash(&file2).unwrap()
        );
    }

    #[test]
    fn test_hash_image_fills_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let path = gradient(&temp_dir.path().join("img.png"), 64, 48);

        let info = HashService::new().hash_image(&path, true).unwrap();
        assert_eq!(info.path, path);
        assert_eq!((info.width, info.height), (64, 48));
        assert_eq!(info.format, "png");
        assert!(!info.has_exif);
        assert_eq!(info.file_size, fs::metadata(&path).unwrap().len());
        assert_eq!(info.score, 64.0 * 48.0 * 1.2);
        assert_eq!(info.file_hash.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_content_hash_is_optional() {
        let temp_dir = TempDir::new().unwrap();
        let path = gradient(&temp_dir.path().join("img.png"), 32, 32);
        let info = HashService::new().hash_image(&path, false).unwrap();
        assert!(info.file_hash.is_none());
    }

    #[test]
    fn test_resized_copy_has_close_fingerprint() {
        let temp_dir = TempDir::new().unwrap();
        let big = checkerboard(&temp_dir.path().join("big.png"), 256);
        let small = checkerboard(&temp_dir.path().join("small.png"), 128);
        let other = gradient(&temp_dir.path().join("other.png"), 128, 128);

        let service = HashService::new();
        let big = service.hash_image(&big, false).unwrap();
        let small = service.hash_image(&small, false).unwrap();
        let other = service.hash_image(&other, false).unwrap();

        let near = crate::core::distance::hamming_distance(big.hash, small.hash);
        let far = crate::core::distance::hamming_distance(big.hash, other.hash);
        assert!(near <= 10, "resized copy drifted {} bits", near);
        assert!(far > near);
    }

    #[test]
    fn test_undecodable_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.jpg");
        fs::write(&path, b"definitely not a jpeg").unwrap();
        assert!(HashService::new().hash_image(&path, false).is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = HashService::new().hash_image(Path::new("/no/such/file.png"), false);
        assert!(matches!(result, Err(HashError::Io(_))));
    }

    #[test]
    fn test_score_multipliers() {
        assert_eq!(calculate_score(10, 10, "jpeg", false), 100.0);
        assert_eq!(calculate_score(10, 10, "png", false), 120.0);
        assert_eq!(calculate_score(10, 10, "gif", false), 90.0);
        assert!((calculate_score(10, 10, "webp", true) - 121.0).abs() < 1e-9);
        assert_eq!(calculate_score(10, 10, "xyz", false), 100.0);
    }
}
