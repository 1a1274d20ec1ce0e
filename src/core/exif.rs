use exif::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExifError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("EXIF parsing error: {0}")]
    Parse(#[from] exif::Error),
}

/// Service for sniffing EXIF metadata in image files
#[derive(Debug, Clone, Default)]
pub struct ExifService;

impl ExifService {
    pub fn new() -> Self {
        Self
    }

    /// Parse the EXIF block of `file_path`, if the container carries one.
    pub fn read(&self, file_path: &Path) -> Result<Option<exif::Exif>, ExifError> {
        let file = File::open(file_path)?;
        let mut buf_reader = BufReader::new(file);

        match Reader::new().read_from_container(&mut buf_reader) {
            Ok(exif) => Ok(Some(exif)),
            Err(exif::Error::NotFound(_)) => Ok(None),
            Err(e) => Err(ExifError::Parse(e)),
        }
    }

    /// Whether the file carries at least one EXIF field. Unreadable or
    /// malformed metadata counts as absent.
    pub fn has_exif(&self, file_path: &Path) -> bool {
        match self.read(file_path) {
            Ok(Some(exif)) => exif.fields().next().is_some(),
            Ok(None) => false,
            Err(e) => {
                log::debug!("No usable EXIF in {}: {}", file_path.display(), e);
                false
            }
        }
    }
}
