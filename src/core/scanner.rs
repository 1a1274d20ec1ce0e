use crate::config::ScanConfig;
use crate::core::duplicate::ImageInfo;
use crate::core::hash::{HashError, HashService};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Invalid exclude pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hash computation error: {0}")]
    Hash(#[from] HashError),

    #[error("Timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub files_processed: usize,
    pub total_files: usize,
    pub current_file: String,
    pub phase: ScanPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    Discovery,
    Hashing,
    Complete,
}

/// Result of hashing one discovered file.
#[derive(Debug)]
pub struct ItemOutcome {
    pub path: PathBuf,
    pub result: Result<ImageInfo, ScanError>,
}

/// What a finished scan produced.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Successfully hashed images, sorted by path.
    pub images: Vec<ImageInfo>,
    /// Candidate files found during discovery.
    pub discovered: usize,
    /// Files dropped because they failed to decode, hash or finish in time.
    pub failed: usize,
}

pub struct ScannerService {
    config: ScanConfig,
    progress_sender: Option<mpsc::UnboundedSender<ScanProgress>>,
    cancellation_token: Arc<AtomicBool>,
    hash_service: HashService,
}

impl ScannerService {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            progress_sender: None,
            cancellation_token: Arc::new(AtomicBool::new(false)),
            hash_service: HashService::new(),
        }
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<ScanProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel_scan(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_token.load(Ordering::Relaxed)
    }

    /// Discover and hash every supported image under `roots`.
    ///
    /// Files that fail to decode or exceed the per-item timeout are logged and
    /// dropped; only invalid roots, bad patterns and cancellation are errors.
    pub async fn scan_paths(&self, roots: &[PathBuf]) -> Result<ScanOutcome, ScanError> {
        if self.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        for root in roots {
            if !root.exists() {
                return Err(ScanError::InvalidPath {
                    path: root.to_string_lossy().to_string(),
                });
            }
            if !root.is_dir() {
                return Err(ScanError::InvalidPath {
                    path: format!("{} is not a directory", root.to_string_lossy()),
                });
            }
        }

        let exclude_patterns = self
            .config
            .exclude_patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| ScanError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.send_progress(ScanProgress {
            files_processed: 0,
            total_files: 0,
            current_file: "Discovering files...".to_string(),
            phase: ScanPhase::Discovery,
        });

        let files = self.discover_files(roots, &exclude_patterns)?;
        let total_files = files.len();
        log::info!("Discovered {} candidate images", total_files);

        if self.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        self.send_progress(ScanProgress {
            files_processed: 0,
            total_files,
            current_file: "Hashing images...".to_string(),
            phase: ScanPhase::Hashing,
        });

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_hashing(
            files,
            self.hash_service.clone(),
            self.config.clone(),
            self.cancellation_token.clone(),
            outcome_tx,
        ));

        let mut outcome =
            collect_outcomes(outcome_rx, total_files, self.progress_sender.as_ref()).await;
        outcome.discovered = total_files;

        dispatcher
            .await
            .map_err(|e| ScanError::Worker(e.to_string()))?;

        if self.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        self.send_progress(ScanProgress {
            files_processed: total_files,
            total_files,
            current_file: "Scan complete".to_string(),
            phase: ScanPhase::Complete,
        });

        log::info!(
            "Scan complete: {} hashed, {} skipped",
            outcome.images.len(),
            outcome.failed
        );
        Ok(outcome)
    }

    fn discover_files(
        &self,
        roots: &[PathBuf],
        exclude_patterns: &[Pattern],
    ) -> Result<Vec<PathBuf>, ScanError> {
        let mut seen = HashSet::new();
        let mut discovered_files = Vec::new();

        for root in roots {
            for entry in WalkDir::new(root)
                .follow_links(self.config.follow_links)
                .into_iter()
                .filter_map(|e| match e {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        log::warn!("Skipping unreadable entry: {}", err);
                        None
                    }
                })
            {
                if self.is_cancelled() {
                    return Err(ScanError::Cancelled);
                }

                let path = entry.path();
                if !path.is_file() {
                    continue;
                }

                let path_str = path.to_string_lossy();
                if exclude_patterns
                    .iter()
                    .any(|pattern| pattern.matches(&path_str))
                {
                    continue;
                }

                if is_supported_image(path, &self.config.supported_formats)
                    && seen.insert(path.to_path_buf())
                {
                    discovered_files.push(path.to_path_buf());
                }
            }
        }

        Ok(discovered_files)
    }

    fn send_progress(&self, progress: ScanProgress) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(progress);
        }
    }
}

impl Default for ScannerService {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

/// Hash `files` with at most `config.workers` in flight, sending one outcome
/// per started file. Stops starting new work once cancelled.
async fn dispatch_hashing(
    files: Vec<PathBuf>,
    hash_service: HashService,
    config: ScanConfig,
    cancellation_token: Arc<AtomicBool>,
    outcome_tx: mpsc::UnboundedSender<ItemOutcome>,
) {
    let permits = Arc::new(Semaphore::new(config.workers.max(1)));
    let timeout = config.timeout;

    for path in files {
        if cancellation_token.load(Ordering::Relaxed) {
            break;
        }
        // The semaphore is never closed.
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };

        let hash_service = hash_service.clone();
        let outcome_tx = outcome_tx.clone();
        let with_content_hash = config.content_hash;

        tokio::spawn(async move {
            let job_path = path.clone();
            let result = run_hash_job(permit, timeout, move || {
                hash_service.hash_image(&job_path, with_content_hash)
            })
            .await;
            let _ = outcome_tx.send(ItemOutcome { path, result });
        });
    }
}

/// Run one blocking hash job, giving up on it after `timeout`.
///
/// The worker permit moves into the blocking closure, so a timed-out job
/// still occupies its slot until the decode actually returns. The worker
/// limit therefore bounds running decodes, not just pending results.
async fn run_hash_job<F>(
    permit: OwnedSemaphorePermit,
    timeout: Duration,
    job: F,
) -> Result<ImageInfo, ScanError>
where
    F: FnOnce() -> Result<ImageInfo, HashError> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        job()
    });

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(hashed)) => hashed.map_err(ScanError::from),
        Ok(Err(join_error)) => Err(ScanError::Worker(join_error.to_string())),
        Err(_) => Err(ScanError::Timeout {
            seconds: timeout.as_secs(),
        }),
    }
}

/// Drain `outcomes` until every sender is gone, keeping successes and
/// counting failures. Emits one progress event per outcome.
///
/// Images come back sorted by path so the result does not depend on which
/// worker finished first.
pub async fn collect_outcomes(
    mut outcomes: mpsc::UnboundedReceiver<ItemOutcome>,
    total_files: usize,
    progress: Option<&mpsc::UnboundedSender<ScanProgress>>,
) -> ScanOutcome {
    let mut collected = ScanOutcome {
        discovered: total_files,
        ..ScanOutcome::default()
    };
    let mut files_processed = 0;

    while let Some(ItemOutcome { path, result }) = outcomes.recv().await {
        files_processed += 1;
        match result {
            Ok(image) => collected.images.push(image),
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                collected.failed += 1;
            }
        }

        if let Some(sender) = progress {
            let _ = sender.send(ScanProgress {
                files_processed,
                total_files,
                current_file: path.to_string_lossy().to_string(),
                phase: ScanPhase::Hashing,
            });
        }
    }

    collected.images.sort_by(|a, b| a.path.cmp(&b.path));
    collected
}

/// Case-insensitive extension check against `formats`.
pub fn is_supported_image(path: &Path, formats: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| formats.iter().any(|f| f.eq_ignore_ascii_case(&ext)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::duplicate::tests::image;
    use image::{ImageBuffer, Rgb};
    use std::fs;
    use tempfile::TempDir;

    fn create_test_image(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x + y) % 256) as u8;
            Rgb([intensity, intensity, intensity])
        });
        img.save(path).unwrap();
    }

    fn scanner() -> ScannerService {
        ScannerService::new(ScanConfig {
            workers: 2,
            ..ScanConfig::default()
        })
    }

    #[tokio::test]
    async fn test_scan_hashes_supported_images() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested");
        fs::create_dir(&nested).unwrap();

        create_test_image(&temp_dir.path().join("b.png"), 40, 40);
        create_test_image(&temp_dir.path().join("a.jpg"), 40, 30);
        create_test_image(&nested.join("c.PNG"), 20, 20);
        fs::write(temp_dir.path().join("notes.txt"), b"not an image").unwrap();

        let outcome = scanner()
            .scan_paths(&[temp_dir.path().to_path_buf()])
            .await
            .unwrap();

        assert_eq!(outcome.discovered, 3);
        assert_eq!(outcome.failed, 0);
        let names: Vec<_> = outcome
            .images
            .iter()
            .map(|i| i.path.strip_prefix(temp_dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.jpg"),
                PathBuf::from("b.png"),
                PathBuf::from("nested/c.PNG")
            ]
        );
    }

    #[tokio::test]
    async fn test_broken_file_is_skipped_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        create_test_image(&temp_dir.path().join("good.png"), 32, 32);
        fs::write(temp_dir.path().join("broken.jpg"), b"garbage bytes").unwrap();

        let outcome = scanner()
            .scan_paths(&[temp_dir.path().to_path_buf()])
            .await
            .unwrap();

        assert_eq!(outcome.discovered, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.images.len(), 1);
        assert!(outcome.images[0].path.ends_with("good.png"));
    }

    #[tokio::test]
    async fn test_progress_phases() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..4 {
            create_test_image(&temp_dir.path().join(format!("test_{}.png", i)), 24, 24);
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let scanner = scanner().with_progress_sender(progress_tx);
        scanner
            .scan_paths(&[temp_dir.path().to_path_buf()])
            .await
            .unwrap();
        drop(scanner);

        let mut events = Vec::new();
        while let Some(progress) = progress_rx.recv().await {
            events.push(progress);
        }

        let phases: HashSet<_> = events.iter().map(|e| e.phase.clone()).collect();
        assert!(phases.contains(&ScanPhase::Discovery));
        assert!(phases.contains(&ScanPhase::Hashing));

        let last = events.last().unwrap();
        assert_eq!(last.phase, ScanPhase::Complete);
        assert_eq!(last.files_processed, 4);
        assert_eq!(last.total_files, 4);
    }

    #[tokio::test]
    async fn test_scan_with_exclude_patterns() {
        let temp_dir = TempDir::new().unwrap();
        create_test_image(&temp_dir.path().join("included.png"), 16, 16);
        create_test_image(&temp_dir.path().join("excluded.tmp.png"), 16, 16);

        let scanner = ScannerService::new(ScanConfig {
            exclude_patterns: vec!["*.tmp.*".to_string()],
            ..ScanConfig::default()
        });
        let outcome = scanner
            .scan_paths(&[temp_dir.path().to_path_buf()])
            .await
            .unwrap();

        assert_eq!(outcome.images.len(), 1);
        assert!(outcome.images[0].path.ends_with("included.png"));
    }

    #[tokio::test]
    async fn test_scan_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let outcome = scanner()
            .scan_paths(&[temp_dir.path().to_path_buf()])
            .await
            .unwrap();
        assert!(outcome.images.is_empty());
        assert_eq!(outcome.discovered, 0);
    }

    #[tokio::test]
    async fn test_invalid_roots() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.png");
        create_test_image(&file, 8, 8);

        let missing = scanner()
            .scan_paths(&[temp_dir.path().join("missing")])
            .await;
        assert!(matches!(missing, Err(ScanError::InvalidPath { .. })));

        let not_dir = scanner().scan_paths(&[file]).await;
        assert!(matches!(not_dir, Err(ScanError::InvalidPath { .. })));
    }

    #[tokio::test]
    async fn test_invalid_exclude_pattern() {
        let temp_dir = TempDir::new().unwrap();
        let scanner = ScannerService::new(ScanConfig {
            exclude_patterns: vec!["[".to_string()],
            ..ScanConfig::default()
        });
        let result = scanner.scan_paths(&[temp_dir.path().to_path_buf()]).await;
        assert!(matches!(result, Err(ScanError::InvalidPattern { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let temp_dir = TempDir::new().unwrap();
        create_test_image(&temp_dir.path().join("a.png"), 16, 16);

        let scanner = scanner();
        scanner.cancel_scan();
        assert!(scanner.get_cancellation_token().load(Ordering::Relaxed));

        let result = scanner.scan_paths(&[temp_dir.path().to_path_buf()]).await;
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[tokio::test]
    async fn test_collect_outcomes_in_isolation() {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        outcome_tx
            .send(ItemOutcome {
                path: PathBuf::from("/z.jpg"),
                result: Ok(image("/z.jpg", 1)),
            })
            .unwrap();
        outcome_tx
            .send(ItemOutcome {
                path: PathBuf::from("/slow.jpg"),
                result: Err(ScanError::Timeout { seconds: 30 }),
            })
            .unwrap();
        outcome_tx
            .send(ItemOutcome {
                path: PathBuf::from("/a.jpg"),
                result: Ok(image("/a.jpg", 2)),
            })
            .unwrap();
        drop(outcome_tx);

        let outcome = collect_outcomes(outcome_rx, 3, Some(&progress_tx)).await;
        drop(progress_tx);

        assert_eq!(outcome.discovered, 3);
        assert_eq!(outcome.failed, 1);
        let paths: Vec<_> = outcome.images.iter().map(|i| i.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/a.jpg"), PathBuf::from("/z.jpg")]);

        let mut processed = Vec::new();
        while let Some(progress) = progress_rx.recv().await {
            processed.push(progress.files_processed);
        }
        assert_eq!(processed, vec![1, 2, 3]);
    }

    #[test]
    fn test_supported_format_detection() {
        let formats = ScanConfig::default().supported_formats;
        assert!(is_supported_image(Path::new("a.jpg"), &formats));
        assert!(is_supported_image(Path::new("a.JPEG"), &formats));
        assert!(is_supported_image(Path::new("dir/a.TiF"), &formats));
        assert!(!is_supported_image(Path::new("a.txt"), &formats));
        assert!(!is_supported_image(Path::new("noext"), &formats));
    }

    #[tokio::test]
    async fn test_timed_out_job_keeps_its_worker_slot() {
        let permits = Arc::new(Semaphore::new(1));
        let permit = permits.clone().acquire_owned().await.unwrap();

        let result = run_hash_job(permit, Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(400));
            Ok(image("/slow.jpg", 0))
        })
        .await;

        assert!(matches!(result, Err(ScanError::Timeout { .. })));
        // The decode is still running, so the slot is still taken.
        assert_eq!(permits.available_permits(), 0);

        let reacquired =
            tokio::time::timeout(Duration::from_secs(5), permits.clone().acquire_owned()).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_finished_job_releases_its_worker_slot() {
        let permits = Arc::new(Semaphore::new(1));
        let permit = permits.clone().acquire_owned().await.unwrap();

        let result = run_hash_job(permit, Duration::from_secs(5), || Ok(image("/fast.jpg", 7))).await;

        assert_eq!(result.unwrap().hash, 7);
        assert_eq!(permits.available_permits(), 1);
    }
}
