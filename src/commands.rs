// User-facing command implementations. Each `run_*` prints; the helpers they
// call do the work and return plain values.

use crate::config::{ScanConfig, ServeConfig};
use crate::core::duplicate::{DuplicateGroup, ImageInfo};
use crate::core::fileutil;
use crate::core::matcher::MatchMode;
use crate::core::scanner::{ScanPhase, ScanProgress, ScannerService};
use crate::database::Storage;
use crate::server::{self, AppState, ShutdownReason};
use crate::history::{CullAction, CullHistory, CullRecord, CulledFile, HistoryEntry};
use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// scan

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub folder: PathBuf,
    pub mode: MatchMode,
    pub threshold: i64,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSummary {
    pub total_images: usize,
    pub groups: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

/// Scan, store, cluster and record one folder.
pub async fn execute_scan(
    storage: &mut Storage,
    request: &ScanRequest,
    progress: Option<mpsc::UnboundedSender<ScanProgress>>,
) -> Result<ScanSummary> {
    let mut scan_config = request.scan.clone();
    if request.mode == MatchMode::Exact {
        scan_config.content_hash = true;
    }

    let mut scanner = ScannerService::new(scan_config);
    if let Some(sender) = progress {
        scanner = scanner.with_progress_sender(sender);
    }
    let outcome = scanner
        .scan_paths(std::slice::from_ref(&request.folder))
        .await
        .context("scan failed")?;

    let mut summary = ScanSummary {
        total_images: outcome.images.len(),
        skipped: outcome.failed,
        ..ScanSummary::default()
    };
    if outcome.images.is_empty() {
        return Ok(summary);
    }

    storage
        .save_images(&outcome.images)
        .context("failed to save images")?;

    let groups = request
        .mode
        .matcher(request.threshold)
        .find_groups(&outcome.images);
    storage
        .update_groups(&groups)
        .context("failed to update groups")?;

    summary.groups = groups.len();
    summary.duplicates = groups.iter().map(|g| g.len() - 1).sum();
    storage.record_scan(
        &request.folder.to_string_lossy(),
        summary.total_images,
        summary.groups,
        summary.duplicates,
    )?;

    Ok(summary)
}

pub async fn run_scan(storage: &mut Storage, mut request: ScanRequest) -> Result<()> {
    request.folder = fs::canonicalize(&request.folder)
        .with_context(|| format!("folder not found: {}", request.folder.display()))?;
    if !request.folder.is_dir() {
        bail!("not a directory: {}", request.folder.display());
    }

    println!("▶ Scanning: {}", request.folder.display());
    match request.mode {
        MatchMode::Perceptual => println!(
            "  Threshold: {} (Hamming distance)",
            crate::core::matcher::clamp_threshold(request.threshold)
        ),
        MatchMode::Exact => println!("  Mode: exact (SHA-256)"),
    }
    println!("  Workers: {}\n", request.scan.workers);

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let bar = progress_bar()?;
    let renderer = tokio::spawn(render_progress(progress_rx, bar.clone()));

    let result = execute_scan(storage, &request, Some(progress_tx)).await;
    let _ = renderer.await;
    bar.finish_and_clear();
    let summary = result?;

    println!("Scanned: {} images", summary.total_images);
    if summary.skipped > 0 {
        println!("Skipped: {} unreadable or slow files", summary.skipped);
    }
    if summary.total_images == 0 {
        println!("No images found.");
        return Ok(());
    }

    println!();
    println!("=== Scan Complete ===");
    println!("Total images:     {}", summary.total_images);
    println!("Duplicate groups: {}", summary.groups);
    println!("Duplicates found: {}", summary.duplicates);

    if summary.groups > 0 {
        println!();
        println!("Run 'imgdedup list' to see duplicate groups");
        println!("Run 'imgdedup clean --dry-run' to preview deletions");
    }
    Ok(())
}

fn progress_bar() -> Result<ProgressBar> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    bar.set_message("Discovering images…");
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

async fn render_progress(mut progress: mpsc::UnboundedReceiver<ScanProgress>, bar: ProgressBar) {
    let hashing_style = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .map(|style| style.progress_chars("=> "));

    while let Some(update) = progress.recv().await {
        match update.phase {
            ScanPhase::Discovery => bar.set_message(update.current_file),
            ScanPhase::Hashing => {
                if bar.length() != Some(update.total_files as u64) {
                    if let Ok(style) = &hashing_style {
                        bar.set_style(style.clone());
                    }
                    bar.set_length(update.total_files as u64);
                }
                bar.set_position(update.files_processed as u64);
                bar.set_message(shorten_path(&update.current_file, 50));
            }
            ScanPhase::Complete => bar.finish_and_clear(),
        }
    }
}

// ---------------------------------------------------------------------------
// list

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub json: bool,
    pub verbose: bool,
    pub summary: bool,
    /// 0 shows every group.
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            json: false,
            verbose: false,
            summary: false,
            limit: 10,
            offset: 0,
        }
    }
}

/// JSON shape of one group, shared by `list --json` and the web API.
#[derive(Debug, Serialize)]
pub struct GroupView<'a> {
    pub id: usize,
    pub group_type: crate::core::duplicate::DuplicateType,
    pub keep: &'a ImageInfo,
    pub remove: Vec<&'a ImageInfo>,
    pub reclaimable_bytes: u64,
}

impl<'a> From<&'a DuplicateGroup> for GroupView<'a> {
    fn from(group: &'a DuplicateGroup) -> Self {
        Self {
            id: group.id,
            group_type: group.group_type,
            keep: group.keep(),
            remove: group.remove().collect(),
            reclaimable_bytes: group.reclaimable_bytes(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ListView<'a> {
    total_groups: usize,
    total_duplicates: usize,
    reclaimable_bytes: u64,
    offset: usize,
    groups: Vec<GroupView<'a>>,
}

/// Window of `total` items starting at `offset`, `limit` long (0 = no limit).
pub fn page_range(total: usize, offset: usize, limit: usize) -> Range<usize> {
    let start = offset.min(total);
    let end = if limit == 0 {
        total
    } else {
        start.saturating_add(limit).min(total)
    };
    start..end
}

pub fn run_list(storage: &Storage, options: &ListOptions) -> Result<()> {
    let groups = storage
        .get_duplicate_groups()
        .context("failed to get groups")?;

    let total_duplicates: usize = groups.iter().map(|g| g.len() - 1).sum();
    let reclaimable: u64 = groups.iter().map(DuplicateGroup::reclaimable_bytes).sum();
    let page = page_range(groups.len(), options.offset, options.limit);

    if options.json {
        let view = ListView {
            total_groups: groups.len(),
            total_duplicates,
            reclaimable_bytes: reclaimable,
            offset: page.start,
            groups: groups[page.clone()].iter().map(GroupView::from).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    if groups.is_empty() {
        println!("No duplicate groups found.");
        println!("Run 'imgdedup scan <folder>' to scan for duplicates.");
        return Ok(());
    }

    println!(
        "Found {} duplicate groups ({} duplicates, {} reclaimable)\n",
        groups.len(),
        total_duplicates,
        format_size(reclaimable)
    );

    let shown = &groups[page.clone()];
    if shown.is_empty() {
        println!(
            "No groups in range (offset {} exceeds total {})",
            options.offset,
            groups.len()
        );
    } else if options.summary {
        print!("{}", render_summary_table(shown));
    } else {
        for group in shown {
            print!("{}", render_group(group, options.verbose));
        }
    }

    if !shown.is_empty() {
        println!(
            "Showing groups {}-{} of {}",
            page.start + 1,
            page.end,
            groups.len()
        );
        if page.end < groups.len() {
            let limit_arg = if options.limit > 0 {
                format!(" -n {}", options.limit)
            } else {
                String::new()
            };
            println!("Next page: imgdedup list{} --offset {}", limit_arg, page.end);
        }
    }

    println!();
    println!("Run 'imgdedup clean --dry-run' to preview deletions");
    println!("Run 'imgdedup clean' to remove duplicates");
    Ok(())
}

pub fn render_group(group: &DuplicateGroup, verbose: bool) -> String {
    let mut out = format!("Group #{} ({} images)\n{}\n", group.id, group.len(), "-".repeat(60));

    for image in group.images() {
        let marker = if group.is_keep(image) { "✓" } else { "✗" };
        let path = image.path.to_string_lossy();
        if verbose {
            out.push_str(&format!("  {} {}\n", marker, path));
            out.push_str(&format!(
                "      Resolution: {}x{}  Format: {}  Size: {}\n",
                image.width,
                image.height,
                image.format.to_uppercase(),
                format_size(image.file_size)
            ));
            out.push_str(&format!("      Score: {:.0}\n", image.score));
        } else {
            out.push_str(&format!(
                "  {} {:<40}  {}x{}  {:<4}  {:>8}  Score: {:.0}\n",
                marker,
                shorten_path(&path, 40),
                image.width,
                image.height,
                image.format.to_uppercase(),
                format_size(image.file_size),
                image.score
            ));
        }
    }
    out.push('\n');
    out
}

pub fn render_summary_table(groups: &[DuplicateGroup]) -> String {
    let mut out = format!(
        "{:<8}  {:<8}  {:<12}  {}\n{}\n",
        "Group",
        "Images",
        "Reclaimable",
        "Keep (best quality)",
        "-".repeat(70)
    );
    for group in groups {
        let keep_name = group
            .keep()
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let keep_name = if keep_name.chars().count() > 35 {
            format!("{}...", keep_name.chars().take(32).collect::<String>())
        } else {
            keep_name
        };
        out.push_str(&format!(
            "#{:<7}  {:<8}  {:<12}  {}\n",
            group.id,
            group.len(),
            format_size(group.reclaimable_bytes()),
            keep_name
        ));
    }
    out.push('\n');
    out
}

// ---------------------------------------------------------------------------
// clean

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanAction {
    Trash,
    Delete,
    MoveTo(PathBuf),
}

impl CleanAction {
    fn describe(&self) -> String {
        match self {
            CleanAction::Trash => "move to trash".to_string(),
            CleanAction::Delete => "permanently delete".to_string(),
            CleanAction::MoveTo(dir) => format!("move to {}", dir.display()),
        }
    }

    fn history_action(&self) -> CullAction {
        match self {
            CleanAction::Trash => CullAction::Trashed,
            CleanAction::Delete => CullAction::Deleted,
            CleanAction::MoveTo(_) => CullAction::Moved,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub dry_run: bool,
    pub action: CleanAction,
    pub yes: bool,
    /// Empty selects every group.
    pub group_ids: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct CleanReport {
    pub processed: usize,
    pub reclaimed_bytes: u64,
    pub records: Vec<CullRecord>,
    /// Files the action could not be applied to, with the reason.
    pub failures: Vec<(PathBuf, String)>,
}

/// Groups whose ID is in `ids`, or all of them when `ids` is empty.
pub fn select_groups(groups: Vec<DuplicateGroup>, ids: &[usize]) -> Vec<DuplicateGroup> {
    if ids.is_empty() {
        return groups;
    }
    let wanted: HashSet<usize> = ids.iter().copied().collect();
    groups
        .into_iter()
        .filter(|group| wanted.contains(&group.id))
        .collect()
}

/// Remove members of `group` that are still on disk.
pub fn pending_removals(group: &DuplicateGroup) -> Vec<&ImageInfo> {
    group.remove().filter(|image| image.path.exists()).collect()
}

/// Apply `action` to the pending Remove members of every group. Successful
/// files are dropped from the store; failures are collected in the report.
/// Keep members are never touched.
pub fn apply_clean(
    storage: &Storage,
    groups: &[DuplicateGroup],
    action: &CleanAction,
) -> CleanReport {
    apply_clean_where(storage, groups, action, |_| true)
}

/// Like [`apply_clean`], restricted to the Remove members `selected` accepts.
pub fn apply_clean_where(
    storage: &Storage,
    groups: &[DuplicateGroup],
    action: &CleanAction,
    selected: impl Fn(&ImageInfo) -> bool,
) -> CleanReport {
    let mut report = CleanReport::default();

    for group in groups {
        let mut culled = Vec::new();
        for image in pending_removals(group).into_iter().filter(|image| selected(image)) {
            let result = match action {
                CleanAction::Trash => fileutil::move_to_trash(&image.path).map(Some),
                CleanAction::Delete => fs::remove_file(&image.path)
                    .map(|_| None)
                    .map_err(fileutil::FileOpError::from),
                CleanAction::MoveTo(dir) => fileutil::move_file(&image.path, dir).map(Some),
            };

            match result {
                Ok(to) => {
                    report.processed += 1;
                    report.reclaimed_bytes += image.file_size;
                    if let Err(e) = storage.delete_image(&image.path) {
                        log::warn!("Could not drop {} from the database: {}", image.path.display(), e);
                    }
                    culled.push(CulledFile {
                        from: image.path.clone(),
                        to,
                    });
                }
                Err(e) => report.failures.push((image.path.clone(), e.to_string())),
            }
        }

        if !culled.is_empty() {
            report.records.push(CullRecord {
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                group_id: group.id,
                retained: group.keep().path.clone(),
                culled,
                action: action.history_action(),
            });
        }
    }

    report
}

pub fn run_clean(storage: &Storage, history: &CullHistory, options: &CleanOptions) -> Result<()> {
    let groups = storage
        .get_duplicate_groups()
        .context("failed to get groups")?;
    if groups.is_empty() {
        println!("No duplicate groups found.");
        return Ok(());
    }

    let groups = select_groups(groups, &options.group_ids);
    if groups.is_empty() {
        println!("No matching groups found for IDs: {:?}", options.group_ids);
        println!("Run 'imgdedup list' to see available group IDs.");
        return Ok(());
    }
    if !options.group_ids.is_empty() {
        println!(
            "Processing {} selected group(s): {:?}\n",
            groups.len(),
            options.group_ids
        );
    }

    let to_remove: Vec<&ImageInfo> = groups.iter().flat_map(pending_removals).collect();
    if to_remove.is_empty() {
        println!("No files to remove (files may have been already deleted).");
        return Ok(());
    }
    let total_size: u64 = to_remove.iter().map(|image| image.file_size).sum();
    let action = options.action.describe();

    println!(
        "Will {} {} files ({})\n",
        action,
        to_remove.len(),
        format_size(total_size)
    );

    if options.dry_run {
        println!("Files to be removed:");
        for image in &to_remove {
            println!("  {}", image.path.display());
        }
        println!();
        println!("(Dry run - no files were modified)");
        println!("Run without --dry-run to actually remove files.");
        return Ok(());
    }

    if !options.yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Are you sure you want to {} {} files?",
                action,
                to_remove.len()
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    if let CleanAction::MoveTo(dir) = &options.action {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }

    let report = apply_clean(storage, &groups, &options.action);
    history
        .append(&report.records)
        .context("failed to record cull history")?;

    println!();
    match &options.action {
        CleanAction::MoveTo(dir) => {
            println!("Moved {} files to {}", report.processed, dir.display())
        }
        CleanAction::Delete => println!("Permanently deleted {} files", report.processed),
        CleanAction::Trash => println!("Moved {} files to trash", report.processed),
    }
    for (path, reason) in &report.failures {
        eprintln!("Failed to process {}: {}", path.display(), reason);
    }
    if !report.failures.is_empty() {
        println!("Failed: {} files", report.failures.len());
    }
    println!("Space reclaimed: {}", format_size(report.reclaimed_bytes));
    if !report.records.is_empty() {
        println!("Recorded cull history in {}", history.path().display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// history

pub fn run_scan_history(storage: &Storage, limit: usize) -> Result<()> {
    let scans = storage.scan_history(limit)?;
    if scans.is_empty() {
        println!("No scans recorded yet.");
        return Ok(());
    }

    println!(
        "{:<20}  {:>8}  {:>7}  {:>10}  {}",
        "Scanned at", "Images", "Groups", "Duplicates", "Folder"
    );
    println!("{}", "-".repeat(80));
    for scan in scans {
        println!(
            "{:<20}  {:>8}  {:>7}  {:>10}  {}",
            scan.scanned_at.format("%Y-%m-%d %H:%M:%S"),
            scan.total_images,
            scan.total_groups,
            scan.total_duplicates,
            scan.folder
        );
    }
    Ok(())
}

pub fn run_cull_history(history: &CullHistory) -> Result<()> {
    let records = history.load()?;
    if records.is_empty() {
        println!("No cull history in {}", history.path().display());
        return Ok(());
    }

    println!("🗂️  Cull History:");
    for (i, record) in records.iter().enumerate() {
        println!("[{}] {} (group #{})", i, record.timestamp, record.group_id);
        println!("     kept: {}", record.retained.display());
        for file in &record.culled {
            match &file.to {
                Some(to) => println!("     culled: {} → {}", file.from.display(), to.display()),
                None => println!("     culled: {}", file.from.display()),
            }
        }
        println!("     action: {:?}\n", record.action);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSelection {
    /// The most recent restorable record.
    Latest,
    /// Record at this position in `history culls`.
    Record(usize),
    All,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub records: usize,
    pub restored: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Move culled files back to where they came from and drop the restored
/// records from the history. Records with a failed file are kept so they can
/// be retried, and lines that do not parse are written back as they were.
pub fn restore_from_history(
    history: &CullHistory,
    selection: RestoreSelection,
) -> Result<RestoreReport> {
    let entries = history.load_entries()?;
    let records: Vec<&CullRecord> = entries
        .iter()
        .filter_map(|entry| match entry {
            HistoryEntry::Record(record) => Some(record),
            HistoryEntry::Unparsed(_) => None,
        })
        .collect();
    let restorable: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| record.action.is_restorable())
        .map(|(i, _)| i)
        .collect();

    let chosen: Vec<usize> = match selection {
        RestoreSelection::All => restorable,
        RestoreSelection::Latest => match restorable.last() {
            Some(&i) => vec![i],
            None => Vec::new(),
        },
        RestoreSelection::Record(i) => {
            let Some(record) = records.get(i) else {
                bail!(
                    "Invalid history index {}; valid range is 0..{}",
                    i,
                    records.len().saturating_sub(1)
                );
            };
            if !record.action.is_restorable() {
                bail!("Record {} deleted its files; nothing to restore", i);
            }
            vec![i]
        }
    };
    if chosen.is_empty() {
        bail!("No restorable history records");
    }

    let mut report = RestoreReport::default();
    let mut done = HashSet::new();
    for &i in &chosen {
        let record = records[i];
        println!(
            "🔄 Restoring {} files from record {}...",
            record.culled.len(),
            record.timestamp
        );

        let mut record_failed = false;
        for file in &record.culled {
            let Some(src) = &file.to else {
                continue;
            };
            if !src.exists() {
                eprintln!("⚠️ Source file {} does not exist; skipping", src.display());
                report.skipped += 1;
                continue;
            }
            match fileutil::restore_file(src, &file.from) {
                Ok(()) => {
                    println!("🔄 Restored {} → {}", src.display(), file.from.display());
                    report.restored += 1;
                }
                Err(e) => {
                    eprintln!("Failed to restore {}: {}", src.display(), e);
                    report.failed += 1;
                    record_failed = true;
                }
            }
        }

        if !record_failed {
            done.insert(i);
            report.records += 1;
        }
    }

    // Record positions count parsed records only, matching `history culls`.
    let mut position = 0;
    let remaining: Vec<HistoryEntry> = entries
        .into_iter()
        .filter(|entry| match entry {
            HistoryEntry::Record(_) => {
                let keep = !done.contains(&position);
                position += 1;
                keep
            }
            HistoryEntry::Unparsed(_) => true,
        })
        .collect();
    history.rewrite(&remaining)?;

    Ok(report)
}

pub fn run_restore(history: &CullHistory, selection: RestoreSelection) -> Result<()> {
    let report = restore_from_history(history, selection)?;
    println!(
        "🧹 Updated history, removed {} record(s)",
        report.records
    );
    if report.failed > 0 {
        println!("Failed: {} files (records kept for retry)", report.failed);
    }
    if report.restored > 0 {
        println!("Run 'imgdedup scan <folder>' to pick the restored files up again.");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// serve

pub async fn run_serve(storage: Storage, history: CullHistory, config: &ServeConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    let url = format!("http://{}", listener.local_addr()?);

    println!("🌐 Serving duplicate groups at {}", url);
    if config.idle_timeout.is_zero() {
        println!("Idle timeout: disabled");
    } else {
        println!(
            "Idle timeout: {}s (resets on activity, paused while the tab is open)",
            config.idle_timeout.as_secs()
        );
    }
    println!("Press Ctrl+C to stop\n");

    if config.open_browser {
        open_browser(&url);
    }

    let state = AppState::new(storage, history);
    let reason = server::serve(listener, state, config.idle_timeout)
        .await
        .context("server error")?;
    match reason {
        ShutdownReason::Signal => println!("\nShutting down server..."),
        ShutdownReason::Idle => println!("\nIdle timeout reached. Shutting down server..."),
    }
    Ok(())
}

fn open_browser(url: &str) {
    let mut command = if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = std::process::Command::new("rundll32");
        command.arg("url.dll,FileProtocolHandler");
        command
    } else {
        std::process::Command::new("xdg-open")
    };
    if let Err(e) = command.arg(url).spawn() {
        log::warn!("Could not open a browser: {}", e);
    }
}

// ---------------------------------------------------------------------------
// formatting

/// Human-readable byte count with one decimal in binary units.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}

/// Fit `path` into `max_len` characters, keeping the file name and as much
/// of the trailing directory as fits behind a `...` prefix.
pub fn shorten_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let (dir, file) = match path.rfind(['/', '\\']) {
        Some(i) => (&path[..=i], &path[i + 1..]),
        None => ("", path),
    };
    let file_len = file.chars().count();
    if file_len + 3 >= max_len {
        return format!("...{}", tail(file, max_len.saturating_sub(3)));
    }

    let room = max_len - file_len - 4;
    format!("...{}{}", tail(dir, room), file)
}

fn tail(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}
