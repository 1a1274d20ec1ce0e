// Relocating culled files: plain moves, the desktop trash, and moving back.

use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileOpError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Could not find home directory")]
    NoHomeDir,

    #[error("Path has no file name: {path}")]
    NoFileName { path: String },

    #[error("Destination already exists: {path}")]
    DestinationExists { path: String },
}

/// Move `src` into `dest_dir`, creating it if needed. A clashing name gets a
/// counter appended (`photo_1.jpg`, `photo_2.jpg`, ...). Returns the new path.
pub fn move_file(src: &Path, dest_dir: &Path) -> Result<PathBuf, FileOpError> {
    fs::create_dir_all(dest_dir)?;
    let file_name = file_name(src)?;
    let dest_name = unique_name(&file_name, |name| !dest_dir.join(name).exists());
    let dest = dest_dir.join(dest_name);
    rename_or_copy(src, &dest)?;
    Ok(dest)
}

/// Move `src` back to the exact path `dest`. Refuses to overwrite.
pub fn restore_file(src: &Path, dest: &Path) -> Result<(), FileOpError> {
    if dest.exists() {
        return Err(FileOpError::DestinationExists {
            path: dest.display().to_string(),
        });
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    rename_or_copy(src, dest)?;
    remove_trash_info(src);
    Ok(())
}

/// Move `src` to the user's trash and return where it landed.
///
/// Linux uses the freedesktop layout under the XDG data dir, macOS uses
/// `~/.Trash`, anything else gets `~/imgdedup_trash`.
pub fn move_to_trash(src: &Path) -> Result<PathBuf, FileOpError> {
    if cfg!(target_os = "linux") {
        let data_dir = dirs::data_dir().ok_or(FileOpError::NoHomeDir)?;
        move_to_freedesktop_trash(src, &data_dir.join("Trash"))
    } else if cfg!(target_os = "macos") {
        let home = dirs::home_dir().ok_or(FileOpError::NoHomeDir)?;
        move_file(src, &home.join(".Trash"))
    } else {
        let home = dirs::home_dir().ok_or(FileOpError::NoHomeDir)?;
        move_file(src, &home.join("imgdedup_trash"))
    }
}

/// Move `src` into `trash_root/files` and write the matching
/// `trash_root/info/<name>.trashinfo` entry.
pub fn move_to_freedesktop_trash(src: &Path, trash_root: &Path) -> Result<PathBuf, FileOpError> {
    let files_dir = trash_root.join("files");
    let info_dir = trash_root.join("info");
    fs::create_dir_all(&files_dir)?;
    fs::create_dir_all(&info_dir)?;

    let absolute = std::path::absolute(src)?;
    let file_name = file_name(src)?;
    // The name must be free in both directories.
    let dest_name = unique_name(&file_name, |name| {
        !files_dir.join(name).exists() && !info_dir.join(format!("{}.trashinfo", name)).exists()
    });

    let dest = files_dir.join(&dest_name);
    let info_path = info_dir.join(format!("{}.trashinfo", dest_name));
    let info = format!(
        "[Trash Info]\nPath={}\nDeletionDate={}\n",
        absolute.display(),
        Local::now().format("%Y-%m-%dT%H:%M:%S")
    );
    fs::write(&info_path, info)?;

    if let Err(e) = rename_or_copy(src, &dest) {
        let _ = fs::remove_file(&info_path);
        return Err(e.into());
    }
    Ok(dest)
}

/// First name accepted by `is_free`: `file_name` itself, then
/// `stem_N.ext` for N = 1, 2, ...
pub fn unique_name(file_name: &str, is_free: impl Fn(&str) -> bool) -> String {
    if is_free(file_name) {
        return file_name.to_string();
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|counter| format!("{}_{}{}", stem, counter, ext))
        .find(|candidate| is_free(candidate))
        .unwrap_or_else(|| file_name.to_string())
}

fn file_name(path: &Path) -> Result<String, FileOpError> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| FileOpError::NoFileName {
            path: path.display().to_string(),
        })
}

/// Rename, falling back to copy and delete when `dest` is on another
/// filesystem.
fn rename_or_copy(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            if let Err(copy_err) = fs::copy(src, dest) {
                let _ = fs::remove_file(dest);
                return Err(copy_err);
            }
            fs::remove_file(src)
        }
        Err(e) => Err(e),
    }
}

/// Drop the `.trashinfo` entry that belongs to a file in a freedesktop
/// `files/` directory, if there is one.
fn remove_trash_info(trashed: &Path) {
    let (Some(files_dir), Some(name)) = (trashed.parent(), trashed.file_name()) else {
        return;
    };
    if files_dir.file_name().is_none_or(|n| n != "files") {
        return;
    }
    if let Some(root) = files_dir.parent() {
        let info = root
            .join("info")
            .join(format!("{}.trashinfo", name.to_string_lossy()));
        if info.is_file() {
            if let Err(e) = fs::remove_file(&info) {
                log::warn!("Could not remove {}: {}", info.display(), e);
            }
        }
    }
}
