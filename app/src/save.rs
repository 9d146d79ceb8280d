//! Output persistence: optional timestamped backup, then write; falls back to
//! the system temp dir when the target is not writable.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::{info, warn};

/// `<path>.<YYYYmmddHHMMSS>.bak`
pub fn backup_path(path: &Path, now: DateTime<Local>) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.bak", now.format("%Y%m%d%H%M%S")));
    PathBuf::from(name)
}

/// Write `contents` to `path`, returning where it actually landed.
pub fn save_output(path: &Path, contents: &str, backup: bool) -> Result<PathBuf> {
    if backup && path.exists() {
        let target = backup_path(path, Local::now());
        std::fs::rename(path, &target)
            .with_context(|| format!("back up {} to {}", path.display(), target.display()))?;
        info!(backup = %target.display(), "previous output backed up");
    }
    match write_file(path, contents) {
        Ok(()) => Ok(path.to_path_buf()),
        Err(e) => {
            let name = path.file_name().unwrap_or_else(|| "config.json".as_ref());
            let fallback = std::env::temp_dir().join(name);
            warn!(path = %path.display(), error = %e, fallback = %fallback.display(), "write failed, using temp dir");
            write_file(&fallback, contents)
                .with_context(|| format!("write {}", fallback.display()))?;
            Ok(fallback)
        }
    }
}

fn write_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}
