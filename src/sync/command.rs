use super::{PathKind, SyncSettings};
use crate::error::{Result, SyncError};

/// Build the rsync argument vector for one run, `argv[0]` included.
/// No filesystem or environment access; fails only on empty paths.
pub fn build_command(settings: &SyncSettings) -> Result<Vec<String>> {
    if settings.source.as_os_str().is_empty() {
        return Err(SyncError::InvalidSettings("source path is empty".into()));
    }
    if settings.destination.as_os_str().is_empty() {
        return Err(SyncError::InvalidSettings(
            "destination path is empty".into(),
        ));
    }

    let mut args = vec!["rsync".to_string(), "-a".to_string()];

    if settings.bandwidth_limit_kbps > 0 {
        args.push("--bwlimit".to_string());
        args.push(settings.bandwidth_limit_kbps.to_string());
    }

    // Single-file sources run with plain recursion instead of archive mode
    if settings.source_kind == PathKind::File {
        args.retain(|a| a != "-a");
        args.push("-r".to_string());
    }

    if settings.dry_run {
        args.push("--dry-run".to_string());
    }
    if settings.delete {
        args.push("--delete".to_string());
    }
    if settings.compress {
        args.push("--compress".to_string());
    }
    if settings.verbose {
        args.push("--verbose".to_string());
        args.push("--progress".to_string());
    }

    // Excludes accept raw comma-separated input; empty pieces are dropped
    for entry in &settings.exclude_patterns {
        for piece in entry.split(',') {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            args.push("--exclude".to_string());
            args.push(piece.to_string());
        }
    }

    args.push(settings.source.to_string_lossy().into_owned());
    args.push(settings.destination.to_string_lossy().into_owned());

    Ok(args)
}
