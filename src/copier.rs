use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt};
use tokio::task::JoinHandle;

use crate::error::MirrorError;
use crate::mirror::MirrorStats;

/// Stat `path` following symlinks, mapping a missing path to `NotFound`
fn stat(path: &Path) -> Result<fs::Metadata, MirrorError> {
    fs::metadata(path).map_err(|e| stat_error(path, e))
}

fn stat_error(path: &Path, e: std::io::Error) -> MirrorError {
    if e.kind() == ErrorKind::NotFound {
        MirrorError::NotFound {
            path: path.to_path_buf(),
        }
    } else {
        MirrorError::Stat {
            path: path.to_path_buf(),
            source: e,
        }
    }
}

/// Copy a single file from src to dst
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64, MirrorError> {
    // Create parent directory if needed
    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                MirrorError::io(parent, e, |path, source| MirrorError::CreateDir {
                    path,
                    source,
                })
            })?;
        }
    }

    fs::copy(src, dst).map_err(|e| {
        MirrorError::io(dst, e, |dst, source| MirrorError::Copy {
            src: src.to_path_buf(),
            dst,
            source,
        })
    })
}

/// Create `dir` unless it already exists, returns whether it was created
fn ensure_dir(dir: &Path) -> Result<bool, MirrorError> {
    if dir.exists() {
        return Ok(false);
    }
    fs::create_dir_all(dir).map_err(|e| {
        MirrorError::io(dir, e, |path, source| MirrorError::CreateDir { path, source })
    })?;
    Ok(true)
}

/// Recursively copy `from` into `to`, depth-first, one entry at a time.
///
/// `on_file` is called with every destination file right after it has been
/// copied; an error from it aborts the copy.
pub fn copy_tree(
    from: &Path,
    to: &Path,
    stats: &MirrorStats,
    on_file: &mut dyn FnMut(&Path) -> Result<(), MirrorError>,
) -> Result<(), MirrorError> {
    let metadata = stat(from)?;

    if metadata.is_file() {
        let bytes = copy_file(from, to)?;
        stats.files_copied.0.fetch_add(1, Ordering::Relaxed);
        stats.bytes_copied.0.fetch_add(bytes, Ordering::Relaxed);
        tracing::debug!(src = %from.display(), dst = %to.display(), bytes, "copied");
        return on_file(to);
    }

    if !metadata.is_dir() {
        tracing::debug!(path = %from.display(), "skipping special file");
        return Ok(());
    }

    if ensure_dir(to)? {
        stats.dirs_created.0.fetch_add(1, Ordering::Relaxed);
    }

    let entries = fs::read_dir(from).map_err(|e| MirrorError::ReadDir {
        path: from.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| MirrorError::ReadDir {
            path: from.to_path_buf(),
            source: e,
        })?;
        copy_tree(&entry.path(), &to.join(entry.file_name()), stats, on_file)?;
    }

    Ok(())
}

/// Wait for every task, then report the first failure in spawn order
pub(crate) async fn settle(
    tasks: Vec<(PathBuf, JoinHandle<Result<(), MirrorError>>)>,
) -> Result<(), MirrorError> {
    let (paths, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
    let results = join_all(handles).await;

    let mut first = None;
    for (path, joined) in paths.into_iter().zip(results) {
        let outcome = joined.unwrap_or_else(|e| {
            Err(MirrorError::Task {
                path,
                reason: e.to_string(),
            })
        });
        if let Err(e) = outcome {
            if first.is_none() {
                first = Some(e);
            } else {
                tracing::warn!(error = %e, "additional failure in the same directory");
            }
        }
    }

    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn copy_file_async(src: &Path, dst: &Path) -> Result<u64, MirrorError> {
    if let Some(parent) = dst.parent() {
        if !tokio::fs::try_exists(parent).await.unwrap_or(false) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MirrorError::io(parent, e, |path, source| MirrorError::CreateDir {
                    path,
                    source,
                })
            })?;
        }
    }

    tokio::fs::copy(src, dst).await.map_err(|e| {
        MirrorError::io(dst, e, |dst, source| MirrorError::Copy {
            src: src.to_path_buf(),
            dst,
            source,
        })
    })
}

/// Recursively copy `from` into `to`, fanning out every entry of a directory
/// as its own task.
///
/// A directory is finished once all of its entries are. When one of them
/// fails the others still run to completion and the first failure in listing
/// order is returned.
pub fn copy_tree_async(
    from: PathBuf,
    to: PathBuf,
    stats: Arc<MirrorStats>,
) -> BoxFuture<'static, Result<(), MirrorError>> {
    async move {
        let metadata = tokio::fs::metadata(&from)
            .await
            .map_err(|e| stat_error(&from, e))?;

        if metadata.is_file() {
            let bytes = copy_file_async(&from, &to).await?;
            stats.files_copied.0.fetch_add(1, Ordering::Relaxed);
            stats.bytes_copied.0.fetch_add(bytes, Ordering::Relaxed);
            tracing::debug!(src = %from.display(), dst = %to.display(), bytes, "copied");
            return Ok(());
        }

        if !metadata.is_dir() {
            tracing::debug!(path = %from.display(), "skipping special file");
            return Ok(());
        }

        if !tokio::fs::try_exists(&to).await.unwrap_or(false) {
            tokio::fs::create_dir_all(&to).await.map_err(|e| {
                MirrorError::io(&to, e, |path, source| MirrorError::CreateDir {
                    path,
                    source,
                })
            })?;
            stats.dirs_created.0.fetch_add(1, Ordering::Relaxed);
        }

        let mut entries = tokio::fs::read_dir(&from)
            .await
            .map_err(|e| MirrorError::ReadDir {
                path: from.clone(),
                source: e,
            })?;

        let mut tasks = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let child_from = entry.path();
                    let child_to = to.join(entry.file_name());
                    let handle = tokio::spawn(copy_tree_async(
                        child_from.clone(),
                        child_to,
                        Arc::clone(&stats),
                    ));
                    tasks.push((child_from, handle));
                }
                Ok(None) => break,
                Err(e) => {
                    join_all(tasks.into_iter().map(|(_, handle)| handle)).await;
                    return Err(MirrorError::ReadDir {
                        path: from,
                        source: e,
                    });
                }
            }
        }

        settle(tasks).await
    }
    .boxed()
}
