//! Recursive removal of files and directory trees.
//!
//! Symlinks are removed as links and never followed, so deleting an output
//! tree can never reach outside of it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures::future::{join_all, BoxFuture, FutureExt};

use crate::error::MirrorError;

/// Delete `path` and everything under it. A missing path is not an error.
pub fn delete_tree(path: &Path) -> Result<(), MirrorError> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(MirrorError::Stat {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    if !metadata.is_dir() {
        tracing::debug!(path = %path.display(), "removing file");
        return fs::remove_file(path).map_err(|e| MirrorError::Delete {
            path: path.to_path_buf(),
            source: e,
        });
    }

    let entries = fs::read_dir(path).map_err(|e| MirrorError::ReadDir {
        path: path.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| MirrorError::ReadDir {
            path: path.to_path_buf(),
            source: e,
        })?;
        delete_tree(&entry.path())?;
    }

    tracing::debug!(path = %path.display(), "removing directory");
    fs::remove_dir(path).map_err(|e| MirrorError::Delete {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Async counterpart of [`delete_tree`].
///
/// Every entry of a directory is deleted on its own task; the directory itself
/// is removed once all of them have finished. If any entry fails, the first
/// failure in listing order is returned after the remaining siblings settle.
pub fn delete_tree_async(path: PathBuf) -> BoxFuture<'static, Result<(), MirrorError>> {
    async move {
        let metadata = match tokio::fs::symlink_metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(MirrorError::Stat { path, source: e }),
        };

        if !metadata.is_dir() {
            tracing::debug!(path = %path.display(), "removing file");
            return tokio::fs::remove_file(&path)
                .await
                .map_err(|e| MirrorError::Delete { path, source: e });
        }

        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| MirrorError::ReadDir {
                path: path.clone(),
                source: e,
            })?;

        let mut tasks = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let child = entry.path();
                    tasks.push((child.clone(), tokio::spawn(delete_tree_async(child))));
                }
                Ok(None) => break,
                Err(e) => {
                    // Let the already spawned siblings finish before reporting
                    join_all(tasks.into_iter().map(|(_, handle)| handle)).await;
                    return Err(MirrorError::ReadDir { path, source: e });
                }
            }
        }

        crate::copier::settle(tasks).await?;

        tracing::debug!(path = %path.display(), "removing directory");
        tokio::fs::remove_dir(&path)
            .await
            .map_err(|e| MirrorError::Delete { path, source: e })
    }
    .boxed()
}
