//! Build orchestration: delete the output tree, copy the source tree into it,
//! then substitute the token in matching files.
//!
//! Two variants reach the same end state:
//! - [`mirror_sync`] walks the tree one entry at a time and rewrites each file
//!   right after copying it; the first error stops the run.
//! - [`mirror_concurrent`] fans out every directory level as tokio tasks and
//!   rewrites in a separate pass once the copy is complete.
//!
//! Neither variant rolls back: a failed run can leave a partial output tree.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use walkdir::WalkDir;

use crate::copier::{copy_tree, copy_tree_async};
use crate::deleter::{delete_tree, delete_tree_async};
use crate::error::{BuildError, MirrorError};
use crate::rewriter::{rewrite_file, rewrite_file_async, Rewrite};

/// One build: where to read, where to write, what to substitute
#[derive(Debug, Clone)]
pub struct MirrorJob {
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    pub rewrite: Rewrite,
}

/// Cache-line aligned atomic counter to prevent false sharing
/// Each counter is on its own 64-byte cache line
#[repr(align(64))]
pub struct CacheAlignedAtomic(pub AtomicU64);

impl CacheAlignedAtomic {
    pub const fn new(val: u64) -> Self {
        Self(AtomicU64::new(val))
    }

    #[inline]
    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters shared by every task of one build
pub struct MirrorStats {
    pub files_copied: CacheAlignedAtomic,
    pub bytes_copied: CacheAlignedAtomic,
    pub dirs_created: CacheAlignedAtomic,
    pub files_rewritten: CacheAlignedAtomic,
}

impl MirrorStats {
    pub fn new() -> Self {
        Self {
            files_copied: CacheAlignedAtomic::new(0),
            bytes_copied: CacheAlignedAtomic::new(0),
            dirs_created: CacheAlignedAtomic::new(0),
            files_rewritten: CacheAlignedAtomic::new(0),
        }
    }
}

impl Default for MirrorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a build run is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Idle,
    Deleting,
    Copying,
    Rewriting,
    Done,
    Failed,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Idle => "idle",
            BuildPhase::Deleting => "deleting",
            BuildPhase::Copying => "copying",
            BuildPhase::Rewriting => "rewriting",
            BuildPhase::Done => "done",
            BuildPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildPhase::Done | BuildPhase::Failed)
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which orchestrator produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Sync,
    Concurrent,
}

/// Summary of a finished build
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub mode: BuildMode,
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub dirs_created: u64,
    pub files_rewritten: u64,
    pub duration: Duration,
}

impl BuildReport {
    pub fn files_per_sec(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.files_copied as f64 / secs
        } else {
            0.0
        }
    }
}

/// Phase bookkeeping for a single run
struct Run {
    mode: BuildMode,
    phase: BuildPhase,
    start: Instant,
    stats: Arc<MirrorStats>,
}

impl Run {
    fn new(mode: BuildMode) -> Self {
        Self {
            mode,
            phase: BuildPhase::Idle,
            start: Instant::now(),
            stats: Arc::new(MirrorStats::new()),
        }
    }

    fn advance(&mut self, next: BuildPhase) {
        tracing::info!(from = %self.phase, to = %next, "build phase");
        self.phase = next;
    }

    /// Stop the run, reporting `phase` as the one that failed
    fn fail_in(&mut self, phase: BuildPhase, source: MirrorError) -> BuildError {
        tracing::error!(%phase, error = %source, "build failed");
        self.phase = BuildPhase::Failed;
        BuildError { phase, source }
    }

    fn fail(&mut self, source: MirrorError) -> BuildError {
        self.fail_in(self.phase, source)
    }

    fn finish(mut self) -> BuildReport {
        self.advance(BuildPhase::Done);
        BuildReport {
            mode: self.mode,
            files_copied: self.stats.files_copied.get(),
            bytes_copied: self.stats.bytes_copied.get(),
            dirs_created: self.stats.dirs_created.get(),
            files_rewritten: self.stats.files_rewritten.get(),
            duration: self.start.elapsed(),
        }
    }
}

/// Run one build, blocking, depth-first, failing fast
pub fn mirror_sync(job: &MirrorJob) -> Result<BuildReport, BuildError> {
    let mut run = Run::new(BuildMode::Sync);

    run.advance(BuildPhase::Deleting);
    delete_tree(&job.dest_root).map_err(|e| run.fail(e))?;

    run.advance(BuildPhase::Copying);
    let stats = Arc::clone(&run.stats);
    let mut rewrite_failed = false;
    let mut rewrite_inline = |path: &Path| -> Result<(), MirrorError> {
        let replaced = rewrite_file(path, &job.rewrite).map_err(|e| {
            rewrite_failed = true;
            e
        })?;
        if replaced {
            stats.files_rewritten.0.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    };
    let copied = copy_tree(
        &job.source_root,
        &job.dest_root,
        &stats,
        &mut rewrite_inline,
    );
    if let Err(e) = copied {
        // Inline rewrites surface during the copy walk
        let phase = if rewrite_failed {
            BuildPhase::Rewriting
        } else {
            BuildPhase::Copying
        };
        return Err(run.fail_in(phase, e));
    }

    // Already done file by file during the copy
    run.advance(BuildPhase::Rewriting);

    Ok(run.finish())
}

/// Every file under `root` the rule applies to
fn rewrite_targets(root: &Path, rule: &Rewrite) -> Result<Vec<PathBuf>, MirrorError> {
    let mut targets = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| MirrorError::ReadDir {
            path: e.path().unwrap_or(root).to_path_buf(),
            source: e.into(),
        })?;
        if entry.file_type().is_file() && rule.applies_to(entry.path()) {
            targets.push(entry.into_path());
        }
    }
    Ok(targets)
}

async fn rewrite_pass(
    root: PathBuf,
    rule: Rewrite,
    stats: Arc<MirrorStats>,
) -> Result<(), MirrorError> {
    if !rule.is_active() {
        return Ok(());
    }

    let scan_root = root.clone();
    let scan_rule = rule.clone();
    let targets = tokio::task::spawn_blocking(move || rewrite_targets(&scan_root, &scan_rule))
        .await
        .map_err(|e| MirrorError::Task {
            path: root.clone(),
            reason: e.to_string(),
        })??;

    tracing::debug!(count = targets.len(), "rewriting files");
    let results = join_all(targets.iter().map(|path| rewrite_file_async(path, &rule))).await;

    let mut first = None;
    for result in results {
        match result {
            Ok(true) => {
                stats.files_rewritten.0.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(e) if first.is_none() => first = Some(e),
            Err(e) => tracing::warn!(error = %e, "additional rewrite failure"),
        }
    }

    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Run one build with per-directory fan-out.
///
/// Deletion is awaited before copying starts and rewriting starts after the
/// whole copy settled. A failing entry fails the build, but its siblings are
/// still allowed to finish first.
pub async fn mirror_concurrent(job: MirrorJob) -> Result<BuildReport, BuildError> {
    let mut run = Run::new(BuildMode::Concurrent);

    run.advance(BuildPhase::Deleting);
    delete_tree_async(job.dest_root.clone())
        .await
        .map_err(|e| run.fail(e))?;

    run.advance(BuildPhase::Copying);
    copy_tree_async(
        job.source_root.clone(),
        job.dest_root.clone(),
        Arc::clone(&run.stats),
    )
    .await
    .map_err(|e| run.fail(e))?;

    run.advance(BuildPhase::Rewriting);
    rewrite_pass(job.dest_root, job.rewrite, Arc::clone(&run.stats))
        .await
        .map_err(|e| run.fail(e))?;

    Ok(run.finish())
}
