use std::path::PathBuf;
use thiserror::Error;

use crate::mirror::BuildPhase;

/// ENOSPC on Unix
const ENOSPC: i32 = 28;

/// Filesystem and rewrite errors raised while mirroring a tree
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    #[error("No space left on device for {path}")]
    DiskFull { path: PathBuf },

    #[error("Failed to stat {path}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read directory: {path}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory: {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy {src} to {dst}")]
    Copy {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete {path}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rewrite {path}")]
    Rewrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Mirror task for {path} did not complete: {reason}")]
    Task { path: PathBuf, reason: String },
}

impl MirrorError {
    /// Map an io error on `path`, promoting ENOSPC to `DiskFull`
    pub(crate) fn io(
        path: impl Into<PathBuf>,
        source: std::io::Error,
        make: impl FnOnce(PathBuf, std::io::Error) -> Self,
    ) -> Self {
        let path = path.into();
        if source.raw_os_error() == Some(ENOSPC) {
            return MirrorError::DiskFull { path };
        }
        make(path, source)
    }

    /// The path the error is about
    pub fn path(&self) -> &std::path::Path {
        match self {
            MirrorError::NotFound { path }
            | MirrorError::DiskFull { path }
            | MirrorError::Stat { path, .. }
            | MirrorError::ReadDir { path, .. }
            | MirrorError::CreateDir { path, .. }
            | MirrorError::Delete { path, .. }
            | MirrorError::Rewrite { path, .. }
            | MirrorError::Task { path, .. } => path,
            MirrorError::Copy { src, .. } => src,
        }
    }
}

/// A build run that stopped in `phase`
#[derive(Error, Debug)]
#[error("Build failed while {phase}")]
pub struct BuildError {
    pub phase: BuildPhase,
    #[source]
    pub source: MirrorError,
}

/// Errors raised by the static server
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("Failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a regular file: {path}")]
    NotAFile { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
