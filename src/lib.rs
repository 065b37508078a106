//! # Site Mirror
//!
//! Build-and-serve tool for static sites.
//!
//! The build step mirrors a source tree into an output tree and replaces a
//! marker token (for example `APP_BASE_URL`) in text assets with a value
//! supplied at build time. The serve step exposes the output tree over HTTP
//! with gzip/deflate negotiation for compressible types.
//!
//! ## Features
//!
//! - Recursive delete and copy, blocking or with per-directory task fan-out
//! - First-occurrence token substitution, literal or regex
//! - Streaming gzip/deflate responses
//! - Build counters with cache-aligned atomics
//!
//! ## Usage
//!
//! ```ignore
//! use site_mirror::mirror::{mirror_sync, MirrorJob};
//! use site_mirror::server::{ServerConfig, StaticServer};
//!
//! let report = mirror_sync(&job)?;
//! let server = StaticServer::bind(ServerConfig::default()).await?;
//! server.serve().await?;
//! ```

/// Default browser launch
pub mod browser;

/// CLI configuration and argument parsing
pub mod config;

/// Recursive file and directory copying
pub mod copier;

/// Recursive deletion
pub mod deleter;

/// Accept-Encoding negotiation
pub mod encoding;

/// Error types for build and serve
pub mod error;

/// Build orchestration
pub mod mirror;

/// Token substitution
pub mod rewriter;

/// Static file server
pub mod server;

/// Extension filters
pub mod suffix;
