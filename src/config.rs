//! CLI configuration and runtime settings for building and serving a site.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::{Component, Path, PathBuf};

use crate::mirror::MirrorJob;
use crate::rewriter::{Pattern, Rewrite};
use crate::server::ServerConfig;
use crate::suffix::SuffixFilter;

/// Variable holding the replacement value, in the environment or the env file
pub const REPLACEMENT_VAR: &str = "APP_BASE_URL";

/// Mirror a static site with token substitution, then serve it
#[derive(Parser, Debug)]
#[command(name = "site-mirror")]
#[command(version)]
#[command(about = "Mirror a static site with token substitution, then serve it")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory that relative paths are resolved against
    #[arg(long, global = true, default_value = ".")]
    pub anchor: PathBuf,

    /// Number of worker threads
    #[arg(short, long, global = true, default_value_t = num_cpus::get())]
    pub jobs: usize,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Load build variables from `.env.<MODE>` (default `.env.production`)
    #[arg(long, global = true)]
    pub mode: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rebuild the output directory from the source directory
    Build(BuildArgs),
    /// Serve an already built directory
    Serve(ServeArgs),
    /// Build, then serve the output directory
    Dev {
        #[command(flatten)]
        build: BuildArgs,
        #[command(flatten)]
        serve: ServeArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Source directory
    #[arg(long, default_value = "src")]
    pub source: PathBuf,

    /// Output directory, deleted and recreated on every build
    #[arg(long, default_value = "dist")]
    pub output: PathBuf,

    /// Marker to replace in matching files
    #[arg(long, default_value = "APP_BASE_URL")]
    pub token: String,

    /// Value substituted for the first occurrence of the token
    /// (falls back to APP_BASE_URL from the env file)
    #[arg(long, env = REPLACEMENT_VAR)]
    pub replacement: Option<String>,

    /// Treat the token as a regular expression
    #[arg(long)]
    pub regex: bool,

    /// Extensions to rewrite (pipe-separated, empty = all files)
    #[arg(long, default_value = "html|css|js")]
    pub suffix: String,

    /// Copy with one task per directory entry instead of one entry at a time
    #[arg(long)]
    pub concurrent: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind
    #[arg(short, long, default_value_t = 3000)]
    pub port: u16,

    /// Document root (defaults to the build output)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// File served for paths ending in `/`
    #[arg(long, default_value = "index.html")]
    pub index: String,

    /// Disable gzip/deflate responses
    #[arg(long)]
    pub no_gzip: bool,

    /// Extensions eligible for compression (pipe-separated)
    #[arg(long, default_value = "html|css|js")]
    pub compress: String,

    /// Open the site in the default browser once the server is up
    #[arg(long)]
    pub open: bool,
}

/// Server settings plus the browser convenience
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub server: ServerConfig,
    pub open_browser: bool,
}

/// Runtime configuration parsed from CLI
#[derive(Debug, Clone)]
pub struct Config {
    /// Build to run first, if any
    pub build: Option<MirrorJob>,
    /// Use the concurrent orchestrator
    pub concurrent: bool,
    /// Server to start after the build, if any
    pub serve: Option<ServeOptions>,
    /// Number of worker threads
    pub jobs: usize,
    /// Enable verbose output
    pub verbose: bool,
}

/// Resolve `path` through symlinks and `..` without requiring it to exist.
///
/// The deepest existing ancestor is canonicalized and the missing remainder is
/// appended lexically.
fn resolve_path(path: &Path) -> PathBuf {
    let mut missing = Vec::new();
    let mut existing = path;
    let base = loop {
        if let Ok(canonical) = existing.canonicalize() {
            break canonical;
        }
        match (existing.parent(), existing.components().next_back()) {
            (Some(parent), Some(last)) => {
                missing.push(last);
                existing = parent;
            }
            _ => break existing.to_path_buf(),
        }
    };

    let mut resolved = base;
    for component in missing.into_iter().rev() {
        match component {
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            other => resolved.push(other),
        }
    }
    resolved
}

/// Whether one path is the other or lies inside it, once both are resolved
fn overlaps(a: &Path, b: &Path) -> bool {
    let (a, b) = (resolve_path(a), resolve_path(b));
    a.starts_with(&b) || b.starts_with(&a)
}

/// Env file for `mode`, relative to `anchor`.
///
/// Without a mode `.env.production` is used, or `.env` when that is missing.
pub fn env_file_path(anchor: &Path, mode: Option<&str>) -> PathBuf {
    match mode {
        Some(mode) => anchor.join(format!(".env.{mode}")),
        None => {
            let production = anchor.join(".env.production");
            if production.exists() {
                production
            } else {
                anchor.join(".env")
            }
        }
    }
}

/// Look up `key` in a dotenv file. A missing file yields `None`.
pub fn env_file_value(path: &Path, key: &str) -> anyhow::Result<Option<String>> {
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) if e.not_found() => {
            tracing::debug!(path = %path.display(), "no env file");
            return Ok(None);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    let mut value = None;
    for entry in entries {
        let (name, v) = entry.with_context(|| format!("Invalid env file {}", path.display()))?;
        if name == key {
            value = Some(v);
        }
    }
    Ok(value)
}

impl BuildArgs {
    fn into_job(self, anchor: &Path, env_file: &Path) -> anyhow::Result<MirrorJob> {
        let source_root = anchor.join(&self.source);
        let dest_root = anchor.join(&self.output);

        if overlaps(&source_root, &dest_root) {
            bail!(
                "Source {} and output {} must not contain each other",
                source_root.display(),
                dest_root.display()
            );
        }

        let pattern = if self.regex {
            Pattern::regex(&self.token)
        } else {
            Pattern::literal(self.token.as_str())
        }
        .with_context(|| format!("Invalid token pattern: {}", self.token))?;

        let replacement = match self.replacement {
            Some(value) => value,
            None => env_file_value(env_file, REPLACEMENT_VAR)?.unwrap_or_default(),
        };

        Ok(MirrorJob {
            source_root,
            dest_root,
            rewrite: Rewrite::new(pattern, replacement, SuffixFilter::parse(&self.suffix)),
        })
    }
}

impl ServeArgs {
    fn into_options(self, anchor: &Path, default_root: PathBuf) -> ServeOptions {
        let root = self
            .root
            .map(|root| anchor.join(root))
            .unwrap_or(default_root);

        ServeOptions {
            server: ServerConfig {
                host: self.host,
                port: self.port,
                root,
                index: self.index,
                compression: !self.no_gzip,
                compressible: SuffixFilter::parse(&self.compress),
            },
            open_browser: self.open,
        }
    }
}

impl Config {
    /// Create Config from CLI arguments
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let anchor = cli.anchor.canonicalize().unwrap_or(cli.anchor);
        let env_file = env_file_path(&anchor, cli.mode.as_deref());

        let (build, concurrent, serve) = match cli.command {
            Command::Build(args) => {
                let concurrent = args.concurrent;
                (Some(args.into_job(&anchor, &env_file)?), concurrent, None)
            }
            Command::Serve(args) => {
                let default_root = anchor.join("dist");
                (None, false, Some(args.into_options(&anchor, default_root)))
            }
            Command::Dev { build, serve } => {
                let concurrent = build.concurrent;
                let job = build.into_job(&anchor, &env_file)?;
                let serve = serve.into_options(&anchor, job.dest_root.clone());
                (Some(job), concurrent, Some(serve))
            }
        };

        Ok(Config {
            build,
            concurrent,
            serve,
            jobs: cli.jobs.max(1),
            verbose: cli.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Config {
        let cli = Cli::try_parse_from(args).unwrap();
        Config::from_cli(cli).unwrap()
    }

    // ==================== Cli parsing tests ====================

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["site-mirror"]).is_err());
    }

    #[test]
    fn test_cli_debug() {
        let cli = Cli::try_parse_from(["site-mirror", "build"]).unwrap();
        let debug = format!("{:?}", cli);
        assert!(debug.contains("Cli"));
        assert!(debug.contains("Build"));
    }

    // ==================== Config::from_cli tests ====================

    #[test]
    fn test_build_defaults() {
        let config = parse(&[
            "site-mirror",
            "--anchor",
            "/site",
            "build",
            "--replacement",
            "https://example.com",
        ]);

        let job = config.build.unwrap();
        assert_eq!(job.source_root, PathBuf::from("/site/src"));
        assert_eq!(job.dest_root, PathBuf::from("/site/dist"));
        assert_eq!(job.rewrite.pattern.as_str(), "APP_BASE_URL");
        assert_eq!(job.rewrite.replacement, "https://example.com");
        assert_eq!(job.rewrite.filter, SuffixFilter::parse("html|css|js"));
        assert!(!config.concurrent);
        assert!(config.serve.is_none());
    }

    #[test]
    fn test_build_custom_paths_and_suffix() {
        let config = parse(&[
            "site-mirror",
            "--anchor",
            "/site",
            "build",
            "--source",
            "../app/src",
            "--output",
            "/tmp/out",
            "--suffix",
            "html|json",
            "--concurrent",
        ]);

        let job = config.build.unwrap();
        assert_eq!(job.source_root, PathBuf::from("/site/../app/src"));
        assert_eq!(job.dest_root, PathBuf::from("/tmp/out"));
        assert!(job.rewrite.filter.contains("json"));
        assert!(!job.rewrite.filter.contains("css"));
        assert!(config.concurrent);
    }

    #[test]
    fn test_build_regex_token() {
        let config = parse(&[
            "site-mirror",
            "build",
            "--token",
            "APP_[A-Z]+_URL",
            "--regex",
        ]);
        let job = config.build.unwrap();
        assert!(matches!(job.rewrite.pattern, Pattern::Regex(_)));
    }

    #[test]
    fn test_build_invalid_regex_fails() {
        let cli = Cli::try_parse_from(["site-mirror", "build", "--token", "(", "--regex"]).unwrap();
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn test_build_output_inside_source_fails() {
        let cli = Cli::try_parse_from([
            "site-mirror",
            "--anchor",
            "/site",
            "build",
            "--source",
            "src",
            "--output",
            "src/dist",
        ])
        .unwrap();
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn test_build_same_source_and_output_fails() {
        let cli = Cli::try_parse_from([
            "site-mirror",
            "build",
            "--source",
            "site",
            "--output",
            "./site",
        ])
        .unwrap();
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn test_build_output_reaching_source_through_parent_dir_fails() {
        let temp = TempDir::new().unwrap();
        let site = temp.path().join("site");
        fs::create_dir_all(site.join("src")).unwrap();

        let cli = Cli::try_parse_from([
            "site-mirror",
            "--anchor",
            site.to_str().unwrap(),
            "build",
            "--output",
            "../site/src",
        ])
        .unwrap();

        assert!(Config::from_cli(cli).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_build_output_reaching_source_through_symlink_fails() {
        let temp = TempDir::new().unwrap();
        let site = temp.path().join("site");
        fs::create_dir_all(site.join("src")).unwrap();
        std::os::unix::fs::symlink(site.join("src"), temp.path().join("link")).unwrap();

        for output in ["link", "link/dist"] {
            let output = temp.path().join(output);
            let cli = Cli::try_parse_from([
                "site-mirror",
                "--anchor",
                site.to_str().unwrap(),
                "build",
                "--output",
                output.to_str().unwrap(),
            ])
            .unwrap();

            assert!(Config::from_cli(cli).is_err(), "{} accepted", output.display());
        }
    }

    #[test]
    fn test_build_sibling_output_is_accepted() {
        let temp = TempDir::new().unwrap();
        let site = temp.path().join("site");
        fs::create_dir_all(site.join("src")).unwrap();

        let config = parse(&[
            "site-mirror",
            "--anchor",
            site.to_str().unwrap(),
            "build",
            "--output",
            "./new/../dist",
        ]);

        assert!(config.build.is_some());
    }

    // ==================== env file tests ====================

    #[test]
    fn test_resolve_path_missing_tail() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().canonicalize().unwrap();

        assert_eq!(resolve_path(&temp.path().join("a/b/../c")), base.join("a/c"));
        assert_eq!(resolve_path(&temp.path().join("a/..")), base);
    }

    #[test]
    fn test_env_file_path_mode() {
        let anchor = Path::new("/site");
        assert_eq!(
            env_file_path(anchor, Some("staging")),
            PathBuf::from("/site/.env.staging")
        );
        assert_eq!(env_file_path(anchor, None), PathBuf::from("/site/.env"));
    }

    #[test]
    fn test_env_file_provides_replacement() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(".env.production"),
            "# build settings\nAPP_BASE_URL=https://prod.example.com\nOTHER=1\n",
        )
        .unwrap();
        let anchor = temp.path().to_str().unwrap();

        let config = parse(&["site-mirror", "--anchor", anchor, "build"]);

        let job = config.build.unwrap();
        assert_eq!(job.rewrite.replacement, "https://prod.example.com");
    }

    #[test]
    fn test_env_file_selected_by_mode() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(".env.production"),
            "APP_BASE_URL=https://prod.example.com\n",
        )
        .unwrap();
        fs::write(
            temp.path().join(".env.staging"),
            "APP_BASE_URL=\"https://staging.example.com\"\n",
        )
        .unwrap();
        let anchor = temp.path().to_str().unwrap();

        let config = parse(&["site-mirror", "--anchor", anchor, "--mode", "staging", "dev"]);

        let job = config.build.unwrap();
        assert_eq!(job.rewrite.replacement, "https://staging.example.com");
    }

    #[test]
    fn test_replacement_flag_overrides_env_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".env"), "APP_BASE_URL=https://file.example.com\n").unwrap();
        let anchor = temp.path().to_str().unwrap();

        let config = parse(&[
            "site-mirror",
            "--anchor",
            anchor,
            "build",
            "--replacement",
            "/",
        ]);

        assert_eq!(config.build.unwrap().rewrite.replacement, "/");
    }

    #[test]
    fn test_missing_env_file_leaves_replacement_empty() {
        let temp = TempDir::new().unwrap();
        assert_eq!(
            env_file_value(&temp.path().join(".env.nope"), REPLACEMENT_VAR).unwrap(),
            None
        );
    }

    #[test]
    fn test_serve_defaults() {
        let config = parse(&["site-mirror", "--anchor", "/site", "serve"]);

        assert!(config.build.is_none());
        let serve = config.serve.unwrap();
        assert_eq!(serve.server.host, "127.0.0.1");
        assert_eq!(serve.server.port, 3000);
        assert_eq!(serve.server.root, PathBuf::from("/site/dist"));
        assert_eq!(serve.server.index, "index.html");
        assert!(serve.server.compression);
        assert_eq!(serve.server.compressible, SuffixFilter::parse("html|css|js"));
        assert!(!serve.open_browser);
    }

    #[test]
    fn test_serve_options() {
        let config = parse(&[
            "site-mirror",
            "--anchor",
            "/site",
            "serve",
            "--host",
            "0.0.0.0",
            "-p",
            "8080",
            "--root",
            "public",
            "--index",
            "home.html",
            "--no-gzip",
            "--compress",
            "svg|html",
            "--open",
        ]);

        let serve = config.serve.unwrap();
        assert_eq!(serve.server.addr(), "0.0.0.0:8080");
        assert_eq!(serve.server.root, PathBuf::from("/site/public"));
        assert_eq!(serve.server.index, "home.html");
        assert!(!serve.server.compression);
        assert!(serve.server.compressible.contains("svg"));
        assert!(serve.open_browser);
    }

    #[test]
    fn test_dev_serves_build_output() {
        let config = parse(&[
            "site-mirror",
            "--anchor",
            "/site",
            "dev",
            "--output",
            "public",
            "--replacement",
            "/",
        ]);

        let job = config.build.unwrap();
        let serve = config.serve.unwrap();
        assert_eq!(serve.server.root, job.dest_root);
        assert_eq!(serve.server.root, PathBuf::from("/site/public"));
    }

    #[test]
    fn test_config_jobs_minimum_one() {
        let config = parse(&["site-mirror", "-j", "0", "serve"]);
        assert_eq!(config.jobs, 1);
    }

    #[test]
    fn test_config_verbose_after_subcommand() {
        let config = parse(&["site-mirror", "serve", "--verbose"]);
        assert!(config.verbose);
    }
}
