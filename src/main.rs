use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use site_mirror::browser::open_in_browser;
use site_mirror::config::{Cli, Config, ServeOptions};
use site_mirror::mirror::{mirror_concurrent, mirror_sync, BuildReport, MirrorJob};
use site_mirror::server::StaticServer;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;
    init_tracing(config.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.jobs)
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    if let Some(job) = &config.build {
        if !job.source_root.exists() {
            bail!("Source directory not found: {}", job.source_root.display());
        }
        if !job.rewrite.is_active() {
            tracing::warn!(
                token = job.rewrite.pattern.as_str(),
                "no replacement value, files are copied without substitution"
            );
        }

        let report = build(&runtime, job, config.concurrent, config.verbose)?;
        println!(
            "Mirrored {} files ({} bytes) in {:.2}s ({:.0} files/sec), {} rewritten",
            report.files_copied,
            report.bytes_copied,
            report.duration.as_secs_f64(),
            report.files_per_sec(),
            report.files_rewritten
        );
    }

    if let Some(serve) = config.serve {
        runtime.block_on(serve_site(serve))?;
    }

    Ok(ExitCode::SUCCESS)
}

fn build(
    runtime: &Runtime,
    job: &MirrorJob,
    concurrent: bool,
    verbose: bool,
) -> Result<BuildReport> {
    // Setup spinner (only in verbose mode)
    let spinner = if verbose {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!(
            "Mirroring {} -> {}",
            job.source_root.display(),
            job.dest_root.display()
        ));
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let result = if concurrent {
        runtime.block_on(mirror_concurrent(job.clone()))
    } else {
        mirror_sync(job)
    };

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    result.with_context(|| {
        format!(
            "Failed to mirror {} into {}",
            job.source_root.display(),
            job.dest_root.display()
        )
    })
}

async fn serve_site(options: ServeOptions) -> Result<()> {
    let server = StaticServer::bind(options.server).await?;
    let url = server.url()?;
    println!("Serving on {url}");

    if options.open_browser {
        if let Err(e) = open_in_browser(&url) {
            tracing::warn!(error = %e, "could not open browser");
        }
    }

    server
        .serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Ctrl+C handler unavailable");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
