//! `dropzoned`: deploys an install root into a module runtime and keeps it
//! deployed while artifacts are dropped in, replaced, or removed.
//!
//! Runs against the in-memory runtime. Pass `--once` to run a single
//! reconciliation cycle and exit.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod summary;
mod theme;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dropzone_config::Config;
use dropzone_deploy::{
    CycleTrigger, DeployConfig, DeployError, HotDeployService, InMemoryRuntime, Reconcile,
    ReconciliationEngine,
};
use dropzone_telemetry::LogConfig;
use tracing::{debug, info};

use crate::theme::Theme;

/// Dropzone daemon: hot deployment of module artifacts.
#[derive(Debug, Parser)]
#[command(name = "dropzoned")]
#[command(author, version, about = "Dropzone daemon: hot deployment of module artifacts")]
struct Args {
    /// Explicit configuration file, layered over the system and user files.
    #[arg(short, long, env = "DROPZONE_CONFIG")]
    config: Option<PathBuf>,

    /// Install root to deploy (path or `file:` URI).
    #[arg(long)]
    install_root: Option<String>,

    /// Run one reconciliation cycle and exit.
    #[arg(long)]
    once: bool,

    /// Deploy at startup but do not watch the install root.
    #[arg(long)]
    no_watch: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Fold command-line overrides into the loaded configuration.
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(root) = &self.install_root {
            config.deploy.install_root.clone_from(root);
        }
        if self.no_watch {
            config.deploy.hot_deploy = false;
        }
        if self.verbose {
            config.logging.level = "debug".to_owned();
        }
        dropzone_config::validate::validate(config).context("invalid command-line override")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resolved = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    let mut config = resolved.config;
    args.apply(&mut config)?;

    let log_config = LogConfig::from_section(&config.logging)?;
    if let Err(e) = dropzone_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }
    for file in &resolved.loaded_files {
        debug!(file = %file, "Loaded configuration file");
    }

    let deploy = DeployConfig::try_from(&config.deploy)?;
    let runtime = Arc::new(InMemoryRuntime::new(config.deploy.fragment_marker.clone()));

    if args.once {
        let engine = ReconciliationEngine::new(deploy, runtime);
        let report = engine.run_cycle(CycleTrigger::Manual).await?;
        for line in summary::render(&report) {
            println!("{line}");
        }
        return Ok(());
    }

    let root = deploy.install_root.path().display().to_string();
    let grace = deploy.shutdown_grace;
    let service = HotDeployService::start(deploy, runtime).await;

    if let Some(report) = service.initial_report() {
        for line in summary::render(report) {
            println!("{line}");
        }
    }
    let mode = if service.is_watching() {
        "watching"
    } else {
        "not watching"
    };
    println!(
        "{}",
        Theme::header(&format!("dropzoned deployed {root} ({mode})"))
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    println!("\n{}", Theme::warning("Shutting down..."));
    match service.stop_with_grace(grace).await {
        Ok(cycles) => {
            info!(cycles, "Daemon stopped");
            println!("{}", Theme::success("Daemon stopped"));
        },
        Err(e @ DeployError::ShutdownTimeout { .. }) => {
            println!("{}", Theme::warning(&e.to_string()));
        },
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_applied() {
        let args = Args::parse_from([
            "dropzoned",
            "--install-root",
            "/srv/drop",
            "--no-watch",
            "-v",
        ]);
        let mut config = Config::default();
        args.apply(&mut config).unwrap();

        assert_eq!(config.deploy.install_root, "/srv/drop");
        assert!(!config.deploy.hot_deploy);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let args = Args::parse_from(["dropzoned", "--once"]);
        let mut config = Config::default();
        args.apply(&mut config).unwrap();

        assert!(args.once);
        assert_eq!(config.deploy.install_root, "deploy");
        assert!(config.deploy.hot_deploy);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_install_root_rejected() {
        let args = Args::parse_from(["dropzoned", "--install-root", ""]);
        let mut config = Config::default();
        assert!(args.apply(&mut config).is_err());
    }
}
