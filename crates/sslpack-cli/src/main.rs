//! sslpack - OpenSSL installer build CLI

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sslpack_cli::ui::ConsoleReporter;
use sslpack_cli::{Cli, Commands, cmd};
use sslpack_core::Reporter;
use sslpack_core::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging. Stdout carries the JSON result.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let reporter = ConsoleReporter::new(cli.quiet);

    match run(cli, &reporter).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            reporter.error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, reporter: &ConsoleReporter) -> Result<()> {
    let config = Config::resolve(cli.root)
        .context("Unable to determine the workspace root")?
        .with_strict(cli.strict)
        .with_quiet(cli.quiet);
    tracing::debug!("Workspace root: {}", config.root.display());

    match cli.command {
        Commands::Init { base } => cmd::init::init(&config, reporter, &base).await,
        Commands::InitTest { base } => cmd::init_test::init_test(&config, reporter, &base).await,
        Commands::SaveProfile { base, arch } => {
            cmd::save_profile::save_profile(&config, reporter, &base, &arch)
        }
        Commands::Prepare { version } => cmd::prepare::prepare(&config, reporter, &version).await,
        Commands::Build { version, arch } => {
            cmd::build::build(&config, reporter, &version, &arch)
        }
        Commands::BuildAll { versions } => {
            cmd::build_all::build_all(&config, reporter, &versions).await
        }
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(())
        }
    }
}
