#![forbid(unsafe_code)]

mod cmd;
mod output;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use quarry_core::config::{EngineConfig, load_engine_config, resolve_config_path};
use quarry_core::{ErrorCode, RetrievalError};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "quarry: hybrid lexical + vector retrieval",
    long_about = None
)]
struct Cli {
    /// Engine config file. Defaults to `$QUARRY_CONFIG`, then the user
    /// config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Search(cmd::search::SearchArgs),
    Stats(cmd::stats::StatsArgs),
    /// Print the effective engine configuration.
    Config,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("QUARRY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "quarry=debug,info"
        } else {
            "quarry=info,warn"
        })
    });

    let format = env::var("QUARRY_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout stays parseable.
    match format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
            .init(),
        _ => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }
}

/// Resolve and load the engine config. An explicit `--config` must exist;
/// the env and user-directory fallbacks are optional.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<(EngineConfig, Option<PathBuf>)> {
    if let Some(path) = explicit.filter(|p| !p.exists()) {
        bail!("config file {} does not exist", path.display());
    }

    let Some(path) = resolve_config_path(explicit, env::var("QUARRY_CONFIG").ok()) else {
        return Ok((EngineConfig::default(), None));
    };
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok((EngineConfig::default(), None));
    }

    let parse = ErrorCode::ConfigParseError;
    let config = load_engine_config(&path)
        .with_context(|| format!("{}: {}", parse.code(), parse.message()))?;
    debug!(path = %path.display(), "loaded config");
    Ok((config, Some(path)))
}

/// Map a failure to the structured error shown to the user.
fn describe(err: &anyhow::Error) -> CliError {
    if let Some(retrieval) = err.downcast_ref::<RetrievalError>() {
        return CliError::from(retrieval);
    }
    let code = if err.to_string().starts_with(ErrorCode::ConfigParseError.code()) {
        ErrorCode::ConfigParseError
    } else {
        ErrorCode::InternalUnexpected
    };
    CliError {
        message: format!("{err:#}"),
        suggestion: code.hint().map(str::to_string),
        error_code: Some(code.code().to_string()),
    }
}

fn run(cli: Cli, output: OutputMode) -> anyhow::Result<()> {
    let (config, source) = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Search(args) => cmd::search::run_search(&args, config, output),
        Commands::Stats(args) => cmd::stats::run_stats(&args, config, output),
        Commands::Config => cmd::config::run_config(config, source, output),
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let output = resolve_output_mode(cli.format, cli.json);

    match run(cli, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let described = describe(&err);
            if let Err(render_err) = render_error(output, &described) {
                error!("failed to render error: {render_err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
