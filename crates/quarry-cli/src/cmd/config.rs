//! `quarry config`: print the effective engine configuration.

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Context;
use quarry_core::config::EngineConfig;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Debug, Serialize)]
pub struct ConfigOutput {
    /// File the configuration was read from, if any.
    pub source: Option<PathBuf>,
    pub valid: bool,
    pub config: EngineConfig,
}

/// Execute `quarry config`.
///
/// # Errors
///
/// Returns an error if the configuration fails validation or cannot be
/// rendered.
pub fn run_config(
    config: EngineConfig,
    source: Option<PathBuf>,
    output: OutputMode,
) -> anyhow::Result<()> {
    config.validate()?;
    let toml = toml::to_string_pretty(&config).context("Failed to render config as TOML")?;
    let result = ConfigOutput {
        source,
        valid: true,
        config,
    };
    render_mode(
        output,
        &result,
        |_, w| w.write_all(toml.as_bytes()),
        |out, w| render_pretty(out, &toml, w),
    )
}

fn render_pretty(out: &ConfigOutput, toml: &str, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Engine configuration")?;
    pretty_kv(
        w,
        "source",
        out.source
            .as_ref()
            .map_or_else(|| "built-in defaults".to_string(), |p| p.display().to_string()),
    )?;
    writeln!(w)?;
    w.write_all(toml.as_bytes())
}
