//! Logger setup

use std::{fs::OpenOptions, path::Path};

use anyhow::Context as _;

/// Send standard error output to the end of a file
fn redirect_stderr(path: &Path) -> anyhow::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    nix::unistd::dup2_stderr(&file)?;
    Ok(())
}

/// Init logger, writing to standard error, or appending to a file if set
pub(crate) fn init(level: log::Level, path: Option<&Path>) -> anyhow::Result<()> {
    if let Some(path) = path {
        redirect_stderr(path).with_context(|| format!("Failed to open log file {path:?}"))?;
    }
    simple_logger::SimpleLogger::new()
        .with_level(level.to_level_filter())
        .with_colors(path.is_none())
        .init()
        .context("Failed to init logger")
}
