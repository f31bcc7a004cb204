//! Man page and shell completion generation

use std::{io, path::Path};

use clap::{CommandFactory as _, ValueEnum as _};
use clap_complete::Shell;

use crate::cl;

/// Generate man pages into the target directory
pub(crate) fn generate_man_pages(dir: &Path) -> anyhow::Result<()> {
    let cmd = cl::Args::command().name(env!("CARGO_BIN_NAME"));
    clap_mangen::generate_to(cmd, dir)?;
    Ok(())
}

/// Generate shell completions
///
/// If `shell` is specified, generates only for that shell.
/// If `dir` is specified, generates all completions into that directory.
pub(crate) fn generate_shell_completions(
    shell: Option<Shell>,
    dir: Option<&Path>,
) -> anyhow::Result<()> {
    let name = env!("CARGO_BIN_NAME");
    let mut cmd = cl::Args::command().name(name);

    if let Some(shell) = shell {
        clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
    } else if let Some(dir) = dir {
        for shell_i in Shell::value_variants() {
            clap_complete::generate_to(*shell_i, &mut cmd, name, dir)?;
        }
    }

    Ok(())
}
