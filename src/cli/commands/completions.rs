//! Shell completions command implementation.

use crate::cli::{Cli, Shell};
use crate::error::Result;
use clap::CommandFactory;
use clap_complete::{generate, shells, Generator};
use std::io;

const BIN_NAME: &str = "projpack";

fn write<G: Generator>(generator: G) {
    generate(generator, &mut Cli::command(), BIN_NAME, &mut io::stdout());
}

/// Generate shell completions for the specified shell.
pub fn execute(shell: &Shell) -> Result<()> {
    match shell {
        Shell::Bash => write(shells::Bash),
        Shell::Zsh => write(shells::Zsh),
        Shell::Fish => write(shells::Fish),
        Shell::PowerShell => write(shells::PowerShell),
        Shell::Elvish => write(shells::Elvish),
    }
    Ok(())
}
