//! Shell completion scripts for the stem CLI

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory};
use clap_complete::{generate, generate_to, Shell};
use tracing::info;

use crate::cli::{output, Cli};

const BIN_NAME: &str = "stem";

/// Print a completion script for a shell
#[derive(Debug, Args)]
pub struct CompletionsCommand {
    #[arg(value_enum)]
    pub shell: Shell,

    /// Write the script into this directory under the shell's conventional file name
    #[arg(short = 'o', long = "out-dir", value_name = "DIR")]
    pub out_dir: Option<PathBuf>,
}

impl CompletionsCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(shell = %self.shell, "generating completions");

        match &self.out_dir {
            Some(dir) => {
                let path = write_script(self.shell, dir)?;
                if !cli.quiet {
                    output::success(&format!("Completions written to {}", path.display()));
                }
            }
            None => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(&script(self.shell))?;
                stdout.flush()?;
            }
        }
        Ok(())
    }
}

/// The completion script for `shell`
fn script(shell: Shell) -> Vec<u8> {
    let mut buf = Vec::new();
    generate(shell, &mut Cli::command(), BIN_NAME, &mut buf);
    buf
}

fn write_script(shell: Shell, dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    generate_to(shell, &mut Cli::command(), BIN_NAME, dir)
}
