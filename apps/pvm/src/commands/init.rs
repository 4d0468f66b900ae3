//! Init command for the pvm CLI.
//!
//! Prepares the store and the user's shell.
//!
//! ## Usage
//!
//! ```bash
//! pvm init
//! ```
//!
//! ## Behavior
//!
//! - Creates `<root>/php`, `<root>/downloads` and `<root>/locks`
//! - Writes a commented `config.toml` if none exists
//! - Unix: adds a block to the shell profile that sources `<root>/env` and
//!   puts the active version on `PATH`
//! - Windows: appends `<root>\active` to the user `Path`
//!
//! Running it again changes nothing.

use anyhow::Result;
use clap::Args;

use crate::config;
use crate::toolchain::StorePaths;
use crate::toolchain::shell::{configure_shell, format_result_message};

/// Arguments for the `init` command.
#[derive(Args)]
pub struct InitArgs {
    /// Only create the store; leave the shell profile alone.
    #[clap(long)]
    pub no_shell: bool,
}

/// Executes the `init` command.
///
/// # Errors
///
/// Returns an error if the store or the config file cannot be created.
pub fn execute(args: &InitArgs) -> Result<()> {
    let paths = StorePaths::new()?;
    let root = paths.ensure_layout()?;
    println!("Store ready at {}", root.display());

    let config_file = paths.config_file();
    if config::write_default(&config_file)? {
        println!("Created {}", config_file.display());
    }

    if args.no_shell {
        return Ok(());
    }

    match configure_shell(&paths.root) {
        Ok(result) => println!("{}", format_result_message(&result, &paths.root)),
        Err(e) => eprintln!("Warning: could not configure the shell automatically: {e:#}"),
    }

    Ok(())
}
