#![warn(clippy::pedantic)]

//! # pvm, a per-user PHP version manager
//!
//! `pvm` installs PHP releases from a release catalog into a private store
//! and switches the active version through a single `active` link.
//!
//! ## Subcommands
//!
//! - `install` - Install a PHP version
//! - `use` - Switch the active PHP version
//! - `list` - List installed versions
//! - `list-remote` - List versions available from the catalog
//! - `init` - Create the store and configure the shell
//!
//! ## Examples
//!
//! ```bash
//! pvm init
//! pvm install 8.2
//! pvm use 8.1
//! ```

mod commands;
mod config;
mod errors;
mod telemetry;
mod toolchain;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{init, install, list, list_remote, use_version};
use errors::PvmError;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("PVM_GIT_COMMIT"),
    " ",
    env!("PVM_BUILD_TARGET"),
    ")"
);

/// Per-user PHP version manager.
#[derive(Parser)]
#[command(
    name = "pvm",
    author,
    version,
    long_version = LONG_VERSION,
    about = "Install and switch between PHP versions",
    after_help = "\
ENVIRONMENT VARIABLES:
    PVM_HOME                Store directory (default: ~/.pvm, %APPDATA%\\pvm on Windows)
    PVM_DIST_SERVER         Release catalog base URL (default: https://windows.php.net/downloads/releases)
    PVM_LOG                 Log filter, e.g. 'pvm=debug'
    PVM_LOG_JSON            Emit logs as JSON"
)]
pub struct Cli {
    /// Print debug diagnostics to stderr.
    #[clap(long, short = 'v', global = true, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands for the pvm CLI.
#[derive(Subcommand)]
pub enum Commands {
    /// Install a PHP version.
    ///
    /// Resolves the version against the release catalog, downloads and
    /// verifies the archive and unpacks it. The first installed version is
    /// activated automatically.
    #[command(visible_alias = "i")]
    Install(install::InstallArgs),

    /// Switch the active PHP version.
    #[command(name = "use", visible_alias = "u")]
    Use(use_version::UseArgs),

    /// List installed PHP versions.
    #[command(visible_alias = "l")]
    List,

    /// List PHP versions available from the catalog.
    #[command(name = "list-remote", visible_aliases = ["downloadable", "d"])]
    ListRemote(list_remote::ListRemoteArgs),

    /// Create the store and configure the shell.
    #[command(visible_aliases = ["createdir", "c"])]
    Init(init::InitArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    if let Err(e) = run(cli).await {
        let exit_code = handle_error(&e);
        std::process::exit(exit_code);
    }
}

/// Prints the error on one line and returns the exit code for it.
///
/// Pipeline errors carry their own code; anything else exits with 1.
fn handle_error(e: &anyhow::Error) -> i32 {
    eprintln!("Error: {e:#}");
    e.downcast_ref::<PvmError>().map_or(1, PvmError::exit_code)
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Install(args) => install::execute(&args).await,
        Commands::Use(args) => use_version::execute(&args),
        Commands::List => list::execute(),
        Commands::ListRemote(args) => list_remote::execute(&args).await,
        Commands::Init(args) => init::execute(&args),
    }
}
