//! Use command for the pvm CLI.
//!
//! Switches the active PHP version to an installed one.
//!
//! ## Usage
//!
//! ```bash
//! pvm use 8.2.3    # Exact installed version
//! pvm use 8.2      # Highest installed version starting with "8.2"
//! ```

use anyhow::Result;
use clap::Args;

use crate::config::Settings;
use crate::toolchain::{ActivationManager, NativeOps, StorePaths};

/// Arguments for the use command.
#[derive(Args)]
pub struct UseArgs {
    /// Installed version, exact or a prefix.
    pub version: String,
}

/// Executes the use command.
///
/// # Errors
///
/// Returns an error if no installed version matches or the active pointer
/// cannot be replaced.
pub fn execute(args: &UseArgs) -> Result<()> {
    let paths = StorePaths::new()?;
    paths.ensure_layout()?;
    let settings = Settings::load(&paths.config_file())?;

    let ops = NativeOps::new(paths.env_file());
    let manager = ActivationManager::new(&paths, &ops, settings.env_var());
    let version = manager.resolve_installed(&args.version)?;

    if manager.current_active().as_deref() == Some(version.as_str()) {
        println!("PHP {version} is already active.");
        return Ok(());
    }

    let activated = manager.activate(&version)?;
    super::report_activation(&activated, settings.env_var());
    Ok(())
}
