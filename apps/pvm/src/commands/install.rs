//! Install command for the pvm CLI.
//!
//! Resolves a version spec against the release catalog, downloads and
//! verifies the matching archive and unpacks it into the store.
//!
//! ## Usage
//!
//! ```bash
//! pvm install 8.2        # Highest release starting with "8.2"
//! pvm install 8.2.3      # Exact release
//! pvm install 8.3 --use  # Install and make it active
//! ```
//!
//! The first installed version becomes active automatically.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use crate::config::Settings;
use crate::toolchain::{
    ActivationManager, HttpTransport, InstallState, Installer, NativeOps, StorePaths,
    text_progress,
};

/// Arguments for the install command.
#[derive(Args)]
pub struct InstallArgs {
    /// Version to install, exact ("8.2.3") or a prefix ("8.2").
    pub version: String,

    /// Activate the version after installing it.
    #[clap(long = "use")]
    pub activate: bool,
}

/// Executes the install command.
///
/// # Errors
///
/// Returns an error if resolution, download, verification, extraction or
/// activation fails.
pub async fn execute(args: &InstallArgs) -> Result<()> {
    let paths = StorePaths::new()?;
    paths.ensure_layout()?;
    let settings = Settings::load(&paths.config_file())?;
    let platform = settings.platform()?;
    let transport = HttpTransport::new()?;
    let base_url = settings.dist_server();

    println!("Resolving PHP {} for {platform}...", args.version);
    let installed = Installer::new(&paths, &transport, &base_url, platform)
        .with_progress(text_progress())
        .on_state(Arc::new(print_state))
        .install(&args.version)
        .await?;

    if installed.newly_installed {
        println!(
            "PHP {} installed to {}",
            installed.version,
            installed.path.display()
        );
    } else {
        println!("PHP {} is already installed.", installed.version);
    }

    let ops = NativeOps::new(paths.env_file());
    let activation = ActivationManager::new(&paths, &ops, settings.env_var());
    let current = activation.current_active();

    if args.activate || current.is_none() {
        let activated = activation.activate(&installed.version)?;
        super::report_activation(&activated, settings.env_var());
    } else if current.as_deref() != Some(installed.version.as_str()) {
        println!("Run 'pvm use {}' to switch to it.", installed.version);
    }

    Ok(())
}

fn print_state(state: &InstallState) {
    match state {
        InstallState::Downloading { url } => println!("Downloading {url}..."),
        InstallState::Verifying { .. } => println!("Verifying checksum..."),
        InstallState::Extracting => println!("Extracting..."),
        InstallState::Resolving
        | InstallState::Finalizing
        | InstallState::Done { .. }
        | InstallState::Failed { .. } => {}
    }
}
