//! List-remote command for the pvm CLI.
//!
//! Lists the versions published in the release catalog, marking the ones
//! with a build for this platform.
//!
//! ## Usage
//!
//! ```bash
//! pvm list-remote          # Text output
//! pvm list-remote --json   # JSON output
//! ```
//!
//! ## Output Format
//!
//! ```text
//! Available PHP versions:
//!
//!   8.3.1 [windows-x64-ts, windows-x64-nts] *
//!   8.2.3 [windows-x64-ts] * (installed)
//!   8.1.9 [windows-x86-ts]
//!
//!   * = available for current platform (windows-x64-ts)
//! ```

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::config::Settings;
use crate::toolchain::catalog::{Catalog, Release};
use crate::toolchain::{CatalogResolver, HttpTransport, PlatformInfo, StorePaths};

/// Arguments for the list-remote command.
#[derive(Args)]
pub struct ListRemoteArgs {
    /// Show versions in JSON format.
    #[clap(long, short = 'j')]
    pub json: bool,
}

/// Version information for JSON output.
#[derive(Debug, Clone, Serialize)]
struct VersionInfo {
    version: String,
    platforms: Vec<String>,
    available_for_current: bool,
    installed: bool,
}

/// Executes the list-remote command.
///
/// # Errors
///
/// Returns an error if the catalog cannot be fetched or parsed.
pub async fn execute(args: &ListRemoteArgs) -> Result<()> {
    let paths = StorePaths::new()?;
    let settings = Settings::load(&paths.config_file())?;
    let platform = settings.platform()?;
    let transport = HttpTransport::new()?;
    let resolver = CatalogResolver::new(&transport, &settings.dist_server());

    let catalog = resolver
        .fetch_catalog()
        .await
        .with_context(|| format!("Failed to fetch {}", resolver.releases_url()))?;

    let infos = version_infos(&catalog, &platform, |v| paths.is_complete(v));
    if args.json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
    } else {
        output_text(&infos, &platform);
    }
    Ok(())
}

fn version_infos(
    catalog: &Catalog,
    platform: &PlatformInfo,
    is_installed: impl Fn(&str) -> bool,
) -> Vec<VersionInfo> {
    catalog
        .sorted()
        .into_iter()
        .map(|release: &Release| VersionInfo {
            version: release.version.clone(),
            platforms: release.artifacts.keys().map(ToString::to_string).collect(),
            available_for_current: release.artifact_for(platform).is_some(),
            installed: is_installed(&release.version),
        })
        .collect()
}

fn output_text(infos: &[VersionInfo], platform: &PlatformInfo) {
    if infos.is_empty() {
        println!("No PHP versions found in the catalog.");
        return;
    }

    println!("Available PHP versions:");
    println!();
    for info in infos {
        let available = if info.available_for_current { " *" } else { "" };
        let installed = if info.installed { " (installed)" } else { "" };
        println!(
            "  {} [{}]{available}{installed}",
            info.version,
            info.platforms.join(", ")
        );
    }
    println!();
    println!("  * = available for current platform ({platform})");
}
