//! List command for the pvm CLI.
//!
//! Displays installed PHP versions and marks the active one.
//!
//! ## Usage
//!
//! ```bash
//! pvm list
//! ```
//!
//! ## Output Format
//!
//! ```text
//! Installed PHP versions:
//! * 8.2.3    (active, installed today)
//!   8.1.9    (installed 3 days ago)
//!   8.0.1    (incomplete)
//! ```

use anyhow::Result;

use crate::toolchain::{StorePaths, current_active};

/// Executes the list command.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn execute() -> Result<()> {
    let paths = StorePaths::new()?;
    let (complete, incomplete) = paths.scan_versions()?;
    let active = current_active(&paths);

    if complete.is_empty() && incomplete.is_empty() {
        println!("No PHP versions installed.");
        println!();
        println!("Run 'pvm install <version>' to install one.");
        return Ok(());
    }

    println!("Installed PHP versions:");

    for version in &complete {
        let is_active = active.as_deref() == Some(version.as_str());

        let mut info_parts = Vec::new();
        if is_active {
            info_parts.push("active".to_string());
        }
        if let Some(meta) = paths.read_metadata(version) {
            info_parts.push(format!("installed {}", meta.installed_ago()));
        }

        let marker = if is_active { "*" } else { " " };
        if info_parts.is_empty() {
            println!("{marker} {version}");
        } else {
            println!("{marker} {version}    ({})", info_parts.join(", "));
        }
    }

    for version in &incomplete {
        println!("  {version}    (incomplete)");
    }

    if active.is_none() && !complete.is_empty() {
        println!();
        println!("No active version. Run 'pvm use <version>' to pick one.");
    }

    Ok(())
}
