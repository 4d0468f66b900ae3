//! Command modules for the pvm CLI.
//!
//! - [`install`] - Install a PHP version
//! - [`use_version`] - Switch the active PHP version
//! - [`list`] - List installed PHP versions
//! - [`list_remote`] - List versions available from the catalog
//! - [`init`] - Create the store and configure the shell

pub mod init;
pub mod install;
pub mod list;
pub mod list_remote;
pub mod use_version;

use crate::toolchain::activation::Activated;

/// Prints the outcome of an activation, including a non-fatal
/// environment-variable failure.
fn report_activation(activated: &Activated, env_var: &str) {
    println!("Now using PHP {}", activated.version);
    if let Some(e) = &activated.env_error {
        eprintln!("Warning: could not set {env_var}: {e}");
    }
}
