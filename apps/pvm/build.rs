//! Build script for the pvm CLI.
//!
//! Embeds the short git commit and the target triple so `pvm --version`
//! can report exactly which build is running.

use std::process::Command;

fn main() {
    println!("cargo:rustc-env=PVM_GIT_COMMIT={}", git_short_commit());

    let target = std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=PVM_BUILD_TARGET={target}");

    if let Some(top) = git(&["rev-parse", "--show-toplevel"]) {
        println!("cargo:rerun-if-changed={top}/.git/HEAD");
    }
}

/// Runs git with the given arguments and returns trimmed stdout on success.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn git_short_commit() -> String {
    git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string())
}
