//! Shell setup performed by `pvm init`.
//!
//! On Unix the user's shell profile gets a block that sources `<root>/env`
//! (where activation exports variables) and puts the active installation on
//! `PATH`. On Windows `<root>\active` is appended to the user `Path` in the
//! registry.
//!
//! ## Supported Shells
//!
//! - Bash: `~/.bashrc` or `~/.bash_profile`
//! - Zsh: `~/.zshrc`
//! - Fish: `~/.config/fish/config.fish`
//!
//! ## Configuration Format
//!
//! For bash/zsh:
//! ```bash
//! # pvm
//! [ -f "$HOME/.pvm/env" ] && . "$HOME/.pvm/env"
//! export PATH="$HOME/.pvm/active/bin:$HOME/.pvm/active:$PATH"
//! ```
//!
//! For fish:
//! ```fish
//! # pvm
//! test -f '/home/me/.pvm/env.fish'; and source '/home/me/.pvm/env.fish'
//! set -gx PATH '/home/me/.pvm/active/bin' '/home/me/.pvm/active' $PATH
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Marker comment identifying the block written by `pvm init`.
#[cfg(unix)]
const PVM_MARKER: &str = "# pvm";

/// Represents supported shell types.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
}

#[cfg(unix)]
impl Shell {
    /// Detects the user's shell from the SHELL environment variable.
    #[must_use]
    pub fn detect() -> Option<Self> {
        let shell_path = std::env::var("SHELL").ok()?;
        Self::from_path(&shell_path)
    }

    /// Parses a shell from a path string (e.g., "/bin/bash").
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let shell_name = Path::new(path).file_name()?.to_str()?;
        match shell_name {
            "bash" => Some(Self::Bash),
            "zsh" => Some(Self::Zsh),
            "fish" => Some(Self::Fish),
            _ => None,
        }
    }

    /// Returns the profile files to check for this shell.
    #[must_use]
    pub fn profile_candidates(self, home_dir: &Path) -> Vec<PathBuf> {
        match self {
            Self::Bash => vec![home_dir.join(".bashrc"), home_dir.join(".bash_profile")],
            Self::Zsh => vec![home_dir.join(".zshrc")],
            Self::Fish => vec![home_dir.join(".config").join("fish").join("config.fish")],
        }
    }

    /// Generates the profile block for a store rooted at `root`.
    #[must_use]
    pub fn profile_block(self, root: &Path) -> String {
        let active = root.join("active");
        let bin = active.join("bin");
        match self {
            Self::Bash | Self::Zsh => {
                let env = posix_quote(&root.join("env"));
                format!(
                    "\n{PVM_MARKER}\n[ -f {env} ] && . {env}\nexport PATH=\"{}:{}:$PATH\"\n",
                    posix_escape(&bin),
                    posix_escape(&active)
                )
            }
            Self::Fish => {
                let env = fish_quote(&super::platform_ops::fish_env_file(&root.join("env")));
                format!(
                    "\n{PVM_MARKER}\ntest -f {env}; and source {env}\nset -gx PATH {} {} $PATH\n",
                    fish_quote(&bin),
                    fish_quote(&active)
                )
            }
        }
    }

    /// Generates the source command for this shell's profile.
    #[must_use]
    pub fn source_command(self, profile_path: &Path) -> String {
        let _ = self;
        format!("source {}", profile_path.display())
    }
}

/// Escapes a path for use inside double quotes in POSIX shells.
#[cfg(unix)]
fn posix_escape(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "\\\\")
        .replace('$', "\\$")
        .replace('`', "\\`")
        .replace('"', "\\\"")
}

#[cfg(unix)]
fn posix_quote(path: &Path) -> String {
    format!("\"{}\"", posix_escape(path))
}

#[cfg(unix)]
fn fish_quote(path: &Path) -> String {
    format!(
        "'{}'",
        path.display().to_string().replace('\\', "\\\\").replace('\'', "\\'")
    )
}

/// Result of attempting to configure the shell.
#[derive(Debug)]
pub enum ConfigureResult {
    /// The configuration was written.
    Added {
        profile: PathBuf,
        source_command: String,
    },
    /// The configuration already exists.
    AlreadyConfigured { profile: PathBuf },
    /// No suitable profile file was found (Unix only, never returned on Windows).
    #[cfg(unix)]
    NoProfileFound,
    /// Shell could not be detected (Unix only, never returned on Windows).
    #[cfg(unix)]
    ShellNotDetected,
}

/// Adds the pvm block to the user's shell profile.
///
/// # Errors
///
/// Returns an error if the profile cannot be read or written. An unknown
/// shell or a missing profile is reported through the result instead.
#[cfg(unix)]
pub fn configure_shell(root: &Path) -> Result<ConfigureResult> {
    let Some(shell) = Shell::detect() else {
        return Ok(ConfigureResult::ShellNotDetected);
    };
    let Some(home_dir) = dirs::home_dir() else {
        return Ok(ConfigureResult::NoProfileFound);
    };
    configure_profile(shell, &home_dir, root)
}

#[cfg(unix)]
fn configure_profile(shell: Shell, home_dir: &Path, root: &Path) -> Result<ConfigureResult> {
    let candidates = shell.profile_candidates(home_dir);
    let Some(profile_path) = candidates.iter().find(|p| p.exists()).cloned() else {
        return Ok(ConfigureResult::NoProfileFound);
    };

    if is_configured(&profile_path)? {
        return Ok(ConfigureResult::AlreadyConfigured {
            profile: profile_path,
        });
    }

    append_to_file(&profile_path, &shell.profile_block(root))?;

    let source_command = shell.source_command(&profile_path);
    Ok(ConfigureResult::Added {
        profile: profile_path,
        source_command,
    })
}

/// Appends `<root>\active` to `HKEY_CURRENT_USER\Environment\Path`.
///
/// # Errors
///
/// Returns an error if registry operations fail.
#[cfg(windows)]
pub fn configure_shell(root: &Path) -> Result<ConfigureResult> {
    use winreg::RegKey;
    use winreg::enums::{HKEY_CURRENT_USER, KEY_READ, KEY_WRITE};

    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let env = hkcu
        .open_subkey_with_flags("Environment", KEY_READ | KEY_WRITE)
        .context("Failed to open HKCU\\Environment registry key")?;

    let current_path: String = env.get_value("Path").unwrap_or_default();
    let active = root.join("active");
    let active_str = active.to_string_lossy();

    let registry_path = PathBuf::from(r"Registry: HKCU\Environment\Path");

    if current_path
        .split(';')
        .any(|p| p.eq_ignore_ascii_case(&active_str))
    {
        return Ok(ConfigureResult::AlreadyConfigured {
            profile: registry_path,
        });
    }

    let new_path = if current_path.is_empty() {
        active_str.to_string()
    } else {
        format!("{current_path};{active_str}")
    };

    env.set_value("Path", &new_path)
        .context("Failed to update PATH in registry")?;

    Ok(ConfigureResult::Added {
        profile: registry_path,
        source_command: "Restart your terminal or log out and back in".to_string(),
    })
}

#[cfg(unix)]
fn is_configured(profile_path: &Path) -> Result<bool> {
    let content = std::fs::read_to_string(profile_path)
        .with_context(|| format!("Failed to read profile: {}", profile_path.display()))?;
    Ok(content.lines().any(|line| line.trim_end() == PVM_MARKER))
}

#[cfg(unix)]
fn append_to_file(path: &Path, content: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open profile for writing: {}", path.display()))?;

    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write to profile: {}", path.display()))?;

    Ok(())
}

/// Returns a human-readable message describing the configuration result.
#[must_use]
pub fn format_result_message(result: &ConfigureResult, root: &Path) -> String {
    match result {
        ConfigureResult::Added {
            profile,
            source_command,
        } => {
            format!(
                "Configured {} in {}\nRun '{}' to use the active PHP version.",
                root.join("active").display(),
                profile.display(),
                source_command
            )
        }
        ConfigureResult::AlreadyConfigured { profile } => {
            format!("Shell already configured in {}", profile.display())
        }
        #[cfg(unix)]
        ConfigureResult::NoProfileFound => {
            format!(
                "Could not find shell profile. Add this to it:\n{}",
                Shell::Bash.profile_block(root).trim()
            )
        }
        #[cfg(unix)]
        ConfigureResult::ShellNotDetected => {
            format!(
                "Could not detect shell. Add this to your profile:\n{}",
                Shell::Bash.profile_block(root).trim()
            )
        }
    }
}
