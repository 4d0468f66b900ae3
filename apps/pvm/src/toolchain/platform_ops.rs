//! OS-specific primitives used by activation.
//!
//! The activation logic only talks to [`PlatformOps`]; everything that differs
//! between operating systems (how a directory link is replaced, where a
//! persistent user environment variable lives) is implemented here.
//!
//! | Operation       | Unix                                   | Windows                               |
//! |-----------------|----------------------------------------|---------------------------------------|
//! | `replace_link`  | symlink under a temp name + `rename`   | dir symlink + rename-aside swap       |
//! | `set_env_var`   | `export` line in `<root>/env`          | `HKCU\Environment` registry value     |
//!
//! On Windows a directory link cannot be renamed over an existing one, so the
//! swap moves the old link aside first; a reader racing the swap may briefly
//! find no link. Callers serialise swaps with the active lock.

use std::io;
use std::path::{Path, PathBuf};

/// Capabilities activation needs from the operating system.
pub trait PlatformOps: Send + Sync {
    /// Makes `link` a directory link to `target`, replacing any existing link.
    ///
    /// On failure the previous link must be left as it was.
    fn replace_link(&self, link: &Path, target: &Path) -> io::Result<()>;

    /// Persists a user-level environment variable for future shells.
    fn set_env_var(&self, name: &str, value: &str) -> io::Result<()>;
}

/// The implementation for the host operating system.
#[derive(Debug, Clone)]
pub struct NativeOps {
    /// POSIX shell file receiving `export` lines (Unix only).
    #[cfg_attr(windows, allow(dead_code))]
    env_file: PathBuf,
}

impl NativeOps {
    #[must_use]
    pub fn new(env_file: PathBuf) -> Self {
        Self { env_file }
    }
}

/// A sibling path of `link` that no other process will pick.
fn temp_sibling(link: &Path, tag: &str) -> PathBuf {
    let name = link.file_name().unwrap_or_default().to_string_lossy();
    link.with_file_name(format!(
        ".{name}.{tag}-{}-{:08x}",
        std::process::id(),
        rand::random::<u32>()
    ))
}

/// Link target expressed relative to the link's directory when possible,
/// so the store stays valid if the root is moved.
fn link_target(link: &Path, target: &Path) -> PathBuf {
    link.parent()
        .and_then(|dir| target.strip_prefix(dir).ok())
        .map_or_else(|| target.to_path_buf(), Path::to_path_buf)
}

#[cfg(unix)]
impl PlatformOps for NativeOps {
    fn replace_link(&self, link: &Path, target: &Path) -> io::Result<()> {
        let temp = temp_sibling(link, "new");
        std::os::unix::fs::symlink(link_target(link, target), &temp)?;
        // rename(2) replaces the old symlink in one step.
        if let Err(e) = std::fs::rename(&temp, link) {
            let _ = std::fs::remove_file(&temp);
            return Err(e);
        }
        Ok(())
    }

    fn set_env_var(&self, name: &str, value: &str) -> io::Result<()> {
        let escaped = value
            .replace('\\', "\\\\")
            .replace('$', "\\$")
            .replace('`', "\\`")
            .replace('"', "\\\"");
        upsert_line(
            &self.env_file,
            &format!("export {name}="),
            &format!("export {name}=\"{escaped}\""),
        )?;

        let fish_value = value.replace('\\', "\\\\").replace('\'', "\\'");
        upsert_line(
            &fish_env_file(&self.env_file),
            &format!("set -gx {name} "),
            &format!("set -gx {name} '{fish_value}'"),
        )
    }
}

/// Companion of the POSIX env file for the fish shell.
#[must_use]
pub fn fish_env_file(env_file: &Path) -> PathBuf {
    env_file.with_extension("fish")
}

/// Replaces the line starting with `prefix` in `path`, or appends `line`.
///
/// The file is rewritten through a temporary file and a rename.
#[cfg(unix)]
fn upsert_line(path: &Path, prefix: &str, line: &str) -> io::Result<()> {
    let current = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let mut lines: Vec<&str> = current.lines().filter(|l| !l.starts_with(prefix)).collect();
    lines.push(line);
    let mut updated = lines.join("\n");
    updated.push('\n');

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = temp_sibling(path, "tmp");
    std::fs::write(&temp, updated)?;
    std::fs::rename(&temp, path)
}

#[cfg(windows)]
impl PlatformOps for NativeOps {
    fn replace_link(&self, link: &Path, target: &Path) -> io::Result<()> {
        let temp = temp_sibling(link, "new");
        std::os::windows::fs::symlink_dir(target, &temp).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("{e} (creating directory links requires Developer Mode or an elevated shell)"),
            )
        })?;

        let aside = temp_sibling(link, "old");
        let had_link = std::fs::symlink_metadata(link).is_ok();
        if had_link {
            if let Err(e) = std::fs::rename(link, &aside) {
                let _ = std::fs::remove_dir(&temp);
                return Err(e);
            }
        }

        if let Err(e) = std::fs::rename(&temp, link) {
            if had_link {
                let _ = std::fs::rename(&aside, link);
            }
            let _ = std::fs::remove_dir(&temp);
            return Err(e);
        }

        if had_link {
            let _ = std::fs::remove_dir(&aside);
        }
        Ok(())
    }

    fn set_env_var(&self, name: &str, value: &str) -> io::Result<()> {
        use winreg::RegKey;
        use winreg::enums::{HKEY_CURRENT_USER, KEY_READ, KEY_WRITE};

        let hkcu = RegKey::predef(HKEY_CURRENT_USER);
        let env = hkcu.open_subkey_with_flags("Environment", KEY_READ | KEY_WRITE)?;
        env.set_value(name, &value.to_string())
    }
}
