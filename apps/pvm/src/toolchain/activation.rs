//! The active-version pointer.
//!
//! `<root>/active` is a directory link to exactly one complete version, or
//! absent. It is only ever replaced through [`PlatformOps::replace_link`],
//! which never leaves a half-written link; `locks/active.lock` serialises the
//! check-then-swap sequence across processes.

use super::catalog::{normalize_spec, select_highest};
use super::lock::StoreLock;
use super::paths::StorePaths;
use super::platform_ops::PlatformOps;
use crate::errors::{PvmError, PvmResult};

/// Default name of the variable pointing at the active installation.
pub const DEFAULT_ENV_VAR: &str = "PHP_SYMLINK";

/// Result of a successful activation.
#[derive(Debug)]
pub struct Activated {
    pub version: String,
    /// Set when the pointer moved but the environment variable could not be
    /// persisted.
    pub env_error: Option<std::io::Error>,
}

/// Switches and reports the active version.
pub struct ActivationManager<'a> {
    paths: &'a StorePaths,
    ops: &'a dyn PlatformOps,
    env_var: String,
}

impl<'a> ActivationManager<'a> {
    #[must_use]
    pub fn new(paths: &'a StorePaths, ops: &'a dyn PlatformOps, env_var: &str) -> Self {
        Self {
            paths,
            ops,
            env_var: env_var.to_string(),
        }
    }

    /// Points `active` at `version`.
    ///
    /// On failure the previous pointer is left untouched.
    ///
    /// # Errors
    ///
    /// - `NotInstalled` if `version` has no completeness marker
    /// - `Activation` if the pointer cannot be replaced
    /// - `Io` if the activation lock cannot be taken
    pub fn activate(&self, version: &str) -> PvmResult<Activated> {
        if !self.paths.is_complete(version) {
            return Err(PvmError::not_installed(version));
        }

        let _lock = StoreLock::acquire(&self.paths.active_lock())?;
        // Re-checked under the lock.
        if !self.paths.is_complete(version) {
            return Err(PvmError::not_installed(version));
        }

        let target = self.paths.version_dir(version);
        self.ops
            .replace_link(&self.paths.active, &target)
            .map_err(|e| {
                PvmError::activation(
                    format!(
                        "failed to point {} at {}",
                        self.paths.active.display(),
                        target.display()
                    ),
                    Some(e),
                )
            })?;
        tracing::info!(%version, "activated");

        let env_error = self.export_env().err();
        if let Some(e) = &env_error {
            tracing::warn!(var = %self.env_var, error = %e, "could not set environment variable");
        }

        Ok(Activated {
            version: version.to_string(),
            env_error,
        })
    }

    fn export_env(&self) -> std::io::Result<()> {
        let value = self.paths.active.to_string_lossy();
        self.ops.set_env_var(&self.env_var, &value)
    }

    /// The version `active` currently resolves to.
    ///
    /// A missing pointer, or one whose target directory is gone, yields `None`.
    #[must_use]
    pub fn current_active(&self) -> Option<String> {
        current_active(self.paths)
    }

    /// Picks the installed, complete version for `spec`: the exact version if
    /// present, otherwise the highest one matching the prefix.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` for an empty spec, `NotInstalled` when nothing
    /// installed matches, and `Io` if the store cannot be read.
    pub fn resolve_installed(&self, spec: &str) -> PvmResult<String> {
        let spec = normalize_spec(spec)?;
        let installed = self.paths.installed_versions()?;
        if installed.iter().any(|v| v == spec) {
            return Ok(spec.to_string());
        }
        select_highest(spec, installed.iter().map(String::as_str))
            .map(str::to_string)
            .ok_or_else(|| PvmError::not_installed(spec))
    }
}

/// Reads the active pointer without any platform capabilities.
#[must_use]
pub fn current_active(paths: &StorePaths) -> Option<String> {
    let target = std::fs::read_link(&paths.active).ok()?;
    let version = target.file_name()?.to_str()?.to_string();
    paths.version_dir(&version).is_dir().then_some(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::paths::InstallMetadata;
    use std::io;
    use std::path::Path;
    use std::sync::Mutex;

    fn store_with(versions: &[&str]) -> (tempfile::TempDir, StorePaths) {
        let temp = tempfile::tempdir().unwrap();
        let paths = StorePaths::with_root(temp.path().to_path_buf());
        paths.ensure_layout().unwrap();
        for version in versions {
            std::fs::create_dir_all(paths.version_dir(version)).unwrap();
            paths
                .write_marker(&InstallMetadata::now(version, "https://example.com/php.zip", "sha256:00"))
                .unwrap();
        }
        (temp, paths)
    }

    /// Records calls and can be told to fail; links are not touched.
    #[derive(Default)]
    struct RecordingOps {
        fail_link: bool,
        fail_env: bool,
        env: Mutex<Vec<(String, String)>>,
    }

    impl PlatformOps for RecordingOps {
        fn replace_link(&self, _link: &Path, _target: &Path) -> io::Result<()> {
            if self.fail_link {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            Ok(())
        }

        fn set_env_var(&self, name: &str, value: &str) -> io::Result<()> {
            if self.fail_env {
                return Err(io::Error::other("registry unavailable"));
            }
            self.env.lock().unwrap().push((name.to_string(), value.to_string()));
            Ok(())
        }
    }

    #[test]
    fn activate_requires_complete_install() {
        let (_temp, paths) = store_with(&["8.2.3"]);
        std::fs::create_dir_all(paths.version_dir("8.1.0")).unwrap();
        let ops = RecordingOps::default();
        let manager = ActivationManager::new(&paths, &ops, DEFAULT_ENV_VAR);

        let err = manager.activate("8.1.0").unwrap_err();
        assert!(matches!(err, PvmError::NotInstalled { .. }));

        let err = manager.activate("7.4.0").unwrap_err();
        assert!(matches!(err, PvmError::NotInstalled { .. }));
    }

    #[test]
    fn activate_exports_env_var() {
        let (_temp, paths) = store_with(&["8.2.3"]);
        let ops = RecordingOps::default();
        let manager = ActivationManager::new(&paths, &ops, "PHP_HOME");

        let activated = manager.activate("8.2.3").unwrap();

        assert!(activated.env_error.is_none());
        let env = ops.env.lock().unwrap();
        assert_eq!(
            *env,
            vec![("PHP_HOME".to_string(), paths.active.to_string_lossy().into_owned())]
        );
    }

    #[test]
    fn link_failure_is_activation_error() {
        let (_temp, paths) = store_with(&["8.2.3"]);
        let ops = RecordingOps {
            fail_link: true,
            ..RecordingOps::default()
        };
        let manager = ActivationManager::new(&paths, &ops, DEFAULT_ENV_VAR);

        let err = manager.activate("8.2.3").unwrap_err();

        assert!(matches!(err, PvmError::Activation { .. }));
        assert!(ops.env.lock().unwrap().is_empty());
    }

    #[test]
    fn env_failure_does_not_undo_activation() {
        let (_temp, paths) = store_with(&["8.2.3"]);
        let ops = RecordingOps {
            fail_env: true,
            ..RecordingOps::default()
        };
        let manager = ActivationManager::new(&paths, &ops, DEFAULT_ENV_VAR);

        let activated = manager.activate("8.2.3").unwrap();

        assert_eq!(activated.version, "8.2.3");
        assert!(activated.env_error.is_some());
    }

    #[test]
    fn resolve_installed_prefers_exact_then_highest_prefix() {
        let (_temp, paths) = store_with(&["8.2.1", "8.2.3", "8.1.9", "8.20.0"]);
        std::fs::create_dir_all(paths.version_dir("8.2.9")).unwrap();
        let ops = RecordingOps::default();
        let manager = ActivationManager::new(&paths, &ops, DEFAULT_ENV_VAR);

        assert_eq!(manager.resolve_installed("8.2.1").unwrap(), "8.2.1");
        assert_eq!(manager.resolve_installed("8.2").unwrap(), "8.20.0");
        assert_eq!(manager.resolve_installed("8.2.").unwrap(), "8.2.3");
        assert_eq!(manager.resolve_installed("8.1").unwrap(), "8.1.9");
        assert!(matches!(
            manager.resolve_installed("7").unwrap_err(),
            PvmError::NotInstalled { .. }
        ));
    }

    #[cfg(unix)]
    mod native {
        use super::*;
        use crate::toolchain::platform_ops::NativeOps;

        #[test]
        fn current_active_follows_swaps() {
            let (_temp, paths) = store_with(&["8.1.9", "8.2.3"]);
            let ops = NativeOps::new(paths.env_file());
            let manager = ActivationManager::new(&paths, &ops, DEFAULT_ENV_VAR);

            assert_eq!(manager.current_active(), None);
            manager.activate("8.1.9").unwrap();
            assert_eq!(manager.current_active().as_deref(), Some("8.1.9"));
            manager.activate("8.2.3").unwrap();
            assert_eq!(manager.current_active().as_deref(), Some("8.2.3"));
            assert!(paths.active.join(".complete").is_file());
        }

        #[test]
        fn failed_activation_keeps_previous_pointer() {
            let (_temp, paths) = store_with(&["8.1.9"]);
            let ops = NativeOps::new(paths.env_file());
            let manager = ActivationManager::new(&paths, &ops, DEFAULT_ENV_VAR);
            manager.activate("8.1.9").unwrap();

            let failing = RecordingOps {
                fail_link: true,
                ..RecordingOps::default()
            };
            std::fs::create_dir_all(paths.version_dir("8.2.3")).unwrap();
            paths
                .write_marker(&InstallMetadata::now("8.2.3", "u", "d"))
                .unwrap();
            let err = ActivationManager::new(&paths, &failing, DEFAULT_ENV_VAR)
                .activate("8.2.3")
                .unwrap_err();

            assert!(matches!(err, PvmError::Activation { .. }));
            assert_eq!(manager.current_active().as_deref(), Some("8.1.9"));
        }

        #[test]
        fn dangling_pointer_reads_as_none() {
            let (_temp, paths) = store_with(&["8.1.9"]);
            let ops = NativeOps::new(paths.env_file());
            let manager = ActivationManager::new(&paths, &ops, DEFAULT_ENV_VAR);
            manager.activate("8.1.9").unwrap();

            std::fs::remove_dir_all(paths.version_dir("8.1.9")).unwrap();

            assert_eq!(manager.current_active(), None);
        }

        #[test]
        fn concurrent_activations_never_expose_an_empty_pointer() {
            let (_temp, paths) = store_with(&["8.1.9", "8.2.3"]);
            let ops = NativeOps::new(paths.env_file());
            let manager = ActivationManager::new(&paths, &ops, DEFAULT_ENV_VAR);
            manager.activate("8.1.9").unwrap();

            let done = std::sync::atomic::AtomicBool::new(false);
            std::thread::scope(|scope| {
                for version in ["8.1.9", "8.2.3"] {
                    let manager = &manager;
                    scope.spawn(move || {
                        for _ in 0..50 {
                            manager.activate(version).unwrap();
                        }
                    });
                }
                let reader = scope.spawn(|| {
                    let mut reads = 0;
                    while !done.load(std::sync::atomic::Ordering::Relaxed) || reads < 100 {
                        let current = current_active(&paths);
                        assert!(
                            matches!(current.as_deref(), Some("8.1.9" | "8.2.3")),
                            "observed {current:?}"
                        );
                        reads += 1;
                    }
                });
                std::thread::sleep(std::time::Duration::from_millis(50));
                done.store(true, std::sync::atomic::Ordering::Relaxed);
                reader.join().unwrap();
            });
        }
    }
}
