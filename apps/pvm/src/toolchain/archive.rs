//! Archive extraction for PHP builds.
//!
//! Supports ZIP (the windows.php.net format) and `.tar.gz`/`.tgz`. When every
//! entry lives under one top-level folder, that folder is stripped, so both
//! `php-8.2.3/php.exe` and `php.exe` end up as `<dest>/php.exe`.
//!
//! Entries with absolute paths or `..` components are refused. Tar symlinks
//! must point inside the destination, hard links are refused, and every
//! output path is checked against the real destination before it is written,
//! so a crafted archive cannot write outside the destination directory.

use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use crate::errors::{PvmError, PvmResult};

/// Extracts an archive, choosing the format from the file name.
///
/// # Errors
///
/// Returns `Extraction` if the archive is corrupt, uses an unsupported
/// format, contains unsafe paths, or cannot be written out.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> PvmResult<()> {
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive_path, dest_dir)
    } else if name.ends_with(".zip") {
        extract_zip(archive_path, dest_dir)
    } else {
        Err(PvmError::extraction(format!(
            "unsupported archive format: {}",
            archive_path.display()
        )))
    }
}

fn io_failure(what: String) -> impl FnOnce(std::io::Error) -> PvmError {
    move |e| PvmError::extraction_with_source(what, e)
}

fn ensure_safe(entry_path: &Path) -> PvmResult<()> {
    if entry_path.is_absolute()
        || entry_path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(PvmError::extraction(format!(
            "refusing to extract path outside the target: {}",
            entry_path.display()
        )));
    }
    Ok(())
}

/// Lexically resolves `path` against the destination root, returning `None`
/// when it climbs above it.
fn resolve_inside(path: &Path) -> Option<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

/// Refuses a symlink at `relative_path` whose target leaves the destination.
fn ensure_link_inside(relative_path: &Path, target: &Path) -> PvmResult<()> {
    let base = relative_path.parent().unwrap_or_else(|| Path::new(""));
    if target.is_absolute() || resolve_inside(&base.join(target)).is_none() {
        return Err(PvmError::extraction(format!(
            "refusing symlink {} pointing outside the target: {}",
            relative_path.display(),
            target.display()
        )));
    }
    Ok(())
}

/// Checks that the nearest existing ancestor of `path` resolves under `root`.
///
/// Catches writes that would pass through a symlink planted by an earlier
/// entry. `root` must already be canonical.
fn ensure_under_root(root: &Path, path: &Path) -> PvmResult<()> {
    let mut existing = path;
    while std::fs::symlink_metadata(existing).is_err() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }
    let real = existing.canonicalize().map_err(io_failure(format!(
        "failed to resolve {}",
        existing.display()
    )))?;
    if real.starts_with(root) {
        Ok(())
    } else {
        Err(PvmError::extraction(format!(
            "refusing to extract through a link outside the target: {}",
            path.display()
        )))
    }
}

/// Maps an entry path to its output path relative to the destination, or
/// `None` if the entry is the stripped root folder itself.
fn relative_target(entry_path: &Path, strip_prefix: Option<&Path>) -> Option<PathBuf> {
    match strip_prefix.map(|prefix| entry_path.strip_prefix(prefix)) {
        Some(Ok(p)) if p.as_os_str().is_empty() => None,
        Some(Ok(p)) => Some(p.to_path_buf()),
        Some(Err(_)) | None => Some(entry_path.to_path_buf()),
    }
}

fn create_dir(path: &Path) -> PvmResult<()> {
    std::fs::create_dir_all(path).map_err(io_failure(format!(
        "failed to create directory {}",
        path.display()
    )))
}

/// Extracts a ZIP archive to the destination directory.
///
/// # Errors
///
/// See [`extract_archive`].
pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> PvmResult<()> {
    let file = std::fs::File::open(archive_path)
        .map_err(io_failure(format!("failed to open {}", archive_path.display())))?;

    let mut archive = zip::ZipArchive::new(file).map_err(|e| {
        PvmError::extraction_with_source(format!("not a valid ZIP: {}", archive_path.display()), e)
    })?;

    create_dir(dest_dir)?;

    let strip_prefix = find_common_root_folder(&mut archive);

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| {
            PvmError::extraction_with_source(format!("failed to read archive entry {i}"), e)
        })?;

        let entry_path = entry.enclosed_name().ok_or_else(|| {
            PvmError::extraction(format!("unsafe entry path in archive: {}", entry.name()))
        })?;
        ensure_safe(&entry_path)?;

        let Some(relative_path) = relative_target(&entry_path, strip_prefix.as_deref()) else {
            continue;
        };
        let output_path = dest_dir.join(&relative_path);

        if entry.is_dir() {
            create_dir(&output_path)?;
            continue;
        }

        if let Some(parent) = output_path.parent() {
            create_dir(parent)?;
        }

        let mut outfile = std::fs::File::create(&output_path)
            .map_err(io_failure(format!("failed to create {}", output_path.display())))?;
        std::io::copy(&mut entry, &mut outfile)
            .map_err(io_failure(format!("failed to extract {}", output_path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let permissions = std::fs::Permissions::from_mode(mode & 0o777);
                std::fs::set_permissions(&output_path, permissions).map_err(io_failure(
                    format!("failed to set permissions on {}", output_path.display()),
                ))?;
            }
        }
    }

    Ok(())
}

/// Extracts a tar.gz archive to the destination directory.
///
/// # Errors
///
/// See [`extract_archive`].
pub fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> PvmResult<()> {
    create_dir(dest_dir)?;
    let root = dest_dir
        .canonicalize()
        .map_err(io_failure(format!("failed to resolve {}", dest_dir.display())))?;

    let strip_prefix = find_common_root_folder_tar(archive_path)?;

    let file = std::fs::File::open(archive_path)
        .map_err(io_failure(format!("failed to open {}", archive_path.display())))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let entries = archive
        .entries()
        .map_err(io_failure(format!("failed to read {}", archive_path.display())))?;

    for entry in entries {
        let mut entry =
            entry.map_err(io_failure(format!("corrupt entry in {}", archive_path.display())))?;

        let entry_path = entry
            .path()
            .map_err(io_failure("invalid entry path".to_string()))?
            .into_owned();
        ensure_safe(&entry_path)?;

        let Some(relative_path) = relative_target(&entry_path, strip_prefix.as_deref()) else {
            continue;
        };
        let output_path = root.join(&relative_path);
        ensure_under_root(&root, &output_path)?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                create_dir(&output_path)?;
                continue;
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()
                    .map_err(io_failure("invalid symlink target".to_string()))?
                    .ok_or_else(|| {
                        PvmError::extraction(format!(
                            "symlink {} has no target",
                            entry_path.display()
                        ))
                    })?;
                ensure_link_inside(&relative_path, &target)?;
            }
            EntryType::Link => {
                return Err(PvmError::extraction(format!(
                    "refusing hard link entry: {}",
                    entry_path.display()
                )));
            }
            _ => {}
        }

        if let Some(parent) = output_path.parent() {
            create_dir(parent)?;
        }

        entry
            .unpack(&output_path)
            .map_err(io_failure(format!("failed to extract {}", output_path.display())))?;
    }

    Ok(())
}

/// Folds entry paths into their common top-level folder.
///
/// Returns `Some(prefix)` only if all entries start with the same component
/// AND at least one entry is nested below it; a flat archive holding a single
/// file keeps that file.
#[derive(Default)]
struct RootFinder {
    common_root: Option<PathBuf>,
    has_nested_entries: bool,
    diverged: bool,
}

impl RootFinder {
    fn observe(&mut self, path: &Path) {
        if self.diverged {
            return;
        }
        if path.components().count() > 1 {
            self.has_nested_entries = true;
        }
        let Some(first) = path.components().next() else {
            return;
        };
        let root = PathBuf::from(first.as_os_str());
        match &self.common_root {
            None => self.common_root = Some(root),
            Some(existing) if existing != &root => self.diverged = true,
            Some(_) => {}
        }
    }

    fn finish(self) -> Option<PathBuf> {
        if self.diverged || !self.has_nested_entries {
            None
        } else {
            self.common_root
        }
    }
}

fn find_common_root_folder<R: Read + Seek>(archive: &mut zip::ZipArchive<R>) -> Option<PathBuf> {
    let mut finder = RootFinder::default();
    for i in 0..archive.len() {
        let entry = archive.by_index(i).ok()?;
        finder.observe(&entry.enclosed_name()?);
    }
    finder.finish()
}

fn find_common_root_folder_tar(archive_path: &Path) -> PvmResult<Option<PathBuf>> {
    let file = std::fs::File::open(archive_path)
        .map_err(io_failure(format!("failed to open {}", archive_path.display())))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut finder = RootFinder::default();
    let entries = archive
        .entries()
        .map_err(io_failure(format!("failed to read {}", archive_path.display())))?;
    for entry in entries {
        let entry =
            entry.map_err(io_failure(format!("corrupt entry in {}", archive_path.display())))?;
        let path = entry
            .path()
            .map_err(io_failure("invalid entry path".to_string()))?;
        finder.observe(&path);
    }
    Ok(finder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn extract_zip_flat_layout() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("php.zip");
        write_zip(
            &archive,
            &[("php.exe", b"exe"), ("php.ini-development", b"ini"), ("ext/php_curl.dll", b"dll")],
        );

        let dest = temp.path().join("out");
        extract_archive(&archive, &dest).unwrap();

        assert!(dest.join("php.exe").is_file());
        assert!(dest.join("ext").join("php_curl.dll").is_file());
    }

    #[test]
    fn extract_zip_strips_common_root_folder() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("php.zip");
        write_zip(
            &archive,
            &[("php-8.2.3/php.exe", b"exe"), ("php-8.2.3/ext/php_curl.dll", b"dll")],
        );

        let dest = temp.path().join("out");
        extract_zip(&archive, &dest).unwrap();

        assert!(dest.join("php.exe").is_file());
        assert!(dest.join("ext").join("php_curl.dll").is_file());
        assert!(!dest.join("php-8.2.3").exists());
    }

    #[test]
    fn extract_zip_single_flat_file_not_stripped() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("php.zip");
        write_zip(&archive, &[("php.exe", b"exe")]);

        let dest = temp.path().join("out");
        extract_zip(&archive, &dest).unwrap();

        assert!(dest.join("php.exe").is_file());
    }

    #[test]
    fn extract_tar_gz_strips_common_root_folder() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("php.tar.gz");
        write_tar_gz(
            &archive,
            &[("php-8.3.0/bin/php", b"#!/bin/sh\n"), ("php-8.3.0/lib/libphp.so", b"so")],
        );

        let dest = temp.path().join("out");
        extract_archive(&archive, &dest).unwrap();

        assert!(dest.join("bin").join("php").is_file());
        assert!(dest.join("lib").join("libphp.so").is_file());
        assert!(!dest.join("php-8.3.0").exists());
    }

    #[test]
    fn extract_tgz_extension_is_recognised() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("php.tgz");
        write_tar_gz(&archive, &[("bin/php", b"php"), ("lib/x.so", b"so")]);

        let dest = temp.path().join("out");
        extract_archive(&archive, &dest).unwrap();

        assert!(dest.join("bin").join("php").is_file());
    }

    #[test]
    fn corrupt_zip_is_extraction_error() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("php.zip");
        std::fs::write(&archive, b"this is not a zip file").unwrap();

        let err = extract_archive(&archive, &temp.path().join("out")).unwrap_err();
        assert!(matches!(err, PvmError::Extraction { .. }));
    }

    #[test]
    fn unsupported_format_is_extraction_error() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("php.7z");
        std::fs::write(&archive, b"7z").unwrap();

        let err = extract_archive(&archive, &temp.path().join("out")).unwrap_err();
        assert!(err.to_string().contains("unsupported archive format"));
    }

    #[test]
    fn ensure_safe_rejects_parent_and_absolute_paths() {
        assert!(ensure_safe(Path::new("../etc/passwd")).is_err());
        assert!(ensure_safe(Path::new("a/../../b")).is_err());
        assert!(ensure_safe(Path::new("/etc/passwd")).is_err());
        assert!(ensure_safe(Path::new("ext/php_curl.dll")).is_ok());
    }

    fn write_tar_gz_with_symlink(path: &Path, link: &str, target: &Path, file: &str) {
        let out = std::fs::File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder.append_link(&mut header, link, target).unwrap();

        let mut header = tar::Header::new_gnu();
        header.set_size(3);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, file, &b"php"[..]).unwrap();

        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn resolve_inside_tracks_parent_components() {
        assert_eq!(resolve_inside(Path::new("bin/../lib")), Some(PathBuf::from("lib")));
        assert_eq!(resolve_inside(Path::new("./bin")), Some(PathBuf::from("bin")));
        assert_eq!(resolve_inside(Path::new("bin/../..")), None);
        assert_eq!(resolve_inside(Path::new("/etc")), None);
    }

    #[cfg(unix)]
    #[test]
    fn extract_tar_gz_refuses_absolute_symlink_escape() {
        let temp = tempfile::tempdir().unwrap();
        let outside = temp.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        let archive = temp.path().join("php.tar.gz");
        write_tar_gz_with_symlink(&archive, "x/evil", &outside, "x/evil/owned.txt");

        let dest = temp.path().join("out");
        let err = extract_archive(&archive, &dest).unwrap_err();

        assert!(matches!(err, PvmError::Extraction { .. }));
        assert!(!outside.join("owned.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn extract_tar_gz_refuses_relative_symlink_escape() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("php.tar.gz");
        write_tar_gz_with_symlink(&archive, "x/evil", Path::new("../.."), "x/evil/owned.txt");

        let dest = temp.path().join("out");
        let err = extract_archive(&archive, &dest).unwrap_err();

        assert!(matches!(err, PvmError::Extraction { .. }));
        assert!(!temp.path().join("owned.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn extract_tar_gz_refuses_writes_through_existing_link() {
        let temp = tempfile::tempdir().unwrap();
        let outside = temp.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        let dest = temp.path().join("out");
        std::fs::create_dir(&dest).unwrap();
        std::os::unix::fs::symlink(&outside, dest.join("lib")).unwrap();

        let archive = temp.path().join("php.tar.gz");
        write_tar_gz(&archive, &[("bin/php", b"php"), ("lib/libphp.so", b"so")]);

        let err = extract_tar_gz(&archive, &dest).unwrap_err();

        assert!(matches!(err, PvmError::Extraction { .. }));
        assert!(!outside.join("libphp.so").exists());
    }

    #[cfg(unix)]
    #[test]
    fn extract_tar_gz_keeps_symlinks_inside_the_target() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("php.tar.gz");
        write_tar_gz_with_symlink(
            &archive,
            "php-8.3.0/bin/php",
            Path::new("php8.3"),
            "php-8.3.0/bin/php8.3",
        );

        let dest = temp.path().join("out");
        extract_archive(&archive, &dest).unwrap();

        assert_eq!(
            std::fs::read_link(dest.join("bin").join("php")).unwrap(),
            PathBuf::from("php8.3")
        );
        assert_eq!(std::fs::read(dest.join("bin").join("php")).unwrap(), b"php");
    }

    #[cfg(unix)]
    #[test]
    fn extract_tar_gz_preserves_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("php.tar.gz");
        write_tar_gz(&archive, &[("bin/php", b"php"), ("bin/phpize", b"sh")]);

        let dest = temp.path().join("out");
        extract_tar_gz(&archive, &dest).unwrap();

        let mode = std::fs::metadata(dest.join("bin").join("php"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
