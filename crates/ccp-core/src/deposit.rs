//! Filesystem side of transfer submission: copy the sources into a scratch
//! directory, then move the result into the processing directory.
//!
//! These functions block; callers run them on the blocking pool.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

/// Attempts at finding a free name in the destination directory.
const MAX_RENAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Error)]
pub enum DepositError {
    #[error("no path provided")]
    NoPath,

    #[error("illegal path: {0:?}")]
    IllegalPath(String),

    #[error("path does not exist: {0:?}")]
    Missing(String),

    #[error("reached max. number of attempts: {0}")]
    TooManyAttempts(usize),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

fn io_err(context: impl Into<String>) -> impl FnOnce(io::Error) -> DepositError {
    let context = context.into();
    move |source| DepositError::Io { context, source }
}

/// Strip a `<location-uuid>:` prefix from a source path.
pub fn location_path(source: &str) -> &str {
    match source.split_once(':') {
        Some((location, path)) if Uuid::parse_str(location).is_ok() => path,
        _ => source,
    }
}

/// Copy `sources` into `<shared>/tmp/<random>/` and move the result into
/// `<shared>/currentlyProcessing/`. Returns the final location.
///
/// A single file source (e.g. a zip archive) is moved as a file; anything
/// else is gathered into a directory called `name`.
pub fn deposit(shared_dir: &Path, name: &str, sources: &[String]) -> Result<PathBuf, DepositError> {
    if sources.is_empty() {
        return Err(DepositError::NoPath);
    }
    if name.contains('/') || name.contains("..") {
        return Err(DepositError::IllegalPath(name.to_string()));
    }

    let scratch = shared_dir.join("tmp").join(Uuid::now_v7().to_string());
    std::fs::create_dir_all(&scratch).map_err(io_err(format!("create {}", scratch.display())))?;

    let sources: Vec<&Path> = sources.iter().map(|s| Path::new(location_path(s))).collect();
    for source in &sources {
        if !source.exists() {
            return Err(DepositError::Missing(source.display().to_string()));
        }
    }

    let staged = match sources.as_slice() {
        [single] if single.is_file() => {
            let file_name = single
                .file_name()
                .ok_or_else(|| DepositError::IllegalPath(single.display().to_string()))?;
            let dest = scratch.join(file_name);
            std::fs::copy(single, &dest).map_err(io_err(format!("copy {}", single.display())))?;
            dest
        }
        _ => {
            let dest = scratch.join(name);
            std::fs::create_dir_all(&dest).map_err(io_err(format!("create {}", dest.display())))?;
            for source in &sources {
                copy_into(source, &dest)?;
            }
            dest
        }
    };

    let processing = shared_dir.join("currentlyProcessing");
    std::fs::create_dir_all(&processing).map_err(io_err(format!("create {}", processing.display())))?;
    let final_path = move_to_dir(&staged, &processing)?;

    if let Err(e) = std::fs::remove_dir_all(&scratch) {
        tracing::warn!(path = %scratch.display(), error = %e, "failed to remove scratch directory");
    }
    Ok(final_path)
}

/// Copy a directory's contents, or a single file, into `dest`.
fn copy_into(source: &Path, dest: &Path) -> Result<(), DepositError> {
    if source.is_file() {
        let file_name = source
            .file_name()
            .ok_or_else(|| DepositError::IllegalPath(source.display().to_string()))?;
        std::fs::copy(source, dest.join(file_name)).map_err(io_err(format!("copy {}", source.display())))?;
        return Ok(());
    }

    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|e| DepositError::Io {
            context: format!("walk {}", source.display()),
            source: e.into(),
        })?;
        let Ok(rel) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(io_err(format!("create {}", target.display())))?;
        } else {
            std::fs::copy(entry.path(), &target)
                .map_err(io_err(format!("copy {}", entry.path().display())))?;
        }
    }
    Ok(())
}

/// Move `src` into `dst_dir`, appending `_N` to the name until it is free.
pub fn move_to_dir(src: &Path, dst_dir: &Path) -> Result<PathBuf, DepositError> {
    let display = src.display().to_string();
    if display.is_empty() {
        return Err(DepositError::NoPath);
    }
    if display.contains("..") {
        return Err(DepositError::IllegalPath(display));
    }
    if !src.exists() {
        return Err(DepositError::Missing(display));
    }

    let file_name = src
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| DepositError::IllegalPath(display.clone()))?;
    let (stem, ext) = match (src.is_file(), file_name.rsplit_once('.')) {
        (true, Some((stem, ext))) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
        _ => (file_name.clone(), String::new()),
    };

    for attempt in 0..=MAX_RENAME_ATTEMPTS {
        let candidate = if attempt == 0 {
            dst_dir.join(&file_name)
        } else {
            dst_dir.join(format!("{stem}_{attempt}{ext}"))
        };
        if candidate.exists() {
            continue;
        }
        match std::fs::rename(src, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(io_err(format!("move {display}"))(e)),
        }
    }
    Err(DepositError::TooManyAttempts(MAX_RENAME_ATTEMPTS + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_path() {
        assert_eq!(
            location_path("3e1e56ed-923b-4b53-84fe-c5c1c0b0cf8e:/home/transfers/images"),
            "/home/transfers/images"
        );
        assert_eq!(location_path("/home/transfers/images"), "/home/transfers/images");
        assert_eq!(location_path("c:/odd"), "c:/odd");
    }

    #[test]
    fn test_deposit_directory() {
        let shared = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(source.path().join("objects")).unwrap();
        std::fs::write(source.path().join("objects/a.txt"), "a").unwrap();

        let sources = vec![source.path().to_string_lossy().into_owned()];
        let first = deposit(shared.path(), "Images", &sources).unwrap();
        assert_eq!(first, shared.path().join("currentlyProcessing/Images"));
        assert_eq!(std::fs::read_to_string(first.join("objects/a.txt")).unwrap(), "a");

        let second = deposit(shared.path(), "Images", &sources).unwrap();
        assert_eq!(second, shared.path().join("currentlyProcessing/Images_1"));
        assert_eq!(std::fs::read_dir(shared.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn test_deposit_single_file_keeps_extension() {
        let shared = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let archive = source.path().join("bag.zip");
        std::fs::write(&archive, "zip").unwrap();
        std::fs::create_dir_all(shared.path().join("currentlyProcessing")).unwrap();
        std::fs::write(shared.path().join("currentlyProcessing/bag.zip"), "old").unwrap();

        let path = deposit(shared.path(), "bag", &[archive.to_string_lossy().into_owned()]).unwrap();
        assert_eq!(path, shared.path().join("currentlyProcessing/bag_1.zip"));
    }

    #[test]
    fn test_deposit_rejects_bad_input() {
        let shared = tempfile::tempdir().unwrap();
        assert!(matches!(deposit(shared.path(), "x", &[]), Err(DepositError::NoPath)));
        assert!(matches!(
            deposit(shared.path(), "../x", &["/tmp".to_string()]),
            Err(DepositError::IllegalPath(_))
        ));
        assert!(matches!(
            deposit(shared.path(), "x", &["/nonexistent/ccp/source".to_string()]),
            Err(DepositError::Missing(_))
        ));
    }
}
