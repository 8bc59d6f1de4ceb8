//! Scratch directory management.

use crate::error::{HarnessError, HarnessResult};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

/// Remove `path` if it exists, then create it empty.
///
/// The parent must already exist.
pub async fn reset_directory(path: &Path) -> HarnessResult<()> {
    if fs::try_exists(path).await.map_err(|source| HarnessError::WorkDir {
        action: "inspect",
        path: path.to_path_buf(),
        source,
    })? {
        info!(path = %path.display(), "Found existing directory, deleting it");
        fs::remove_dir_all(path)
            .await
            .map_err(|source| HarnessError::WorkDir {
                action: "remove",
                path: path.to_path_buf(),
                source,
            })?;
    }

    fs::create_dir(path)
        .await
        .map_err(|source| HarnessError::WorkDir {
            action: "create",
            path: path.to_path_buf(),
            source,
        })?;
    info!(path = %path.display(), "Directory created");
    Ok(())
}

/// Best-effort removal of the scratch directory.
///
/// Returns whether the directory is gone afterwards. Never fails.
pub async fn cleanup(path: &Path) -> bool {
    match fs::try_exists(path).await {
        Ok(false) => return true,
        Ok(true) => {}
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not inspect scratch directory");
            return false;
        }
    }

    info!(path = %path.display(), "Deleting scratch directory");
    match fs::remove_dir_all(path).await {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete scratch directory");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(path: &Path) -> usize {
        std::fs::read_dir(path).unwrap().count()
    }

    #[tokio::test]
    async fn test_reset_creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("psa-tests-temp");

        reset_directory(&work).await.unwrap();

        assert!(work.is_dir());
        assert_eq!(entries(&work), 0);
        assert_eq!(entries(root.path()), 1);
    }

    #[tokio::test]
    async fn test_reset_discards_stale_contents() {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("psa-tests-temp");
        std::fs::create_dir_all(work.join("psa-arch-tests/api-tests")).unwrap();
        std::fs::write(work.join("stale.o"), b"old").unwrap();

        reset_directory(&work).await.unwrap();

        assert!(work.is_dir());
        assert_eq!(entries(&work), 0);
    }

    #[tokio::test]
    async fn test_reset_fails_without_parent() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("missing").join("cmake_build");

        let err = reset_directory(&nested).await.unwrap_err();
        assert!(matches!(err, HarnessError::WorkDir { action: "create", .. }));
    }

    #[tokio::test]
    async fn test_cleanup_removes_tree_and_tolerates_absence() {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("psa-tests-temp");
        std::fs::create_dir_all(work.join("a/b")).unwrap();
        std::fs::write(work.join("a/b/f"), b"x").unwrap();

        assert!(cleanup(&work).await);
        assert!(!work.exists());
        assert!(cleanup(&work).await);
    }
}
