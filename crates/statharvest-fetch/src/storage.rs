//! Artifact storage backends and file naming.
//!
//! Storage receives a logical path and returns the physical location it
//! wrote to. Logical paths come from [`artifact_key`]:
//! `<institution>/<url key>/<digest prefix>/<file name>`, so distinct URLs
//! never share a location and new content never lands on the bytes an
//! existing record points to. Writes go to a temporary sibling first and are
//! renamed into place, so a crashed run never leaves a half-written artifact
//! under its final name.

use crate::error::StorageError;
use crate::hasher::digest_bytes;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use tokio::io::AsyncWriteExt;

/// Destination for downloaded bytes.
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Write `bytes` under `logical_path` and return the physical location.
    async fn save(&self, logical_path: &str, bytes: &[u8]) -> Result<String, StorageError>;

    /// Delete an artifact previously returned by [`ArtifactStorage::save`].
    ///
    /// Removing something that is already gone is not an error.
    async fn remove(&self, storage_path: &str) -> Result<(), StorageError>;
}

/// Hex characters of the URL digest used as the per-URL directory.
const URL_KEY_LEN: usize = 16;
/// Hex characters of the content digest used as the per-version directory.
const CONTENT_KEY_LEN: usize = 12;

/// Logical storage path for one version of one URL's content.
#[must_use]
pub fn artifact_key(institution: &str, url: &str, content_digest: &str, file_name: &str) -> String {
    let url_digest = digest_bytes(url.as_bytes());
    let url_key = &url_digest[..URL_KEY_LEN];
    let content_key = content_digest.get(..CONTENT_KEY_LEN).unwrap_or(content_digest);
    format!("{institution}/{url_key}/{content_key}/{file_name}")
}

/// Local filesystem storage rooted at the configured storage directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Storage rooted at `root`; directories are created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory every artifact is written under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a logical path under the root, rejecting anything that could escape it.
    pub fn resolve(&self, logical_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(logical_path);
        let is_plain = !logical_path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain {
            return Err(StorageError::InvalidPath(logical_path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStorage for FileStorage {
    async fn save(&self, logical_path: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let target = self.resolve(logical_path)?;
        write_atomic(&target, bytes).await?;
        tracing::debug!("Stored {} bytes at {}", bytes.len(), target.display());
        Ok(target.to_string_lossy().into_owned())
    }

    async fn remove(&self, storage_path: &str) -> Result<(), StorageError> {
        let target = Path::new(storage_path);
        let inside_root = target.strip_prefix(&self.root).is_ok_and(|rel| {
            rel.components().next().is_some()
                && rel.components().all(|c| matches!(c, Component::Normal(_)))
        });
        if !inside_root {
            return Err(StorageError::InvalidPath(storage_path.to_string()));
        }
        match tokio::fs::remove_file(target).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(StorageError::Remove {
                    path: target.to_path_buf(),
                    source,
                })
            }
        }
        // Drop the per-version directory once it is empty
        if let Some(dir) = target.parent().filter(|d| *d != self.root) {
            let _ = tokio::fs::remove_dir(dir).await;
        }
        tracing::debug!("Removed {}", target.display());
        Ok(())
    }
}

/// Write `bytes` to `target` via a temporary file in the same directory.
pub async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let write_err = |source| StorageError::Write {
        path: target.to_path_buf(),
        source,
    };

    let parent = target
        .parent()
        .ok_or_else(|| StorageError::InvalidPath(target.display().to_string()))?;
    tokio::fs::create_dir_all(parent).await.map_err(write_err)?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| StorageError::InvalidPath(target.display().to_string()))?;
    let temp_path = parent.join(format!(".{file_name}.{}.part", uuid::Uuid::new_v4()));

    let result = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, target).await
    }
    .await;

    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(write_err(err));
    }
    Ok(())
}

fn unsafe_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\w\-. ]").expect("valid regex"))
}

/// Replace every character outside word characters, `-`, `.` and space with `_`.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned = unsafe_chars().replace_all(name.trim(), "_");
    match cleaned.as_ref() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned.into_owned(),
    }
}

/// File name for a URL: its last path segment, or a timestamped fallback.
#[must_use]
pub fn file_name_from_url(url: &str) -> String {
    let segment = url::Url::parse(url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|s| !s.is_empty())
    });

    match segment {
        Some(segment) => sanitize_file_name(&segment),
        None => format!("file_{}", chrono::Utc::now().timestamp()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("gdp 2024.xlsx"), "gdp 2024.xlsx");
        assert_eq!(sanitize_file_name("a/b\\c:d?.csv"), "a_b_c_d_.csv");
        assert_eq!(sanitize_file_name("Брутен продукт.xls"), "Брутен продукт.xls");
        assert_eq!(sanitize_file_name(".."), "_");
        assert_eq!(sanitize_file_name("   "), "_");
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://www.nsi.bg/files/gdp_q1.xlsx?v=2"),
            "gdp_q1.xlsx"
        );
        assert_eq!(
            file_name_from_url("https://www.bnb.bg/files/rates%202024.csv"),
            "rates_202024.csv"
        );
        assert!(file_name_from_url("https://www.minfin.bg/").starts_with("file_"));
        assert!(file_name_from_url("not a url").starts_with("file_"));
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let storage = FileStorage::new("/srv/statharvest");
        assert!(storage.resolve("NSI/gdp.xlsx").is_ok());
        for bad in ["", "../etc/passwd", "NSI/../../x", "/abs/path", "./NSI/x"] {
            assert!(
                matches!(storage.resolve(bad), Err(StorageError::InvalidPath(_))),
                "{bad}"
            );
        }
    }

    #[tokio::test]
    async fn test_save_writes_and_overwrites() {
        let tmp = TempDir::new().expect("create temp dir");
        let storage = FileStorage::new(tmp.path());

        let path = storage
            .save("BNB/rates.csv", b"v1")
            .await
            .expect("first save");
        assert_eq!(std::fs::read(&path).expect("read"), b"v1");

        let again = storage
            .save("BNB/rates.csv", b"version two")
            .await
            .expect("second save");
        assert_eq!(path, again);
        assert_eq!(std::fs::read(&path).expect("read"), b"version two");

        // No temporary files left behind
        let entries: Vec<_> = std::fs::read_dir(tmp.path().join("BNB"))
            .expect("list dir")
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_artifact_key_separates_urls_and_versions() {
        let digest = digest_bytes(b"content");
        let a = artifact_key("NSI", "https://www.nsi.bg/2023/gdp.xlsx", &digest, "gdp.xlsx");
        let b = artifact_key("NSI", "https://www.nsi.bg/2024/gdp.xlsx", &digest, "gdp.xlsx");
        assert_ne!(a, b);
        assert!(a.starts_with("NSI/"));
        assert!(a.ends_with(&format!("/{}/gdp.xlsx", &digest[..12])));

        let other = digest_bytes(b"other content");
        let c = artifact_key("NSI", "https://www.nsi.bg/2023/gdp.xlsx", &other, "gdp.xlsx");
        assert_ne!(a, c);
        assert_eq!(a.rsplitn(3, '/').nth(2), c.rsplitn(3, '/').nth(2));
        assert!(FileStorage::new("/srv").resolve(&a).is_ok());
    }

    #[tokio::test]
    async fn test_remove_deletes_file_and_empty_version_dir() {
        let tmp = TempDir::new().expect("create temp dir");
        let storage = FileStorage::new(tmp.path());
        let path = storage
            .save("BNB/0123/abcd/rates.csv", b"v1")
            .await
            .expect("save");

        storage.remove(&path).await.expect("remove");
        assert!(!Path::new(&path).exists());
        assert!(!tmp.path().join("BNB/0123/abcd").exists());
        assert!(tmp.path().join("BNB/0123").is_dir());

        // Already gone
        storage.remove(&path).await.expect("second remove");
    }

    #[tokio::test]
    async fn test_remove_rejects_paths_outside_root() {
        let tmp = TempDir::new().expect("create temp dir");
        let storage = FileStorage::new(tmp.path().join("data"));
        let outside = tmp.path().join("keep.txt");
        std::fs::write(&outside, b"keep").expect("write");

        for bad in [
            outside.to_string_lossy().into_owned(),
            tmp.path().join("data").join("..").join("keep.txt").to_string_lossy().into_owned(),
            tmp.path().join("data").to_string_lossy().into_owned(),
        ] {
            assert!(matches!(
                storage.remove(&bad).await,
                Err(StorageError::InvalidPath(_))
            ));
        }
        assert!(outside.exists());
    }
}
