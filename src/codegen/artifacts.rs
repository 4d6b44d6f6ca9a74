//! Artifact persistence.
//!
//! Each generation gets its own directory, `{root}/{variant}_{app_id}_{ulid}`.
//! The ULID comes from a process-wide monotonic generator, so directory names
//! are time-ordered and never repeat; the leaf is still created exclusively and
//! a clash (e.g. two processes sharing a root) simply draws a new id.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ulid::{Generator, Ulid};

use super::{AppId, CodeArtifact, Variant};
use crate::error::{Error, Result};

/// Attempts before giving up on an exclusive directory create.
const MAX_ALLOCATION_ATTEMPTS: usize = 5;

/// Unique, time-ordered id of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationId {
    pub app_id: AppId,
    pub ulid: Ulid,
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.app_id, self.ulid)
    }
}

/// A freshly allocated, still empty artifact directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDirectory {
    pub generation_id: GenerationId,
    pub variant: Variant,
    pub path: PathBuf,
}

/// Allocates generation directories and writes artifacts into them.
pub struct ArtifactStore {
    root: PathBuf,
    ids: Mutex<Generator>,
}

impl fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ArtifactStore {
    /// Create a store rooted at `root`. Nothing is created on disk yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ids: Mutex::new(Generator::new()),
        }
    }

    /// Output root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Draw the next generation id for an app.
    pub fn next_generation_id(&self, app_id: AppId) -> GenerationId {
        let ulid = {
            let mut generator = self
                .ids
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            // Overflow only happens after 2^80 ids in one millisecond.
            generator.generate().unwrap_or_else(|_| Ulid::new())
        };
        GenerationId { app_id, ulid }
    }

    /// Directory name for a generation: `{variant}_{app_id}_{ulid}`.
    #[must_use]
    pub fn directory_for(&self, variant: Variant, id: &GenerationId) -> PathBuf {
        self.root.join(format!("{variant}_{id}"))
    }

    /// Create the directory for a specific generation id.
    ///
    /// Fails with [`Error::Persistence`] if the directory already exists.
    pub async fn allocate_directory(&self, variant: Variant, id: &GenerationId) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::persistence(&self.root, e))?;

        let path = self.directory_for(variant, id);
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| Error::persistence(&path, e))?;
        Ok(path)
    }

    /// Allocate a directory under a new generation id, retrying on a clash.
    #[tracing::instrument(skip(self), fields(generation_id = tracing::field::Empty))]
    pub async fn allocate(&self, variant: Variant, app_id: AppId) -> Result<ArtifactDirectory> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let generation_id = self.next_generation_id(app_id);
            match self.allocate_directory(variant, &generation_id).await {
                Ok(path) => {
                    tracing::Span::current()
                        .record("generation_id", tracing::field::display(&generation_id));
                    tracing::debug!(path = %path.display(), "Allocated artifact directory");
                    return Ok(ArtifactDirectory {
                        generation_id,
                        variant,
                        path,
                    });
                }
                Err(Error::Persistence { path, source })
                    if source.kind() == ErrorKind::AlreadyExists
                        && attempt < MAX_ALLOCATION_ATTEMPTS =>
                {
                    tracing::warn!(path = %path.display(), attempt, "Artifact directory clash, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write every field of `artifact` into `dir` using the variant's fixed
    /// file names.
    ///
    /// Files written before a failure are left in place.
    pub async fn write_artifact(&self, dir: &Path, artifact: &CodeArtifact) -> Result<()> {
        for (name, content) in artifact.files() {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::persistence(parent, e))?;
            }
            tokio::fs::write(&path, content.as_bytes())
                .await
                .map_err(|e| Error::persistence(&path, e))?;
            tracing::trace!(path = %path.display(), bytes = content.len(), "Wrote artifact file");
        }
        Ok(())
    }

    /// Allocate a directory and write a parsed artifact into it.
    pub async fn save(&self, app_id: AppId, artifact: &CodeArtifact) -> Result<ArtifactDirectory> {
        let dir = self.allocate(artifact.variant(), app_id).await?;
        self.write_artifact(&dir.path, artifact).await?;
        tracing::info!(
            app_id = %app_id,
            variant = %dir.variant,
            generation_id = %dir.generation_id,
            path = %dir.path.display(),
            "Artifact saved"
        );
        Ok(dir)
    }

    /// Most recent saved directory for an app and variant, if any.
    pub async fn latest_directory(&self, variant: Variant, app_id: AppId) -> Result<Option<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::persistence(&self.root, e)),
        };

        let prefix = format!("{variant}_{app_id}_");
        let mut latest: Option<(Ulid, PathBuf)> = None;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::persistence(&self.root, e))?
        {
            let name = entry.file_name();
            let Some(suffix) = name.to_str().and_then(|n| n.strip_prefix(&prefix)) else {
                continue;
            };
            let Ok(ulid) = Ulid::from_string(suffix) else {
                continue;
            };
            if latest.as_ref().is_none_or(|(best, _)| ulid > *best) {
                latest = Some((ulid, entry.path()));
            }
        }

        Ok(latest.map(|(_, path)| path))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_concurrent_allocations_are_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(tmp.path()));

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.allocate(Variant::SinglePage, AppId(i % 3)).await })
            })
            .collect();

        let mut paths = HashSet::new();
        for h in handles {
            let dir = h.await.unwrap().unwrap();
            assert!(dir.path.is_dir());
            paths.insert(dir.path);
        }
        assert_eq!(paths.len(), 64);
    }

    #[test]
    fn test_debug_shows_root() {
        let store = ArtifactStore::new("/srv/code_output");
        let shown = format!("{store:?}");
        assert!(shown.starts_with("ArtifactStore"));
        assert!(shown.contains("/srv/code_output"));
    }

    #[tokio::test]
    async fn test_directory_name_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let dir = store.allocate(Variant::MultiFile, AppId(42)).await.unwrap();

        let name = dir.path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("multi_file_42_"));
        assert_eq!(name, format!("multi_file_{}", dir.generation_id));
    }

    #[tokio::test]
    async fn test_allocate_directory_rejects_existing_id() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let id = store.next_generation_id(AppId(1));

        store.allocate_directory(Variant::SinglePage, &id).await.unwrap();
        let err = store
            .allocate_directory(Variant::SinglePage, &id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "persistence");
    }

    #[tokio::test]
    async fn test_write_multi_file_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let artifact = CodeArtifact::MultiFile {
            html: "<p>hi</p>".into(),
            css: "p{}".into(),
            js: String::new(),
        };

        let dir = store.save(AppId(7), &artifact).await.unwrap();

        let read = |name: &str| std::fs::read_to_string(dir.path.join(name)).unwrap();
        assert_eq!(read("index.html"), "<p>hi</p>");
        assert_eq!(read("style.css"), "p{}");
        assert_eq!(read("script.js"), "");
    }

    #[tokio::test]
    async fn test_latest_directory_is_newest_for_app() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());

        assert!(store
            .latest_directory(Variant::SinglePage, AppId(1))
            .await
            .unwrap()
            .is_none());

        let _older = store.allocate(Variant::SinglePage, AppId(1)).await.unwrap();
        let newer = store.allocate(Variant::SinglePage, AppId(1)).await.unwrap();
        let _other_app = store.allocate(Variant::SinglePage, AppId(12)).await.unwrap();
        let _other_variant = store.allocate(Variant::MultiFile, AppId(1)).await.unwrap();

        let latest = store
            .latest_directory(Variant::SinglePage, AppId(1))
            .await
            .unwrap();
        assert_eq!(latest, Some(newer.path));
    }
}
