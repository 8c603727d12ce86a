//! Directory-backed blob store
//!
//! Each key maps to a file below the root. Alongside it live two sidecars:
//! `<file>.lock`, held with an exclusive `fs2` lock while writing, and
//! `<file>.gen`, a counter that serves as the generation and outlives
//! deletes of the value. Values are replaced atomically through a temp file
//! in the same directory.

use super::{validate_key, Blob, BlobStore, Generation, WriteCondition};
use crate::error::StoreError;
use async_trait::async_trait;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const LOCK_SUFFIX: &str = ".lock";
const GENERATION_SUFFIX: &str = ".gen";
const TEMP_PREFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn io_error(key: &str) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        key: key.to_string(),
        source,
    }
}

fn open_lock(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(sidecar(path, LOCK_SUFFIX))
}

/// Last generation written at `path`, surviving deletes of the value
fn read_counter(path: &Path) -> io::Result<u64> {
    match fs::read_to_string(sidecar(path, GENERATION_SUFFIX)) {
        Ok(raw) => Ok(raw.trim().parse().unwrap_or(0)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Generation of the value at `path`; `None` if there is no value
fn read_generation(path: &Path) -> io::Result<Option<u64>> {
    if !path.exists() {
        return Ok(None);
    }
    read_counter(path).map(Some)
}

fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other(format!("path has no parent: {}", path.display())))?;
    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn get_blocking(path: &Path) -> io::Result<Option<Blob>> {
    let lock = open_lock(path)?;
    lock.lock_shared()?;

    let Some(generation) = read_generation(path)? else {
        return Ok(None);
    };
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(Some(Blob {
        data,
        generation: generation.to_string(),
    }))
}

fn put_blocking(
    path: &Path,
    data: &[u8],
    condition: &WriteCondition,
) -> io::Result<Result<Generation, ()>> {
    let lock = open_lock(path)?;
    lock.lock_exclusive()?;

    let current = read_generation(path)?;
    let holds = match (condition, current) {
        (WriteCondition::Any, _) => true,
        (WriteCondition::DoesNotExist, current) => current.is_none(),
        (WriteCondition::GenerationMatch(expected), Some(current)) => {
            expected == &current.to_string()
        }
        (WriteCondition::GenerationMatch(_), None) => false,
    };
    if !holds {
        return Ok(Err(()));
    }

    let next = read_counter(path)? + 1;
    atomic_write(path, data)?;
    atomic_write(&sidecar(path, GENERATION_SUFFIX), next.to_string().as_bytes())?;
    Ok(Ok(next.to_string()))
}

fn delete_blocking(path: &Path) -> io::Result<()> {
    let lock = open_lock(path)?;
    lock.lock_exclusive()?;
    // The `.gen` sidecar stays so a recreated value never reuses a generation
    remove_if_exists(path)
}

fn is_sidecar(name: &str) -> bool {
    name.ends_with(LOCK_SUFFIX) || name.ends_with(GENERATION_SUFFIX) || name.starts_with(TEMP_PREFIX)
}

fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_keys(root, &path, keys)?;
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_sidecar(name) {
            continue;
        }

        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let segments: Option<Vec<&str>> = relative.iter().map(|s| s.to_str()).collect();
        if let Some(segments) = segments {
            keys.push(segments.join("/"));
        }
    }
    Ok(())
}

async fn blocking<T, F>(key: &str, f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))?
        .map_err(io_error(key))
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Blob>, StoreError> {
        let path = self.path_for(key)?;
        blocking(key, move || get_blocking(&path)).await
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        condition: WriteCondition,
    ) -> Result<Generation, StoreError> {
        let path = self.path_for(key)?;
        let data = data.to_vec();
        blocking(key, move || put_blocking(&path, &data, &condition))
            .await?
            .map_err(|()| StoreError::PreconditionFailed {
                key: key.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        blocking(key, move || delete_blocking(&path)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        let prefix_owned = prefix.to_string();
        blocking(prefix, move || {
            let mut keys = Vec::new();
            collect_keys(&root, &root, &mut keys)?;
            keys.retain(|k| k.starts_with(&prefix_owned));
            keys.sort();
            Ok(keys)
        })
        .await
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_roundtrip_and_generations() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());

        assert!(store.get("state/repos/o/r.json").await.unwrap().is_none());

        let g1 = store
            .put("state/repos/o/r.json", b"{}", WriteCondition::DoesNotExist)
            .await
            .unwrap();
        let blob = store.get("state/repos/o/r.json").await.unwrap().unwrap();
        assert_eq!(blob.data, b"{}");
        assert_eq!(blob.generation, g1);

        let g2 = store
            .put(
                "state/repos/o/r.json",
                b"{\"x\":1}",
                WriteCondition::GenerationMatch(g1.clone()),
            )
            .await
            .unwrap();
        assert_ne!(g1, g2);

        let stale = store
            .put(
                "state/repos/o/r.json",
                b"lost",
                WriteCondition::GenerationMatch(g1),
            )
            .await;
        assert!(matches!(stale, Err(StoreError::PreconditionFailed { .. })));

        let exists = store
            .put("state/repos/o/r.json", b"lost", WriteCondition::DoesNotExist)
            .await;
        assert!(matches!(exists, Err(StoreError::PreconditionFailed { .. })));

        let blob = store.get("state/repos/o/r.json").await.unwrap().unwrap();
        assert_eq!(blob.data, b"{\"x\":1}");
    }

    #[tokio::test]
    async fn test_recreated_key_rejects_generation_from_before_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        let key = "state/repos/o/r.json";

        let before = store.put(key, b"old", WriteCondition::DoesNotExist).await.unwrap();
        store.delete(key).await.unwrap();
        assert!(store.get(key).await.unwrap().is_none());

        let after = store.put(key, b"new", WriteCondition::DoesNotExist).await.unwrap();
        assert_ne!(before, after);

        let stale = store
            .put(key, b"overwrite", WriteCondition::GenerationMatch(before))
            .await;
        assert!(matches!(stale, Err(StoreError::PreconditionFailed { .. })));
        assert_eq!(store.get(key).await.unwrap().unwrap().data, b"new");
    }

    #[tokio::test]
    async fn test_list_skips_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());

        store
            .put("state/repos/o/a.json", b"1", WriteCondition::Any)
            .await
            .unwrap();
        store
            .put("state/repos/p/b.json", b"2", WriteCondition::Any)
            .await
            .unwrap();
        store.put("other/c.json", b"3", WriteCondition::Any).await.unwrap();

        assert_eq!(
            store.list("state/").await.unwrap(),
            vec!["state/repos/o/a.json", "state/repos/p/b.json"]
        );

        store.delete("state/repos/o/a.json").await.unwrap();
        store.delete("state/repos/o/a.json").await.unwrap();
        assert_eq!(
            store.list("state/").await.unwrap(),
            vec!["state/repos/p/b.json"]
        );
    }

    #[tokio::test]
    async fn test_missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().join("never-created"));
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        assert!(matches!(
            store.get("../outside").await,
            Err(StoreError::InvalidKey(_))
        ));
    }
}
