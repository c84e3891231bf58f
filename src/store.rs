use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::StorageError;

/// Root data directory holding one `<PROVIDER>_MD` folder per provider.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    pub fn new(root: impl Into<PathBuf>) -> DatasetStore {
        DatasetStore { root: root.into() }
    }

    pub fn provider_dir(&self, provider: &str) -> PathBuf {
        self.root.join(format!("{}_MD", provider))
    }

    /// Creates the provider folder if it is missing. Repeated calls are no-ops.
    pub fn ensure(&self, provider: &str) -> Result<PathBuf, StorageError> {
        let dir = self.provider_dir(provider);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        Ok(dir)
    }

    /// Resolves `relative` inside the provider folder, refusing anything that could escape it.
    pub fn resolve(&self, provider: &str, relative: &Path) -> Result<PathBuf, StorageError> {
        let safe = relative.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe || relative.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath { path: relative.to_owned() });
        }
        Ok(self.provider_dir(provider).join(relative))
    }

    pub fn create_dir(&self, provider: &str, relative: &Path) -> Result<PathBuf, StorageError> {
        let target = self.resolve(provider, relative)?;
        fs::create_dir_all(&target).map_err(|e| StorageError::io(&target, e))?;
        Ok(target)
    }

    /// Writes `bytes` under the provider folder, creating intermediate directories and
    /// overwriting an existing file.
    pub fn write(&self, provider: &str, relative: &Path, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let target = self.resolve(provider, relative)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        fs::write(&target, bytes).map_err(|e| StorageError::io(&target, e))?;
        Ok(target)
    }

    /// Single-file payload location: `<PROVIDER>_MD/<PROVIDER>_MD.csv`.
    pub fn write_flat(&self, provider: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        self.ensure(provider)?;
        self.write(provider, Path::new(&format!("{}_MD.csv", provider)), bytes)
    }

    /// Renames a file within the provider folder. An existing destination is replaced; when it
    /// is only a case variant of the source this is a case change of the same file on
    /// case-insensitive filesystems and a replacement of a stale copy elsewhere.
    pub fn rename(&self, provider: &str, old: &Path, new: &Path) -> Result<PathBuf, StorageError> {
        let source = self.resolve(provider, old)?;
        let target = self.resolve(provider, new)?;

        if !source.exists() {
            return Err(StorageError::MissingSource { path: source });
        }
        if source == target {
            return Ok(target);
        }

        fs::rename(&source, &target).map_err(|e| StorageError::io(&target, e))?;
        Ok(target)
    }
}

#[test]
fn test_ensure_twice() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::new(dir.path());

    store.ensure("US").unwrap();
    store.ensure("US").unwrap();

    let folders: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(folders.len(), 1);
    assert!(dir.path().join("US_MD").is_dir());
}

#[test]
fn test_flat_write_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::new(dir.path());
    let body = b"sasdate,INDPRO\n1/1/2020,100\n";

    let first = store.write_flat("US", body).unwrap();
    let second = store.write_flat("US", body).unwrap();

    assert_eq!(first, second);
    assert_eq!(fs::read(&first).unwrap(), body.to_vec());
    assert_eq!(fs::read_dir(store.provider_dir("US")).unwrap().count(), 1);
}

#[test]
fn test_write_creates_parents_and_rejects_escape() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::new(dir.path());

    let written = store.write("UK", Path::new("UKMD_May_2024/nested/data.csv"), b"a,b\n").unwrap();
    assert!(written.ends_with("UK_MD/UKMD_May_2024/nested/data.csv"));

    assert!(matches!(
        store.write("UK", Path::new("../escape.csv"), b""),
        Err(StorageError::InvalidPath { .. })
    ));
    assert!(matches!(
        store.write("UK", Path::new("/etc/passwd"), b""),
        Err(StorageError::InvalidPath { .. })
    ));
}

#[test]
fn test_rename_missing_and_stale_destination() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::new(dir.path());

    assert!(matches!(
        store.rename("UK", Path::new("A.CSV"), Path::new("a.csv")),
        Err(StorageError::MissingSource { .. })
    ));

    store.write("UK", Path::new("a.csv"), b"old").unwrap();
    store.write("UK", Path::new("A.CSV"), b"new").unwrap();
    let renamed = store.rename("UK", Path::new("A.CSV"), Path::new("a.csv")).unwrap();

    assert_eq!(fs::read(&renamed).unwrap(), b"new".to_vec());
    assert_eq!(fs::read_dir(store.provider_dir("UK")).unwrap().count(), 1);
}
