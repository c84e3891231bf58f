use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::config::{PayloadKind, Provider};
use crate::error::{AcquisitionError, StorageError};
use crate::fetcher::Fetched;
use crate::store::DatasetStore;

/// Top-level folder an archive is expected to hold, taken from the archive's file name:
/// `https://host/LCDMA_March_2024.zip` -> `LCDMA_March_2024`.
pub fn canonical_folder(url: &str) -> String {
    let without_query = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
    let file_name = without_query.rsplit('/').next().unwrap_or(without_query);
    file_name.split('.').next().unwrap_or(file_name).to_owned()
}

/// Lowercases the final path component only; directory casing is left as published.
pub fn lowercase_leaf(path: &Path) -> PathBuf {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => path.with_file_name(name.to_lowercase()),
        None => path.to_owned(),
    }
}

struct PlannedEntry {
    index: usize,
    original: PathBuf,
    target: PathBuf,
    is_dir: bool,
}

/// Extracts every entry whose name starts with `folder` into the provider's store and returns the
/// final (lowercased) paths of the files written. Anything outside `folder` is skipped.
pub fn extract_archive(
    store: &DatasetStore,
    provider: &str,
    url: &str,
    bytes: &[u8],
    folder: &str,
) -> Result<Vec<PathBuf>, AcquisitionError> {
    let archive_error = |source| AcquisitionError::Archive {
        provider: provider.to_owned(),
        url: url.to_owned(),
        source,
    };
    let storage_error = |source| AcquisitionError::Storage {
        provider: provider.to_owned(),
        source,
    };

    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(archive_error)?;

    // plan first so that unsafe names and case collisions abort before anything touches the disk
    let mut planned = Vec::new();
    let mut claimed: HashMap<PathBuf, String> = HashMap::new();
    let mut skipped = 0;

    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(archive_error)?;
        let name = entry.name().to_owned();

        if !name.starts_with(folder) {
            skipped += 1;
            continue;
        }

        let original = PathBuf::from(&name);
        let is_dir = entry.is_dir();
        let target = if is_dir { original.clone() } else { lowercase_leaf(&original) };
        store.resolve(provider, &original).map_err(storage_error)?;

        if !is_dir {
            if let Some(first) = claimed.insert(target.clone(), name.clone()) {
                return Err(storage_error(StorageError::CaseCollision { first, second: name }));
            }
        }

        planned.push(PlannedEntry { index, original, target, is_dir });
    }

    if planned.is_empty() {
        warn!(provider = %provider, url = %url, folder = %folder, skipped, "archive holds nothing under the expected folder");
    } else {
        info!(provider = %provider, folder = %folder, entries = planned.len(), skipped, "extracting archive folder");
    }

    let mut written = Vec::new();
    for item in planned {
        if item.is_dir {
            store.create_dir(provider, &item.original).map_err(storage_error)?;
            continue;
        }

        let mut contents = Vec::new();
        archive
            .by_index(item.index)
            .and_then(|mut entry| entry.read_to_end(&mut contents).map_err(zip::result::ZipError::from))
            .map_err(archive_error)?;

        let mut path = store.write(provider, &item.original, &contents).map_err(storage_error)?;
        if item.target != item.original {
            path = store.rename(provider, &item.original, &item.target).map_err(storage_error)?;
        }

        debug!(provider = %provider, entry = %item.original.display(), path = %path.display(), "extracted");
        written.push(path);
    }

    Ok(written)
}

/// Stores a fetched payload according to the provider's payload kind.
pub fn persist(store: &DatasetStore, provider: &Provider, fetched: &Fetched) -> Result<Vec<PathBuf>, AcquisitionError> {
    let storage_error = |source| AcquisitionError::Storage {
        provider: provider.id.to_owned(),
        source,
    };

    match provider.kind {
        PayloadKind::Flat => {
            let path = store.write_flat(&provider.id, &fetched.body).map_err(storage_error)?;
            Ok(vec![path])
        },
        PayloadKind::Archive => {
            store.ensure(&provider.id).map_err(storage_error)?;
            let folder = canonical_folder(&fetched.url);
            extract_archive(store, &provider.id, &fetched.url, &fetched.body, &folder)
        },
    }
}

#[cfg(test)]
pub fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::{CompressionMethod, ZipWriter};

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);

    for (name, contents) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
    }

    writer.finish().unwrap().into_inner()
}

#[test]
fn test_canonical_folder() {
    assert_eq!(canonical_folder("https://www.stevanovic.uqam.ca/LCDMA_March_2024.zip"), "LCDMA_March_2024");
    assert_eq!(canonical_folder("https://example.org/a/UKMD_May_2024.zip?download=1"), "UKMD_May_2024");
}

#[test]
fn test_lowercase_leaf_only() {
    assert_eq!(lowercase_leaf(Path::new("folder/a.CSV")), PathBuf::from("folder/a.csv"));
    assert_eq!(lowercase_leaf(Path::new("folder/Sub/B.txt")), PathBuf::from("folder/Sub/b.txt"));
}

#[test]
fn test_extract_matching_folder_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::new(dir.path());
    let archive = build_zip(&[
        ("folder/a.CSV", "a"),
        ("folder/Sub/B.txt", "b"),
        ("other/x.txt", "x"),
    ]);

    let written = extract_archive(&store, "UK", "https://example.org/folder.zip", &archive, "folder").unwrap();

    let base = store.provider_dir("UK");
    assert_eq!(written, vec![base.join("folder/a.csv"), base.join("folder/Sub/b.txt")]);
    assert_eq!(std::fs::read(base.join("folder/a.csv")).unwrap(), b"a".to_vec());
    assert_eq!(std::fs::read(base.join("folder/Sub/b.txt")).unwrap(), b"b".to_vec());
    assert!(!base.join("other").exists());
}

#[test]
fn test_extract_twice_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::new(dir.path());
    let archive = build_zip(&[("UKMD_May_2024/", ""), ("UKMD_May_2024/Data.CSV", "v1")]);

    extract_archive(&store, "UK", "u", &archive, "UKMD_May_2024").unwrap();
    let written = extract_archive(&store, "UK", "u", &archive, "UKMD_May_2024").unwrap();

    let folder = store.provider_dir("UK").join("UKMD_May_2024");
    assert_eq!(written, vec![folder.join("data.csv")]);
    assert_eq!(std::fs::read_dir(&folder).unwrap().count(), 1);
}

#[test]
fn test_extract_unsafe_name_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::new(dir.path());
    let archive = build_zip(&[("folder/a.csv", "a"), ("folder/../../evil.txt", "x")]);

    let result = extract_archive(&store, "UK", "u", &archive, "folder");

    assert!(matches!(
        result,
        Err(AcquisitionError::Storage { source: StorageError::InvalidPath { .. }, .. })
    ));
    assert!(!store.provider_dir("UK").join("folder").exists());
    assert!(!dir.path().join("evil.txt").exists());
}

#[test]
fn test_extract_renamed_folder_yields_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::new(dir.path());
    let provider = Provider::new("UK", "https://example.org/UKMD_", PayloadKind::Archive);
    let fetched = Fetched {
        url: "https://example.org/UKMD_May_2024.zip".to_owned(),
        body: build_zip(&[("ukmd_may_2024/data.csv", "a")]),
        period: None,
    };

    let written = persist(&store, &provider, &fetched).unwrap();

    assert!(written.is_empty());
    assert!(!store.provider_dir("UK").join("ukmd_may_2024").exists());
}

#[test]
fn test_extract_rejects_invalid_zip() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::new(dir.path());

    let result = extract_archive(&store, "UK", "https://example.org/UKMD_May_2024.zip", b"<html>not found</html>", "UKMD_May_2024");

    assert!(matches!(result, Err(AcquisitionError::Archive { .. })));
}

#[test]
fn test_extract_case_collision() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::new(dir.path());
    let archive = build_zip(&[("folder/Data.csv", "1"), ("folder/DATA.csv", "2")]);

    let result = extract_archive(&store, "UK", "u", &archive, "folder");

    match result {
        Err(AcquisitionError::Storage { source: StorageError::CaseCollision { first, second }, .. }) => {
            assert_eq!(first, "folder/Data.csv");
            assert_eq!(second, "folder/DATA.csv");
        },
        other => panic!("expected case collision, got {:?}", other),
    }
    assert!(!store.provider_dir("UK").join("folder").exists());
}

#[test]
fn test_persist_flat_provider() {
    let dir = tempfile::tempdir().unwrap();
    let store = DatasetStore::new(dir.path());
    let provider = Provider::new("US", "https://example.org/current.csv", PayloadKind::Flat);
    let fetched = Fetched {
        url: provider.url.clone(),
        body: b"sasdate,INDPRO\n1/1/2020,100\n".to_vec(),
        period: None,
    };

    let written = persist(&store, &provider, &fetched).unwrap();

    assert_eq!(written, vec![dir.path().join("US_MD").join("US_MD.csv")]);
    assert_eq!(std::fs::read(&written[0]).unwrap(), fetched.body);
}
