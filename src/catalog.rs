//! Inventory of the series already stored under the data directory, as seen by the
//! dashboard: one CSV per file, a date column plus numeric indicator columns.

use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use regex::Regex;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesFile {
    pub provider: String,
    pub path: PathBuf,
    pub date_column: String,
    pub series: Vec<String>,
    pub rows: usize,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    pub leading_metadata_row: bool, // e.g. FRED-MD's `Transform:` codes, dropped by the dashboard
}

pub fn is_date_like(cell: &str) -> bool {
    lazy_static! {
        static ref RE_DATE: Regex = Regex::new(r"^\s*(\d{1,2}/\d{1,2}/\d{2,4}|\d{4}-\d{1,2}(-\d{1,2})?|\d{4}[:Mm]\d{1,2})\s*$").unwrap();
    }
    RE_DATE.is_match(cell)
}

fn catalog_filter(entry: &DirEntry) -> bool {
    let is_folder = entry.file_type().is_dir();
    let file_name = entry.file_name().to_string_lossy();

    match entry.depth() {
        0 => true,
        1 => is_folder && file_name.ends_with("_MD"),
        _ => is_folder || file_name.to_lowercase().ends_with(".csv"),
    }
}

/// Reads the header and rows of one stored CSV. Returns `Ok(None)` for a file without columns.
pub fn summarize(provider: &str, path: &Path) -> Result<Option<SeriesFile>, csv::Error> {
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();

    if headers.iter().all(|h| h.trim().is_empty()) {
        return Ok(None);
    }

    let date_index = headers
        .iter()
        .position(|h| h.to_lowercase().contains("date"))
        .unwrap_or(0);

    let series = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != date_index && !h.trim().is_empty())
        .map(|(_, h)| h.trim().to_owned())
        .collect();

    let mut summary = SeriesFile {
        provider: provider.to_owned(),
        path: path.to_owned(),
        date_column: headers.get(date_index).unwrap_or("").trim().to_owned(),
        series,
        rows: 0,
        first_date: None,
        last_date: None,
        leading_metadata_row: false,
    };

    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let cell = record.get(date_index).unwrap_or("").trim();

        if i == 0 && !is_date_like(cell) {
            summary.leading_metadata_row = true;
            continue;
        }
        if cell.is_empty() {
            continue; // trailing blank lines in some provider files
        }

        if summary.first_date.is_none() {
            summary.first_date = Some(cell.to_owned());
        }
        summary.last_date = Some(cell.to_owned());
        summary.rows += 1;
    }

    Ok(Some(summary))
}

/// Walks every `<PROVIDER>_MD` folder under `root` and summarizes each CSV found.
/// Files that cannot be parsed are logged and skipped.
pub fn scan(root: &Path) -> Vec<SeriesFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by(|a, b| a.file_name().cmp(b.file_name())).into_iter().filter_entry(catalog_filter) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let provider = entry
            .path()
            .strip_prefix(root)
            .ok()
            .and_then(|p| p.components().next())
            .map(|c| c.as_os_str().to_string_lossy().trim_end_matches("_MD").to_owned())
            .unwrap_or_default();

        match summarize(&provider, entry.path()) {
            Ok(Some(summary)) => {
                debug!(provider = %summary.provider, path = %summary.path.display(), series = summary.series.len(), rows = summary.rows, "catalogued");
                files.push(summary);
            },
            Ok(None) => {
                debug!(path = %entry.path().display(), "no header row, skipped");
            },
            Err(e) => {
                warn!(path = %entry.path().display(), "failed to read csv: {}", e);
            },
        }
    }

    files
}

#[test]
fn test_date_like() {
    assert!(is_date_like("1/1/1959"));
    assert!(is_date_like("2024-03-01"));
    assert!(is_date_like("1959:01"));
    assert!(!is_date_like("Transform:"));
    assert!(!is_date_like(""));
}

#[test]
fn test_summarize_fred_md_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("US_MD.csv");
    std::fs::write(&path, "sasdate,RPI,INDPRO\nTransform:,5,5\n1/1/1959,2437.296,21.9616\n2/1/1959,2446.902,22.3917\n\n").unwrap();

    let summary = summarize("US", &path).unwrap().unwrap();

    assert_eq!(summary.date_column, "sasdate");
    assert_eq!(summary.series, vec!["RPI".to_owned(), "INDPRO".to_owned()]);
    assert!(summary.leading_metadata_row);
    assert_eq!(summary.rows, 2);
    assert_eq!(summary.first_date.as_deref(), Some("1/1/1959"));
    assert_eq!(summary.last_date.as_deref(), Some("2/1/1959"));
}

#[test]
fn test_scan_provider_folders() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("US_MD")).unwrap();
    std::fs::create_dir_all(root.join("UK_MD/UKMD_May_2024")).unwrap();
    std::fs::create_dir_all(root.join("scratch")).unwrap();
    std::fs::write(root.join("US_MD/US_MD.csv"), "sasdate,RPI\n1/1/1959,1\n").unwrap();
    std::fs::write(root.join("UK_MD/UKMD_May_2024/balanced_uk_md.csv"), "Date,EMP\n2024-01-01,3\n").unwrap();
    std::fs::write(root.join("UK_MD/UKMD_May_2024/readme.txt"), "notes").unwrap();
    std::fs::write(root.join("scratch/other.csv"), "date,x\n").unwrap();
    std::fs::write(root.join("US_MD/bad.csv"), b"Date,X\n\xff\xfe,1\n".to_vec()).unwrap();

    let files = scan(root);

    let providers: Vec<&str> = files.iter().map(|f| f.provider.as_str()).collect();
    assert_eq!(providers, vec!["UK", "US"]);
    assert_eq!(files[0].series, vec!["EMP".to_owned()]);
    assert_eq!(files[1].path, root.join("US_MD/US_MD.csv"));
    assert!(files.iter().all(|f| !f.path.ends_with("bad.csv")));
    assert!(!files[0].leading_metadata_row);
}
