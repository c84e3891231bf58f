use std::path::PathBuf;

use chrono::NaiveDate;
use tracing::{error, info};

use crate::config::AcquisitionConfig;
use crate::error::AcquisitionError;
use crate::extract::persist;
use crate::fetcher::ArchiveFetcher;
use crate::store::DatasetStore;
use crate::transport::Transport;

#[derive(Debug)]
pub struct ProviderOutcome {
    pub provider: String,
    pub url: Option<String>, // the URL actually used, when a fetch succeeded
    pub bytes: usize,
    pub files: Vec<PathBuf>,
    pub error: Option<AcquisitionError>,
}

impl ProviderOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<ProviderOutcome>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &ProviderOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn successes(&self) -> impl Iterator<Item = &ProviderOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }
}

/// Drives one sequential pass over every configured provider.
pub struct FetchOrchestrator<'a, T: Transport> {
    config: &'a AcquisitionConfig,
    store: DatasetStore,
    transport: &'a T,
}

impl<'a, T: Transport> FetchOrchestrator<'a, T> {
    pub fn new(config: &'a AcquisitionConfig, transport: &'a T) -> FetchOrchestrator<'a, T> {
        FetchOrchestrator {
            config,
            store: DatasetStore::new(&config.data_dir),
            transport,
        }
    }

    /// Fetches and stores every provider in configuration order. A failing provider is
    /// logged and recorded; the remaining providers still run.
    pub fn run(&self, today: NaiveDate) -> RunReport {
        let fetcher = ArchiveFetcher::new(self.transport);
        let mut report = RunReport::default();

        for provider in &self.config.providers {
            let mut outcome = ProviderOutcome {
                provider: provider.id.to_owned(),
                url: None,
                bytes: 0,
                files: Vec::new(),
                error: None,
            };

            let result = fetcher.fetch(provider, today).and_then(|fetched| {
                let period = fetched.period.map(|p| p.to_string()).unwrap_or_else(|| "current".to_owned());
                info!(provider = %provider.id, url = %fetched.url, period = %period, bytes = fetched.body.len(), "download completed");
                outcome.url = Some(fetched.url.to_owned());
                outcome.bytes = fetched.body.len();
                persist(&self.store, provider, &fetched)
            });

            match result {
                Ok(files) => {
                    info!(
                        provider = %provider.id,
                        url = outcome.url.as_deref().unwrap_or(""),
                        bytes = outcome.bytes,
                        files = files.len(),
                        outcome = "stored",
                        "provider completed"
                    );
                    outcome.files = files;
                },
                Err(e) => {
                    error!(
                        provider = %provider.id,
                        url = outcome.url.as_deref().unwrap_or(""),
                        bytes = outcome.bytes,
                        kind = e.kind(),
                        outcome = "failed",
                        "{}",
                        e
                    );
                    outcome.error = Some(e);
                },
            }

            report.outcomes.push(outcome);
        }

        info!(
            providers = report.outcomes.len(),
            succeeded = report.successes().count(),
            failed = report.failures().count(),
            "acquisition run finished"
        );

        report
    }
}

#[cfg(test)]
fn test_config(data_dir: &std::path::Path, providers: Vec<crate::config::Provider>) -> AcquisitionConfig {
    AcquisitionConfig {
        data_dir: data_dir.to_owned(),
        http: Default::default(),
        providers,
    }
}

#[test]
fn test_flat_provider_end_to_end() {
    use crate::config::{PayloadKind, Provider};
    use crate::transport::mock::MockTransport;

    let dir = tempfile::tempdir().unwrap();
    let body = "sasdate,INDPRO\n1/1/2020,100\n";
    let config = test_config(dir.path(), vec![Provider::new("US", "https://example.org/current.csv", PayloadKind::Flat)]);
    let transport = MockTransport::new().route("https://example.org/current.csv", 200, body.as_bytes());

    let report = FetchOrchestrator::new(&config, &transport).run(NaiveDate::from_ymd_opt(2024, 4, 2).unwrap());

    assert_eq!(report.failures().count(), 0);
    assert_eq!(report.outcomes[0].bytes, body.len());
    assert_eq!(std::fs::read_to_string(dir.path().join("US_MD/US_MD.csv")).unwrap(), body);
}

#[test]
fn test_archive_provider_previous_month_end_to_end() {
    use crate::config::{PayloadKind, Provider};
    use crate::extract::build_zip;
    use crate::transport::mock::MockTransport;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), vec![Provider::new("CANADA", "https://example.org/LCDMA_", PayloadKind::Archive)]);
    let archive = build_zip(&[("LCDMA_March_2024/Data.csv", "date,x\n"), ("__MACOSX/._Data.csv", "")]);
    let transport = MockTransport::new()
        .route("https://example.org/LCDMA_April_2024.zip", 404, b"")
        .route("https://example.org/LCDMA_March_2024.zip", 200, &archive);

    let report = FetchOrchestrator::new(&config, &transport).run(NaiveDate::from_ymd_opt(2024, 4, 2).unwrap());

    let outcome = &report.outcomes[0];
    assert!(outcome.is_success());
    assert_eq!(outcome.url.as_deref(), Some("https://example.org/LCDMA_March_2024.zip"));
    assert_eq!(outcome.files, vec![dir.path().join("CANADA_MD/LCDMA_March_2024/data.csv")]);
    assert!(dir.path().join("CANADA_MD/LCDMA_March_2024/data.csv").is_file());
    assert!(!dir.path().join("CANADA_MD/__MACOSX").exists());
}

#[test]
fn test_storage_failure_keeps_resolved_url() {
    use crate::config::{PayloadKind, Provider};
    use crate::transport::mock::MockTransport;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), vec![Provider::new("UK", "https://example.org/UKMD_", PayloadKind::Archive)]);
    let transport = MockTransport::new().route("https://example.org/UKMD_April_2024.zip", 200, b"<html></html>");

    let report = FetchOrchestrator::new(&config, &transport).run(NaiveDate::from_ymd_opt(2024, 4, 2).unwrap());

    let outcome = &report.outcomes[0];
    assert!(matches!(outcome.error, Some(AcquisitionError::Archive { .. })));
    assert_eq!(outcome.url.as_deref(), Some("https://example.org/UKMD_April_2024.zip"));
    assert_eq!(outcome.bytes, 13);
}

#[test]
fn test_failure_does_not_stop_the_run() {
    use crate::config::{PayloadKind, Provider};
    use crate::transport::mock::MockTransport;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        dir.path(),
        vec![
            Provider::new("US", "https://example.org/us.csv", PayloadKind::Flat),
            Provider::new("CANADA", "https://example.org/LCDMA_", PayloadKind::Archive),
            Provider::new("EU", "https://example.org/eu.csv", PayloadKind::Flat),
        ],
    );
    let transport = MockTransport::new()
        .route("https://example.org/us.csv", 200, b"a\n")
        .route("https://example.org/eu.csv", 200, b"b\n");

    let report = FetchOrchestrator::new(&config, &transport).run(NaiveDate::from_ymd_opt(2024, 4, 2).unwrap());

    assert_eq!(report.outcomes.len(), 3);
    let failed: Vec<&str> = report.failures().map(|o| o.provider.as_str()).collect();
    assert_eq!(failed, vec!["CANADA"]);
    assert!(matches!(report.outcomes[1].error, Some(AcquisitionError::Network { .. })));
    assert!(dir.path().join("EU_MD/EU_MD.csv").is_file());
    assert_eq!(transport.requested().last().map(String::as_str), Some("https://example.org/eu.csv"));
}
