use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::calendar::YearMonth;
use crate::config::{PayloadKind, Provider};
use crate::error::AcquisitionError;
use crate::transport::{FetchAttempt, Transport};

/// The authoritative payload for a provider in this run.
#[derive(Debug)]
pub struct Fetched {
    pub url: String,
    pub body: Vec<u8>,
    pub period: Option<YearMonth>, // None for flat providers
}

pub fn archive_url(provider: &Provider, period: YearMonth) -> String {
    format!("{}{}.zip", provider.url, period.label())
}

pub struct ArchiveFetcher<'a, T: Transport> {
    transport: &'a T,
}

impl<'a, T: Transport> ArchiveFetcher<'a, T> {
    pub fn new(transport: &'a T) -> ArchiveFetcher<'a, T> {
        ArchiveFetcher { transport }
    }

    /// Retrieves the provider's payload. Archive providers fall back to the previous month's
    /// archive exactly once when the current month has not been published yet.
    pub fn fetch(&self, provider: &Provider, today: NaiveDate) -> Result<Fetched, AcquisitionError> {
        match provider.kind {
            PayloadKind::Flat => {
                let attempt = self.attempt(provider, &provider.url);
                if attempt.is_success() {
                    Ok(Fetched { url: attempt.url, body: attempt.body, period: None })
                } else {
                    Err(AcquisitionError::Network {
                        provider: provider.id.to_owned(),
                        reason: attempt.reason(),
                        attempted: vec![attempt.url],
                    })
                }
            },
            PayloadKind::Archive => {
                let current = YearMonth::from_date(today);
                let first = self.attempt(provider, &archive_url(provider, current));
                if first.is_success() {
                    return Ok(Fetched { url: first.url, body: first.body, period: Some(current) });
                }

                let previous = current.previous();
                warn!(provider = %provider.id, url = %first.url, reason = %first.reason(), "current month unavailable, falling back to {}", previous.label());

                let second = self.attempt(provider, &archive_url(provider, previous));
                if second.is_success() {
                    return Ok(Fetched { url: second.url, body: second.body, period: Some(previous) });
                }

                Err(AcquisitionError::Network {
                    provider: provider.id.to_owned(),
                    reason: format!("{}; {}", first.reason(), second.reason()),
                    attempted: vec![first.url, second.url],
                })
            },
        }
    }

    fn attempt(&self, provider: &Provider, url: &str) -> FetchAttempt {
        let attempt = self.transport.get(url);
        debug!(provider = %provider.id, url = %url, status = ?attempt.status, bytes = attempt.body.len(), "request finished");
        attempt
    }
}

#[cfg(test)]
fn fixed_day(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 15).unwrap()
}

#[test]
fn test_flat_provider_uses_fixed_url_only() {
    use crate::transport::mock::MockTransport;

    let provider = Provider::new("US", "https://example.org/current.csv", PayloadKind::Flat);
    let transport = MockTransport::new().route("https://example.org/current.csv", 200, b"sasdate,INDPRO\n");

    let fetched = ArchiveFetcher::new(&transport).fetch(&provider, fixed_day(2024, 4)).unwrap();

    assert_eq!(fetched.url, "https://example.org/current.csv");
    assert_eq!(fetched.body, b"sasdate,INDPRO\n".to_vec());
    assert_eq!(fetched.period, None);
    assert_eq!(transport.requested(), vec!["https://example.org/current.csv".to_owned()]);
}

#[test]
fn test_flat_provider_failure_does_not_fall_back() {
    use crate::transport::mock::MockTransport;

    let provider = Provider::new("US", "https://example.org/current.csv", PayloadKind::Flat);
    let transport = MockTransport::new().route("https://example.org/current.csv", 503, b"");

    let result = ArchiveFetcher::new(&transport).fetch(&provider, fixed_day(2024, 4));

    match result {
        Err(AcquisitionError::Network { provider, attempted, reason }) => {
            assert_eq!(provider, "US");
            assert_eq!(attempted, vec!["https://example.org/current.csv".to_owned()]);
            assert_eq!(reason, "HTTP 503");
        },
        other => panic!("expected network error, got {:?}", other),
    }
    assert_eq!(transport.requested().len(), 1);
}

#[test]
fn test_archive_current_month() {
    use crate::transport::mock::MockTransport;

    let provider = Provider::new("UK", "https://example.org/UKMD_", PayloadKind::Archive);
    let transport = MockTransport::new().route("https://example.org/UKMD_April_2024.zip", 200, b"PK");

    let fetched = ArchiveFetcher::new(&transport).fetch(&provider, fixed_day(2024, 4)).unwrap();

    assert_eq!(fetched.url, "https://example.org/UKMD_April_2024.zip");
    assert_eq!(fetched.period, Some(YearMonth { year: 2024, month: 4 }));
    assert_eq!(transport.requested().len(), 1);
}

#[test]
fn test_archive_falls_back_across_year() {
    use crate::transport::mock::MockTransport;

    let provider = Provider::new("CANADA", "https://example.org/LCDMA_", PayloadKind::Archive);
    let transport = MockTransport::new().route("https://example.org/LCDMA_December_2023.zip", 200, b"PK");

    let fetched = ArchiveFetcher::new(&transport).fetch(&provider, fixed_day(2024, 1)).unwrap();

    assert_eq!(fetched.url, "https://example.org/LCDMA_December_2023.zip");
    assert_eq!(fetched.period, Some(YearMonth { year: 2023, month: 12 }));
    assert_eq!(
        transport.requested(),
        vec![
            "https://example.org/LCDMA_January_2024.zip".to_owned(),
            "https://example.org/LCDMA_December_2023.zip".to_owned(),
        ]
    );
}

#[test]
fn test_archive_both_months_missing() {
    use crate::transport::mock::MockTransport;

    let provider = Provider::new("CANADA", "https://example.org/LCDMA_", PayloadKind::Archive);
    let transport = MockTransport::new();

    let result = ArchiveFetcher::new(&transport).fetch(&provider, fixed_day(2024, 3));

    match result {
        Err(AcquisitionError::Network { provider, attempted, .. }) => {
            assert_eq!(provider, "CANADA");
            assert_eq!(
                attempted,
                vec![
                    "https://example.org/LCDMA_March_2024.zip".to_owned(),
                    "https://example.org/LCDMA_February_2024.zip".to_owned(),
                ]
            );
        },
        other => panic!("expected network error, got {:?}", other),
    }
    assert_eq!(transport.requested().len(), 2);
}
