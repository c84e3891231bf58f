use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

pub const USER_AGENT: &str = "md-acquisition/0.1";

const DEFAULT_CONNECT_TIMEOUT: u64 = 30_000;
const DEFAULT_READ_TIMEOUT: u64 = 120_000; // archives are a few megabytes and the mirrors are slow

/// How a provider publishes its monthly payload.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Flat,    // a single unversioned CSV at a fixed URL
    Archive, // a zip named `<prefix><Month>_<Year>.zip`
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub id: String,
    pub url: String, // full URL for flat providers, prefix for archive providers
    pub kind: PayloadKind,
}

impl Provider {
    pub fn new(id: &str, url: &str, kind: PayloadKind) -> Provider {
        Provider {
            id: id.to_owned(),
            url: url.to_owned(),
            kind,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT,
            read_timeout_ms: DEFAULT_READ_TIMEOUT,
            user_agent: USER_AGENT.to_owned(),
        }
    }
}

/// Everything a single acquisition run needs. Built once at startup and never mutated
/// while providers are processed.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(rename = "provider")]
    pub providers: Vec<Provider>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        AcquisitionConfig {
            data_dir: default_data_dir(),
            http: HttpConfig::default(),
            providers: vec![
                Provider::new("CANADA", "https://www.stevanovic.uqam.ca/LCDMA_", PayloadKind::Archive),
                Provider::new("US", "https://files.stlouisfed.org/files/htdocs/fred-md/monthly/current.csv", PayloadKind::Flat),
                Provider::new("UK", "https://www.stevanovic.uqam.ca/UKMD_", PayloadKind::Archive),
            ],
        }
    }
}

impl AcquisitionConfig {
    pub fn from_toml(text: &str) -> Result<AcquisitionConfig, ConfigError> {
        let config: AcquisitionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the configuration at `path`, or falls back to the built-in providers when the
    /// file does not exist. The boolean reports whether the file was found.
    pub fn load_or_default(path: &Path) -> Result<(AcquisitionConfig, bool), ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok((AcquisitionConfig::from_toml(&text)?, true)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok((AcquisitionConfig::default(), false)),
            Err(e) => Err(ConfigError::Read { path: path.to_owned(), source: e }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid("no providers configured".to_owned()));
        }

        // ureq treats 0 as "no timeout"
        if self.http.connect_timeout_ms == 0 || self.http.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("http timeouts must be greater than zero".to_owned()));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            let id_ok = !provider.id.is_empty()
                && provider.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !id_ok {
                return Err(ConfigError::Invalid(format!("provider id `{}` must be non-empty ASCII alphanumerics, `_` or `-`", provider.id)));
            }

            if !seen.insert(provider.id.as_str()) {
                return Err(ConfigError::Invalid(format!("provider `{}` is configured twice", provider.id)));
            }

            if !(provider.url.starts_with("http://") || provider.url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!("provider `{}` has a non-HTTP url: {}", provider.id, provider.url)));
            }
        }

        Ok(())
    }

    /// Narrows the run to a single configured provider.
    pub fn only(mut self, id: &str) -> Result<AcquisitionConfig, ConfigError> {
        self.providers.retain(|p| p.id == id);
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid(format!("provider `{}` is not known to the configuration", id)));
        }
        Ok(self)
    }
}

#[test]
fn test_parse_provider_config() {
    let text = r#"
        data_dir = "/srv/md"

        [http]
        connect_timeout_ms = 1000

        [[provider]]
        id = "UK"
        url = "https://www.stevanovic.uqam.ca/UKMD_"
        kind = "archive"

        [[provider]]
        id = "US"
        url = "https://files.stlouisfed.org/files/htdocs/fred-md/monthly/current.csv"
        kind = "flat"
    "#;

    let config = AcquisitionConfig::from_toml(text).unwrap();

    assert_eq!(config.data_dir, PathBuf::from("/srv/md"));
    assert_eq!(config.http.connect_timeout_ms, 1000);
    assert_eq!(config.http.read_timeout_ms, DEFAULT_READ_TIMEOUT);
    let order: Vec<&str> = config.providers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(order, vec!["UK", "US"]);
    assert_eq!(config.providers[0].kind, PayloadKind::Archive);
    assert_eq!(config.providers[1].kind, PayloadKind::Flat);
}

#[test]
fn test_default_config_order() {
    let config = AcquisitionConfig::default();
    config.validate().unwrap();

    let order: Vec<&str> = config.providers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(order, vec!["CANADA", "US", "UK"]);
}

#[test]
fn test_rejects_duplicate_and_unknown() {
    let text = r#"
        [[provider]]
        id = "US"
        url = "https://example.org/a.csv"
        kind = "flat"

        [[provider]]
        id = "US"
        url = "https://example.org/b.csv"
        kind = "flat"
    "#;
    assert!(matches!(AcquisitionConfig::from_toml(text), Err(ConfigError::Invalid(_))));

    let bad_kind = r#"
        [[provider]]
        id = "US"
        url = "https://example.org/a.csv"
        kind = "tarball"
    "#;
    assert!(matches!(AcquisitionConfig::from_toml(bad_kind), Err(ConfigError::Parse(_))));

    assert!(AcquisitionConfig::default().only("MARS").is_err());
    assert_eq!(AcquisitionConfig::default().only("UK").unwrap().providers.len(), 1);
}

#[test]
fn test_rejects_zero_timeouts() {
    let text = r#"
        [http]
        connect_timeout_ms = 0

        [[provider]]
        id = "US"
        url = "https://example.org/a.csv"
        kind = "flat"
    "#;
    assert!(matches!(AcquisitionConfig::from_toml(text), Err(ConfigError::Invalid(_))));

    let mut config = AcquisitionConfig::default();
    config.http.read_timeout_ms = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_rejects_bad_ids_urls_and_empty_lists() {
    let with = |id: &str, url: &str| AcquisitionConfig {
        providers: vec![Provider::new(id, url, PayloadKind::Flat)],
        ..AcquisitionConfig::default()
    };

    assert!(matches!(with("US", "ftp://example.org/a.csv").validate(), Err(ConfigError::Invalid(_))));
    assert!(matches!(with("U S", "https://example.org/a.csv").validate(), Err(ConfigError::Invalid(_))));
    assert!(matches!(with("", "https://example.org/a.csv").validate(), Err(ConfigError::Invalid(_))));
    with("US_md-2", "http://example.org/a.csv").validate().unwrap();

    assert!(matches!(AcquisitionConfig::from_toml("provider = []"), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let (config, found) = AcquisitionConfig::load_or_default(&dir.path().join("providers.toml")).unwrap();

    assert!(!found);
    assert_eq!(config, AcquisitionConfig::default());
}
