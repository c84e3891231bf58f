use std::path::{Path, PathBuf};
use std::process;

#[macro_use]
extern crate lazy_static;

use chrono::Local;
use clap::{App, Arg, ArgMatches};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod calendar;
mod catalog;
mod config;
mod error;
mod extract;
mod fetcher;
mod orchestrator;
mod store;
mod transport;

use config::AcquisitionConfig;
use error::ConfigError;
use orchestrator::FetchOrchestrator;
use transport::UreqTransport;

fn command_usage<'a, 'b>() -> App<'a, 'b> {
    const DEFAULT_CONFIG: &str = "config/providers.toml";

    App::new("md-acquisition")
    .author("Matthew Scheffel <matt@dataheck.com>")
    .about("Downloads the current monthly macroeconomic (FRED-MD style) datasets into per-provider folders")
    .arg(
        Arg::with_name("config")
            .long("config")
            .takes_value(true)
            .default_value(DEFAULT_CONFIG)
            .help("Location of the provider configuration. Built-in providers are used when the file does not exist.")
    )
    .arg(
        Arg::with_name("data-dir")
            .short("d")
            .long("data-dir")
            .takes_value(true)
            .help("Root data directory holding the <PROVIDER>_MD folders. Overrides the configuration.")
    )
    .arg(
        Arg::with_name("provider")
            .short("p")
            .long("provider")
            .takes_value(true)
            .help("Only fetch this configured provider")
    )
    .arg(
        Arg::with_name("http-connect-timeout")
            .long("http-connect-timeout")
            .takes_value(true)
            .help("HTTP connection timeout in milliseconds. Overrides the configuration.")
    )
    .arg(
        Arg::with_name("http-receive-timeout")
            .long("http-receive-timeout")
            .takes_value(true)
            .help("HTTP receive timeout in milliseconds. Overrides the configuration.")
    )
    .arg(
        Arg::with_name("catalog")
            .short("c")
            .long("catalog")
            .takes_value(false)
            .help("List the series already stored in the data directory instead of fetching")
    )
}

fn parse_millis(matches: &ArgMatches, name: &str) -> Result<Option<u64>, ConfigError> {
    match matches.value_of(name) {
        Some(v) => v
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("invalid {} specified: '{}'", name, v))),
        None => Ok(None),
    }
}

fn build_config(matches: &ArgMatches) -> Result<AcquisitionConfig, ConfigError> {
    let config_path = Path::new(matches.value_of("config").unwrap_or_default());
    let (mut config, found) = AcquisitionConfig::load_or_default(config_path)?;
    if found {
        info!(path = %config_path.display(), providers = config.providers.len(), "loaded provider configuration");
    } else {
        warn!(path = %config_path.display(), "configuration not found, using built-in providers");
    }

    if let Some(dir) = matches.value_of("data-dir") {
        config.data_dir = PathBuf::from(dir);
    }
    if let Some(ms) = parse_millis(matches, "http-connect-timeout")? {
        config.http.connect_timeout_ms = ms;
    }
    if let Some(ms) = parse_millis(matches, "http-receive-timeout")? {
        config.http.read_timeout_ms = ms;
    }
    if let Some(id) = matches.value_of("provider") {
        config = config.only(id)?;
    }

    config.validate()?;
    Ok(config)
}

fn print_catalog(root: &Path) {
    let files = catalog::scan(root);
    if files.is_empty() {
        println!("No stored series found under {}.", root.display());
        return;
    }

    for file in files {
        println!(
            "{:<8} {} (date column `{}`, {} series, {} rows, {} .. {}){}",
            file.provider,
            file.path.display(),
            file.date_column,
            file.series.len(),
            file.rows,
            file.first_date.as_deref().unwrap_or("?"),
            file.last_date.as_deref().unwrap_or("?"),
            if file.leading_metadata_row { " [leading metadata row]" } else { "" }
        );
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let matches = command_usage().get_matches();

    let config = match build_config(&matches) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            process::exit(2);
        }
    };

    if matches.is_present("catalog") {
        print_catalog(&config.data_dir);
        return;
    }

    let today = Local::now().naive_local().date();
    info!(data_dir = %config.data_dir.display(), date = %today, "starting acquisition run");

    let transport = UreqTransport::new(config.http.clone());
    let report = FetchOrchestrator::new(&config, &transport).run(today);

    for stored in report.successes() {
        info!(provider = %stored.provider, url = stored.url.as_deref().unwrap_or(""), bytes = stored.bytes, files = stored.files.len(), "up to date");
    }

    // provider failures are logged above; the run itself completed, so the exit code stays 0
    for failed in report.failures() {
        if let Some(e) = &failed.error {
            warn!(provider = %failed.provider, "not updated: {}", e);
        }
    }
}
