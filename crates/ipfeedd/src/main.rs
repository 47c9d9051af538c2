// # ipfeedd - threat-intelligence collector daemon
//
// Thin integration layer: reads configuration from the environment, wires
// one authenticator, strategy list and runner per portal into the
// collection scheduler, and waits for a shutdown signal. Collection logic
// lives in ipfeed-core; portal specifics live in ipfeed-portal.
//
// ## Configuration
//
// ### Sources
// - `IPFEED_SOURCES`: Comma-separated source names, e.g. `krcert,partner-feed`
//
// For each source, with the name upper-cased and `-` replaced by `_`:
// - `IPFEED_<NAME>_BASE_URL`: Portal root URL
// - `IPFEED_<NAME>_IDENTITY`: Login identity
// - `IPFEED_<NAME>_SECRET`: Login secret
// - `IPFEED_<NAME>_INTERVAL_HOURS`: Collection interval, 1..=168 (default 24)
// - `IPFEED_<NAME>_ENABLED`: `true` or `false` (default true)
//
// ### Storage
// - `IPFEED_DATABASE_URL`: PostgreSQL URL. Unset keeps records in memory
// - `IPFEED_RETENTION_DAYS`: Days a record stays active (default 90)
//
// ### Extraction
// - `IPFEED_EXTRACTION_MODE`: `first_success` (default) or `merge_all`
// - `IPFEED_LOOKBACK_DAYS`: Size of the date window ending today (default 7)
//
// ### Logging
// - `IPFEED_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export IPFEED_SOURCES=krcert
// export IPFEED_KRCERT_BASE_URL=https://portal.example.org
// export IPFEED_KRCERT_IDENTITY=analyst
// export IPFEED_KRCERT_SECRET=...
// export IPFEED_DATABASE_URL=postgres://ipfeed@localhost/ipfeed
//
// ipfeedd
// ```

use anyhow::{Context, Result};
use chrono::Utc;
use ipfeed_core::config::{CollectorConfig, Credential, ExtractionMode, SourceConfig, StoreConfig};
use ipfeed_core::traits::RecordStore;
use ipfeed_core::{
    CollectionScheduler, ExtractionRunner, MemoryRecordStore, PgRecordStore, RecordDefaults,
    SourceCollector,
};
use ipfeed_portal::{PortalAuthenticator, build_strategies};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How often expired records are deactivated
const EXPIRY_SWEEP_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum IpfeedExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<IpfeedExitCode> for ExitCode {
    fn from(code: IpfeedExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    collector: CollectorConfig,
    database_url: Option<String>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let names = split_list(&env::var("IPFEED_SOURCES").unwrap_or_default());

        let mut sources = Vec::with_capacity(names.len());
        for name in &names {
            sources.push(source_from_env(name)?);
        }

        let mut collector = CollectorConfig {
            sources,
            ..CollectorConfig::default()
        };

        if let Ok(mode) = env::var("IPFEED_EXTRACTION_MODE") {
            collector.extraction.mode = parse_mode(&mode)?;
        }
        if let Some(days) = parse_var::<u32>("IPFEED_LOOKBACK_DAYS")? {
            collector.extraction.lookback_days = days;
        }
        if let Some(days) = parse_var::<u32>("IPFEED_RETENTION_DAYS")? {
            collector.store = StoreConfig {
                retention_days: days,
                ..StoreConfig::default()
            };
        }

        Ok(Self {
            collector,
            database_url: env::var("IPFEED_DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            log_level: env::var("IPFEED_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Source, extraction and store checks are shared with the library;
    /// this adds the checks that only make sense for environment input.
    fn validate(&self) -> Result<()> {
        if self.collector.sources.is_empty() {
            anyhow::bail!(
                "IPFEED_SOURCES must name at least one source. \
                Set it via: export IPFEED_SOURCES=krcert"
            );
        }

        for source in &self.collector.sources {
            let secret = source.credential.secret.to_lowercase();
            if secret.contains("your_secret") || secret.contains("replace_me") || secret == "secret" {
                anyhow::bail!(
                    "{} appears to be a placeholder. Use the portal account's real secret.",
                    env_key(&source.source, "SECRET")
                );
            }
            if source.base_url.starts_with("http://") {
                eprintln!(
                    "WARNING: {} uses HTTP (not HTTPS). Portal credentials will be sent in clear text.",
                    env_key(&source.source, "BASE_URL")
                );
            }
        }

        self.collector.validate()?;

        if let Some(url) = &self.database_url
            && !url.starts_with("postgres://")
            && !url.starts_with("postgresql://")
        {
            anyhow::bail!(
                "IPFEED_DATABASE_URL must use the postgres:// or postgresql:// scheme. Got: {}",
                redact_url(url)
            );
        }

        parse_level(&self.log_level).with_context(|| {
            format!(
                "IPFEED_LOG_LEVEL '{}' is not valid. Valid levels: trace, debug, info, warn, error",
                self.log_level
            )
        })?;

        Ok(())
    }
}

fn source_from_env(name: &str) -> Result<SourceConfig> {
    let required = |field: &str| {
        let key = env_key(name, field);
        env::var(&key).with_context(|| format!("{} is required for source '{}'", key, name))
    };

    let credential = Credential::new(required("IDENTITY")?, required("SECRET")?);
    let mut source = SourceConfig::new(name, credential, required("BASE_URL")?);

    if let Some(hours) = parse_var::<u32>(&env_key(name, "INTERVAL_HOURS"))? {
        source = source.with_interval_hours(hours);
    }
    if let Some(enabled) = parse_var::<bool>(&env_key(name, "ENABLED"))? {
        source = source.with_enabled(enabled);
    }

    Ok(source)
}

/// `krcert-feed` + `SECRET` -> `IPFEED_KRCERT_FEED_SECRET`
fn env_key(source: &str, field: &str) -> String {
    format!(
        "IPFEED_{}_{}",
        source.trim().to_ascii_uppercase().replace(['-', '.', ' '], "_"),
        field
    )
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_var<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, value, e)),
        Err(_) => Ok(None),
    }
}

fn parse_mode(value: &str) -> Result<ExtractionMode> {
    match value.trim().to_lowercase().as_str() {
        "first_success" => Ok(ExtractionMode::FirstSuccess),
        "merge_all" => Ok(ExtractionMode::MergeAll),
        other => anyhow::bail!(
            "IPFEED_EXTRACTION_MODE '{}' is not supported. \
            Supported modes: first_success, merge_all",
            other
        ),
    }
}

fn parse_level(value: &str) -> Result<Level> {
    match value.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => anyhow::bail!("unknown log level '{}'", other),
    }
}

/// Hide the password part of a connection URL
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let userinfo = &url[scheme_end + 3..at];
            let user = userinfo.split(':').next().unwrap_or_default();
            format!("{}{}:<REDACTED>{}", &url[..scheme_end + 3], user, &url[at..])
        }
        _ => url.to_string(),
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return IpfeedExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return IpfeedExitCode::ConfigError.into();
    }

    let log_level = parse_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return IpfeedExitCode::ConfigError.into();
    }

    info!("Starting ipfeedd daemon");
    info!(
        "Configuration loaded: {} source(s), {:?} extraction",
        config.collector.sources.len(),
        config.collector.extraction.mode
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return IpfeedExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            IpfeedExitCode::RuntimeError
        } else {
            IpfeedExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let collector = config.collector;
    let store = open_store(config.database_url.as_deref(), &collector.store).await?;

    let scheduler = CollectionScheduler::new(collector.scheduler.clone());

    for source in &collector.sources {
        let authenticator = Arc::new(PortalAuthenticator::from_config(source));
        let runner = ExtractionRunner::new(
            build_strategies(source, &collector.extraction),
            &collector.extraction,
            RecordDefaults::new(&source.source, &collector.store),
        );
        let task = SourceCollector::new(
            &source.source,
            source.credential.clone(),
            authenticator,
            runner,
            store.clone(),
            collector.extraction.lookback_days,
        );

        scheduler.register_callback(
            &source.source,
            source.interval_hours,
            source.enabled,
            Arc::new(task),
        )?;
        info!(
            "Registered source {} ({}, every {}h{})",
            source.source,
            source.base_url,
            source.interval_hours,
            if source.enabled { "" } else { ", disabled" }
        );
    }

    scheduler.start()?;

    let maintenance_shutdown = CancellationToken::new();
    let maintenance = tokio::spawn(expire_records(store.clone(), maintenance_shutdown.clone()));

    info!("Daemon initialized successfully");

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);
    info!("Shutting down daemon");

    maintenance_shutdown.cancel();
    if let Err(e) = maintenance.await {
        warn!("Expiry maintenance task ended abnormally: {}", e);
    }

    scheduler.stop().await;

    for (source, entry) in scheduler.status() {
        info!(
            "{}: {} successful run(s), {} failed run(s)",
            source, entry.success_count, entry.failure_count
        );
    }

    Ok(())
}

async fn open_store(database_url: Option<&str>, config: &StoreConfig) -> Result<Arc<dyn RecordStore>> {
    match database_url {
        Some(url) => {
            let store = PgRecordStore::connect(url, config.retention_days)
                .await
                .with_context(|| format!("Failed to connect to {}", redact_url(url)))?;
            store.ensure_schema().await?;
            info!("Record store: PostgreSQL at {}", redact_url(url));
            Ok(Arc::new(store))
        }
        None => {
            warn!("IPFEED_DATABASE_URL is not set; records are kept in memory and lost on exit");
            Ok(Arc::new(MemoryRecordStore::new(config.retention_days)))
        }
    }
}

/// Deactivate records past their expiry until `shutdown` fires
async fn expire_records(store: Arc<dyn RecordStore>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(EXPIRY_SWEEP_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => match store.deactivate_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(count) => info!("Deactivated {} expired record(s)", count),
                Err(e) => warn!("Expiry sweep failed: {}", e),
            },
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
