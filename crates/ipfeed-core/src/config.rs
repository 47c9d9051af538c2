//! Configuration types for the collection pipeline
//!
//! This module defines all configuration structures used throughout the crate.
//! Loading (environment, files) is the daemon's job; everything here is plain
//! data plus validation.

use serde::{Deserialize, Serialize};

use crate::model::ThreatLevel;

/// Smallest accepted collection interval
pub const MIN_INTERVAL_HOURS: u32 = 1;

/// Largest accepted collection interval (one week)
pub const MAX_INTERVAL_HOURS: u32 = 168;

/// Largest accepted delay before a source's first run (one week)
pub const MAX_INITIAL_DELAY_SECS: u64 = MAX_INTERVAL_HOURS as u64 * 3600;

/// Check an interval against the accepted bounds
pub fn validate_interval_hours(interval_hours: u32) -> crate::Result<()> {
    if !(MIN_INTERVAL_HOURS..=MAX_INTERVAL_HOURS).contains(&interval_hours) {
        return Err(crate::Error::schedule_config(format!(
            "interval_hours must be between {} and {}. Got: {}",
            MIN_INTERVAL_HOURS, MAX_INTERVAL_HOURS, interval_hours
        )));
    }
    Ok(())
}

/// Top-level collector configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Sources to collect from
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

impl CollectorConfig {
    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.sources.is_empty() {
            return Err(crate::Error::config("No sources configured"));
        }

        let mut names = std::collections::HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !names.insert(source.source.as_str()) {
                return Err(crate::Error::config(format!(
                    "Duplicate source name: {}",
                    source.source
                )));
            }
        }

        self.extraction.validate()?;
        self.scheduler.validate()?;
        self.store.validate()?;

        Ok(())
    }
}

/// Portal login identity. Immutable for the process lifetime.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub identity: String,
    /// ⚠️ NEVER log this value
    pub secret: String,
}

impl Credential {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }
}

// Custom Debug implementation that hides the secret
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("identity", &self.identity)
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

/// One threat-intelligence portal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name, unique across the config
    pub source: String,

    pub credential: Credential,

    /// Portal root, e.g. `https://portal.example.org`
    pub base_url: String,

    #[serde(default = "default_interval_hours")]
    pub interval_hours: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Portal-specific paths and form fields
    #[serde(default)]
    pub portal: PortalEndpoints,
}

impl SourceConfig {
    pub fn new(
        source: impl Into<String>,
        credential: Credential,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            credential,
            base_url: base_url.into(),
            interval_hours: default_interval_hours(),
            enabled: true,
            portal: PortalEndpoints::default(),
        }
    }

    pub fn with_interval_hours(mut self, interval_hours: u32) -> Self {
        self.interval_hours = interval_hours;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validate the source configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.source.trim().is_empty() {
            return Err(crate::Error::config("Source name cannot be empty"));
        }
        if self.credential.identity.is_empty() {
            return Err(crate::Error::config(format!(
                "Source {}: identity cannot be empty",
                self.source
            )));
        }
        if self.credential.secret.is_empty() {
            return Err(crate::Error::config(format!(
                "Source {}: secret cannot be empty",
                self.source
            )));
        }
        if !self.base_url.starts_with("https://") && !self.base_url.starts_with("http://") {
            return Err(crate::Error::config(format!(
                "Source {}: base_url must use HTTP or HTTPS scheme. Got: {}",
                self.source, self.base_url
            )));
        }
        validate_interval_hours(self.interval_hours)?;
        self.portal.validate()
    }
}

/// Paths, form fields and markers of a portal
///
/// Source-specific quirks live here rather than in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalEndpoints {
    #[serde(default = "default_login_page")]
    pub login_page: String,

    /// Pre-login identity check endpoint
    #[serde(default = "default_verify_user")]
    pub verify_user: String,

    #[serde(default = "default_login_submit")]
    pub login_submit: String,

    #[serde(default = "default_logout")]
    pub logout: String,

    #[serde(default = "default_listing")]
    pub listing: String,

    #[serde(default = "default_export")]
    pub export: String,

    /// Tried in order by the API-probe strategy
    #[serde(default = "default_api_candidates")]
    pub api_candidates: Vec<String>,

    #[serde(default = "default_identity_field")]
    pub identity_field: String,

    #[serde(default = "default_secret_field")]
    pub secret_field: String,

    /// Extra static fields sent with the login form
    #[serde(default)]
    pub extra_login_fields: Vec<(String, String)>,

    /// Any of these in the post-login body marks an authenticated page
    #[serde(default = "default_authenticated_markers")]
    pub authenticated_markers: Vec<String>,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long a fresh session is trusted before `refresh` logs in again
    #[serde(default = "default_session_ttl_mins")]
    pub session_ttl_mins: u64,
}

impl PortalEndpoints {
    pub fn validate(&self) -> crate::Result<()> {
        for (name, path) in [
            ("login_page", &self.login_page),
            ("verify_user", &self.verify_user),
            ("login_submit", &self.login_submit),
            ("listing", &self.listing),
            ("export", &self.export),
        ] {
            // An empty verify_user skips the identity check
            if name == "verify_user" && path.is_empty() {
                continue;
            }
            if !path.starts_with('/') {
                return Err(crate::Error::config(format!(
                    "Portal path {} must start with '/'. Got: {}",
                    name, path
                )));
            }
        }
        if self.authenticated_markers.is_empty() {
            return Err(crate::Error::config(
                "At least one authenticated marker is required",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(crate::Error::config("request_timeout_secs must be > 0"));
        }
        Ok(())
    }
}

impl Default for PortalEndpoints {
    fn default() -> Self {
        Self {
            login_page: default_login_page(),
            verify_user: default_verify_user(),
            login_submit: default_login_submit(),
            logout: default_logout(),
            listing: default_listing(),
            export: default_export(),
            api_candidates: default_api_candidates(),
            identity_field: default_identity_field(),
            secret_field: default_secret_field(),
            extra_login_fields: Vec::new(),
            authenticated_markers: default_authenticated_markers(),
            request_timeout_secs: default_request_timeout_secs(),
            session_ttl_mins: default_session_ttl_mins(),
        }
    }
}

/// How the runner combines strategy output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Stop at the first strategy that yields valid addresses
    #[default]
    FirstSuccess,
    /// Run every strategy and merge their output
    MergeAll,
}

/// Extraction runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub mode: ExtractionMode,

    /// Size of the date window ending today
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Hard stop for listing pagination
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Extra attempts for a strategy that errors (not for one that is empty)
    #[serde(default = "default_strategy_retries")]
    pub strategy_retries: usize,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl ExtractionConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.lookback_days == 0 {
            return Err(crate::Error::config("lookback_days must be > 0"));
        }
        if self.page_size == 0 {
            return Err(crate::Error::config("page_size must be > 0"));
        }
        if self.max_pages == 0 {
            return Err(crate::Error::config("max_pages must be > 0"));
        }
        if self.strategy_retries > 10 {
            return Err(crate::Error::config(format!(
                "strategy_retries must be between 0 and 10. Got: {}",
                self.strategy_retries
            )));
        }
        Ok(())
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::default(),
            lookback_days: default_lookback_days(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            strategy_retries: default_strategy_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Background loop period
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Delay before the first run of a newly enabled source
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    /// Upper bound for one run, authentication to logout
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// How long `stop()` waits for in-flight runs
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_run_log_capacity")]
    pub run_log_capacity: usize,

    #[serde(default = "default_run_log_retention_hours")]
    pub run_log_retention_hours: u32,

    #[serde(default = "default_run_history_capacity")]
    pub run_history_capacity: usize,
}

impl SchedulerConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.tick_secs == 0 {
            return Err(crate::Error::config("tick_secs must be > 0"));
        }
        if self.run_timeout_secs == 0 {
            return Err(crate::Error::config("run_timeout_secs must be > 0"));
        }
        if self.initial_delay_secs > MAX_INITIAL_DELAY_SECS {
            return Err(crate::Error::config(format!(
                "initial_delay_secs must be at most {}. Got: {}",
                MAX_INITIAL_DELAY_SECS, self.initial_delay_secs
            )));
        }
        if self.run_log_capacity == 0 || self.run_history_capacity == 0 {
            return Err(crate::Error::config(
                "run_log_capacity and run_history_capacity must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            initial_delay_secs: default_initial_delay_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            run_log_capacity: default_run_log_capacity(),
            run_log_retention_hours: default_run_log_retention_hours(),
            run_history_capacity: default_run_history_capacity(),
        }
    }
}

/// Record store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Expiry = detection date + retention
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Used when a strategy could not infer a level
    #[serde(default = "default_threat_level")]
    pub default_threat_level: ThreatLevel,

    #[serde(default = "default_confidence")]
    pub default_confidence: u8,
}

impl StoreConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.retention_days == 0 {
            return Err(crate::Error::config("retention_days must be > 0"));
        }
        if self.default_confidence > 100 {
            return Err(crate::Error::config(format!(
                "default_confidence must be between 0 and 100. Got: {}",
                self.default_confidence
            )));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            default_threat_level: default_threat_level(),
            default_confidence: default_confidence(),
        }
    }
}

fn default_interval_hours() -> u32 {
    24
}

fn default_enabled() -> bool {
    true
}

fn default_login_page() -> String {
    "/login".to_string()
}

fn default_verify_user() -> String {
    "/login/verifyUser".to_string()
}

fn default_login_submit() -> String {
    "/login/loginProc".to_string()
}

fn default_logout() -> String {
    "/logout".to_string()
}

fn default_listing() -> String {
    "/threat/ip/list".to_string()
}

fn default_export() -> String {
    "/threat/ip/excelDownload".to_string()
}

fn default_api_candidates() -> Vec<String> {
    [
        "/api/threat/ip",
        "/api/threat/ip/list",
        "/api/v1/threats",
        "/api/v1/ip/blacklist",
        "/threat/ip/listJson",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_identity_field() -> String {
    "userId".to_string()
}

fn default_secret_field() -> String {
    "userPw".to_string()
}

fn default_authenticated_markers() -> Vec<String> {
    ["logout", "sign out", "signout", "mypage"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_session_ttl_mins() -> u64 {
    60
}

fn default_lookback_days() -> u32 {
    7
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    50
}

fn default_strategy_retries() -> usize {
    1
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_tick_secs() -> u64 {
    60
}

fn default_initial_delay_secs() -> u64 {
    5
}

fn default_run_timeout_secs() -> u64 {
    1800
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_run_log_capacity() -> usize {
    1000
}

fn default_run_log_retention_hours() -> u32 {
    24
}

fn default_run_history_capacity() -> usize {
    100
}

fn default_retention_days() -> u32 {
    90
}

fn default_threat_level() -> ThreatLevel {
    ThreatLevel::Medium
}

fn default_confidence() -> u8 {
    80
}
