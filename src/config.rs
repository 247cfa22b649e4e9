//! Configuration types for a harvest run.
//!
//! All run behaviour is controlled through [`HarvestConfig`], built via its
//! [`HarvestConfigBuilder`]. Credentials and the output directory usually come
//! from a `key=value` config file ([`ConfigFile`]); the CLI layers its flags on
//! top before calling [`HarvestConfigBuilder::build`].

use crate::error::HarvestError;
use crate::poll::PollSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default landing page of the archive portal (fund search).
pub const DEFAULT_PORTAL_URL: &str = "https://portal.gaso-smolensk.ru/page/sources/archivefund.jsf";

/// Login for the remote viewer.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    /// Never written out; serialised configs carry the e-mail only.
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Delay schedule between two attempts at the same item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackoffKind {
    /// Always wait `backoff`. (default)
    #[default]
    Fixed,
    /// `backoff * 2^(attempt-1)`, capped at `max_backoff`.
    Exponential,
}

/// Outer retry policy applied per item by the task runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per item before giving up. `None` retries forever. Default: `None`.
    pub max_attempts: Option<u32>,
    /// Base delay between attempts. Default: 5 s.
    pub backoff: Duration,
    /// Fixed or exponential schedule. Default: fixed.
    pub backoff_kind: BackoffKind,
    /// Upper bound for exponential delays. Default: 5 min.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff: Duration::from_secs(5),
            backoff_kind: BackoffKind::Fixed,
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff_kind {
            BackoffKind::Fixed => self.backoff,
            BackoffKind::Exponential => {
                let shift = attempt.saturating_sub(1).min(20);
                self.backoff
                    .saturating_mul(1u32 << shift)
                    .min(self.max_backoff)
            }
        }
    }

    /// `true` when another attempt is allowed after `attempts` have failed.
    pub fn allows_another(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}

/// Configuration for a harvest run.
///
/// Built via [`HarvestConfig::builder()`].
///
/// # Example
/// ```rust
/// use scan_harvest::{Credentials, HarvestConfig};
///
/// let config = HarvestConfig::builder()
///     .output_dir("out")
///     .credentials(Credentials::new("me@example.org", "secret"))
///     .jpeg_quality(80)
///     .build()
///     .unwrap();
/// assert_eq!(config.jpeg_quality, 80);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Base directory holding one working directory per item.
    pub output_dir: PathBuf,

    /// Viewer login.
    pub credentials: Credentials,

    /// Portal landing page opened for every connection.
    pub portal_url: String,

    /// Cadence of the page-change, next-control and image-readiness polls.
    /// Default: 10 ms interval, 5 s ceiling.
    pub poll: PollSettings,

    /// Wait budget for form elements during login, search and viewer open.
    /// Default: 5 s.
    pub element_timeout: Duration,

    /// JPEG quality for re-encoded pages, 1–100. Default: 80.
    pub jpeg_quality: u8,

    /// Outer per-item retry policy.
    pub retry: RetryPolicy,

    /// Run the browser without a window. Default: true.
    pub headless: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("out"),
            credentials: Credentials::default(),
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            poll: PollSettings::default(),
            element_timeout: Duration::from_secs(5),
            jpeg_quality: 80,
            retry: RetryPolicy::default(),
            headless: true,
        }
    }
}

impl HarvestConfig {
    /// Create a new builder for `HarvestConfig`.
    pub fn builder() -> HarvestConfigBuilder {
        HarvestConfigBuilder {
            config: Self::default(),
            output_dir_set: false,
        }
    }

    /// Poll settings for element waits (same interval, element ceiling).
    pub fn element_poll(&self) -> PollSettings {
        PollSettings::new(self.poll.interval, self.element_timeout)
    }
}

/// Builder for [`HarvestConfig`].
#[derive(Debug)]
pub struct HarvestConfigBuilder {
    config: HarvestConfig,
    output_dir_set: bool,
}

impl HarvestConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self.output_dir_set = true;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.config.credentials.email = email.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.credentials.password = password.into();
        self
    }

    pub fn portal_url(mut self, url: impl Into<String>) -> Self {
        self.config.portal_url = url.into();
        self
    }

    pub fn poll(mut self, settings: PollSettings) -> Self {
        self.config.poll = settings;
        self
    }

    pub fn element_timeout(mut self, timeout: Duration) -> Self {
        self.config.element_timeout = timeout;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_attempts(mut self, max: Option<u32>) -> Self {
        self.config.retry.max_attempts = max;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry.backoff = backoff;
        self
    }

    pub fn headless(mut self, v: bool) -> Self {
        self.config.headless = v;
        self
    }

    /// Apply every recognised key of a parsed config file.
    pub fn apply_file(mut self, file: &ConfigFile) -> Result<Self, HarvestError> {
        if let Some(path) = file.get("savepath") {
            self = self.output_dir(path);
        }
        let email = file
            .get("email")
            .unwrap_or(self.config.credentials.email.as_str())
            .to_string();
        let password = file
            .get("password")
            .unwrap_or(self.config.credentials.password.as_str())
            .to_string();
        self.config.credentials = Credentials::new(email, password);
        if let Some(url) = file.get("portal_url") {
            self = self.portal_url(url);
        }
        if let Some(q) = file.get("jpeg_quality") {
            self = self.jpeg_quality(parse_key(q, "jpeg_quality")?);
        }
        if let Some(n) = file.get("max_attempts") {
            let n: u32 = parse_key(n, "max_attempts")?;
            self = self.max_attempts(if n == 0 { None } else { Some(n) });
        }
        if let Some(secs) = file.get("retry_backoff_secs") {
            self = self.retry_backoff(Duration::from_secs(parse_key(secs, "retry_backoff_secs")?));
        }
        Ok(self)
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<HarvestConfig, HarvestError> {
        let c = &self.config;
        let mut missing = Vec::new();
        if c.credentials.email.is_empty() {
            missing.push("email");
        }
        if c.credentials.password.is_empty() {
            missing.push("password");
        }
        if !self.output_dir_set || c.output_dir.as_os_str().is_empty() {
            missing.push("savepath");
        }
        if !missing.is_empty() {
            return Err(HarvestError::InvalidConfig(format!(
                "required settings missing: {}",
                missing.join(", ")
            )));
        }
        if c.poll.interval.is_zero() {
            return Err(HarvestError::InvalidConfig(
                "poll interval must be > 0".into(),
            ));
        }
        if c.retry.max_attempts == Some(0) {
            return Err(HarvestError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

fn parse_key<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, HarvestError> {
    value
        .parse()
        .map_err(|_| HarvestError::InvalidConfig(format!("invalid value for {key}: {value:?}")))
}

// ── Config file ──────────────────────────────────────────────────────────

/// Parsed `key=value` config file.
///
/// Keys are trimmed and lowercased, values trimmed. Lines are split on the
/// first `=` so values may themselves contain `=`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    values: HashMap<String, String>,
}

impl ConfigFile {
    /// Parse config text held in memory.
    pub fn parse(text: &str) -> Self {
        let values = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
            .collect();
        Self { values }
    }

    /// Read and parse a config file.
    ///
    /// # Errors
    /// [`HarvestError::ConfigNotFound`] when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, HarvestError> {
        let text = std::fs::read_to_string(path).map_err(|_| HarvestError::ConfigNotFound {
            path: path.to_path_buf(),
        })?;
        let file = Self::parse(&text);
        debug!("Loaded {} config keys from {}", file.values.len(), path.display());
        Ok(file)
    }

    /// Value for `key` (lowercase), if present and non-empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
