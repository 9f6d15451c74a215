//! Engine configuration values
//!
//! Everything here is immutable once a run starts. The CLI builds these
//! from its TOML file; tests build them directly.

use crate::retry::RetryPolicy;
use chrono::{FixedOffset, Offset, Utc};
use gn2gn_common::{Gn2GnError, Result};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Default number of records requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Upper bound on page size accepted by validation
pub const MAX_PAGE_SIZE: u32 = 10_000;

pub const DEFAULT_CONCURRENCY: usize = 1;

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 3600;

/// Largest response body accepted from an export endpoint (64 MiB)
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// GeoNature application id used at login when none is configured
pub const DEFAULT_ID_APPLICATION: i32 = 3;

pub const DEFAULT_SCHEMA: &str = "gn2gn_import";

/// Width of the `source` columns in the destination tables
pub const MAX_SOURCE_NAME_LEN: usize = 100;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
    pub id_application: i32,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .field("id_application", &self.id_application)
            .finish()
    }
}

/// One configured remote GeoNature instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Unique key; also keys the watermark and destination rows
    pub name: String,
    /// GeoNature API root, e.g. `https://demo.geonature.fr/geonature/api`
    pub api_url: Url,
    pub credentials: Credentials,
    pub export_id: u32,
    /// Extra query parameters appended to every export request
    pub query_strings: BTreeMap<String, String>,
    pub enabled: bool,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>, api_url: Url, credentials: Credentials, export_id: u32) -> Self {
        Self {
            name: name.into(),
            api_url,
            credentials,
            export_id,
            query_strings: BTreeMap::new(),
            enabled: true,
        }
    }
}

/// Where a source starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// From the start of the export; stored watermarks still never regress
    Full,
    /// From the stored watermark, or the start when there is none
    #[default]
    Incremental,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::Incremental => "incremental",
        }
    }
}

/// Tuning for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub mode: RunMode,
    pub page_size: u32,
    /// Sources synced at the same time; report order is unaffected
    pub concurrency: usize,
    /// Wall-clock budget per source; `None` disables it
    pub source_timeout: Option<Duration>,
    pub http_timeout: Duration,
    pub max_response_bytes: usize,
    pub fetch_retry: RetryPolicy,
    pub write_retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            source_timeout: Some(Duration::from_secs(DEFAULT_SOURCE_TIMEOUT_SECS)),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            fetch_retry: RetryPolicy::default(),
            write_retry: RetryPolicy::default(),
        }
    }
}

pub(crate) fn utc_offset() -> FixedOffset {
    Utc.fix()
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Gn2GnError::config(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        if self.concurrency == 0 {
            return Err(Gn2GnError::config("concurrency must be at least 1"));
        }
        if self.fetch_retry.max_attempts == 0 || self.write_retry.max_attempts == 0 {
            return Err(Gn2GnError::config("retry attempts must be at least 1"));
        }
        if self.max_response_bytes == 0 {
            return Err(Gn2GnError::config("max response size must be positive"));
        }
        if self.source_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Gn2GnError::config("source timeout must be positive"));
        }
        Ok(())
    }
}

/// Reject empty, overlong or duplicate names and non-HTTP URLs
pub fn validate_sources(sources: &[SourceDescriptor]) -> Result<()> {
    if sources.is_empty() {
        return Err(Gn2GnError::config("at least one source must be configured"));
    }

    let mut seen = HashSet::new();
    for source in sources {
        if source.name.trim().is_empty() {
            return Err(Gn2GnError::config("source name must not be empty"));
        }
        if source.name.chars().count() > MAX_SOURCE_NAME_LEN {
            return Err(Gn2GnError::config(format!(
                "source name '{}' is longer than {MAX_SOURCE_NAME_LEN} characters",
                source.name
            )));
        }
        if !seen.insert(source.name.as_str()) {
            return Err(Gn2GnError::config(format!("duplicate source name '{}'", source.name)));
        }
        if !matches!(source.api_url.scheme(), "http" | "https") {
            return Err(Gn2GnError::config(format!(
                "source '{}': API URL must be http(s), got '{}'",
                source.name, source.api_url
            )));
        }
        if source.credentials.login.is_empty() {
            return Err(Gn2GnError::config(format!("source '{}': empty user name", source.name)));
        }
    }
    Ok(())
}

/// Check that `name` can be spliced into SQL as an unquoted identifier
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(Gn2GnError::config(format!(
            "'{name}' is not a valid schema name (lowercase letters, digits, underscore; max 63)"
        )))
    }
}

/// Parse `+HH:MM`, `-HH:MM` or `Z`
pub fn parse_offset(value: &str) -> Result<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return Ok(utc_offset());
    }

    let invalid = || Gn2GnError::config(format!("invalid UTC offset '{value}', expected ±HH:MM"));
    let (sign, rest) = match value.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
