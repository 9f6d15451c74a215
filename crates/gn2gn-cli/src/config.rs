//! Configuration file loading
//!
//! One TOML file describes the destination database, run tuning, every
//! source and optionally the field mapping. See [`SAMPLE_CONFIG`] for the
//! layout.

use chrono::FixedOffset;
use gn2gn_common::{Gn2GnError, Result};
use gn2gn_sync::config::{
    parse_offset, validate_identifier, validate_sources, DEFAULT_CONCURRENCY,
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_ID_APPLICATION, DEFAULT_MAX_RESPONSE_BYTES,
    DEFAULT_PAGE_SIZE, DEFAULT_SCHEMA, DEFAULT_SOURCE_TIMEOUT_SECS,
};
use gn2gn_sync::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
use gn2gn_sync::{
    Credentials, MappingTable, RecordMapper, RetryPolicy, RunMode, SourceDescriptor, SyncSettings,
};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

// ============================================================================
// Environment Overrides
// ============================================================================

/// Replaces `db.db_password`
pub const PASSWORD_ENV: &str = "GN2GN_DB_PASSWORD";

/// Replaces the whole `[db]` connection (schema name still comes from the file)
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

pub const DEFAULT_DB_PORT: u16 = 5432;

/// Written by `gn2gn init`
pub const SAMPLE_CONFIG: &str = r#"# gn2gn configuration

[db]
db_host = "localhost"
db_port = 5432
db_user = "gn2gn"
# or set GN2GN_DB_PASSWORD
db_password = "change-me"
db_name = "geonature"
db_schema_import = "gn2gn_import"
    [db.db_querystring]
    sslmode = "prefer"

# Optional, defaults shown
[tuning]
max_page_length = 1000
max_retry = 5
retry_delay_ms = 500
max_retry_delay_ms = 30000
# 0 disables the per-source time budget
source_timeout_secs = 3600
concurrency = 1
http_timeout_secs = 120
# offset applied to export timestamps that carry none
naive_offset = "+00:00"

[[source]]
name = "Source1"
user_name = "login"
user_password = "password"
export_module_api_url = "https://geonature.example.org/api"
export_id = 1
id_application = 3
enable = true
    [source.query_strings]
    orderby = "id_synthese"

# Optional, defaults to the GeoNature synthese export
# [mapping]
# natural_key = "id_synthese"
# uuid = "unique_id_sinp"
# updated_at = "date_modification"
#     [[mapping.field]]
#     source = "cd_nom"
#     kind = "integer"
#     required = true
"#;

// ============================================================================
// File Layout
// ============================================================================

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db: DbConfig,
    #[serde(default)]
    tuning: Tuning,
    #[serde(default, rename = "source")]
    sources: Vec<SourceEntry>,
    #[serde(default)]
    mapping: Option<MappingTable>,
}

/// `[db]` section
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbConfig {
    #[serde(default = "default_db_host")]
    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    pub db_user: String,
    #[serde(default)]
    pub db_password: String,
    pub db_name: String,
    #[serde(default = "default_schema")]
    pub db_schema_import: String,
    /// Connection parameters: `sslmode`, `sslrootcert`, `application_name`
    #[serde(default)]
    pub db_querystring: BTreeMap<String, String>,
    /// Set from `DATABASE_URL`
    #[serde(skip)]
    pub url: Option<String>,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_user", &self.db_user)
            .field("db_password", &"***")
            .field("db_name", &self.db_name)
            .field("db_schema_import", &self.db_schema_import)
            .field("db_querystring", &self.db_querystring)
            .field("url", &self.url.as_ref().map(|_| "***"))
            .finish()
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    DEFAULT_DB_PORT
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

impl DbConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url)
                .map_err(|e| Gn2GnError::config(format!("invalid {DATABASE_URL_ENV}: {e}")));
        }

        let mut options = PgConnectOptions::new()
            .host(&self.db_host)
            .port(self.db_port)
            .username(&self.db_user)
            .database(&self.db_name)
            .application_name("gn2gn");
        if !self.db_password.is_empty() {
            options = options.password(&self.db_password);
        }

        for (key, value) in &self.db_querystring {
            options = match key.as_str() {
                "sslmode" => {
                    let mode = PgSslMode::from_str(value).map_err(|e| {
                        Gn2GnError::config(format!("db_querystring.sslmode '{value}': {e}"))
                    })?;
                    options.ssl_mode(mode)
                },
                "sslrootcert" => options.ssl_root_cert(value.as_str()),
                "application_name" => options.application_name(value),
                other => {
                    return Err(Gn2GnError::config(format!(
                        "unsupported db_querystring parameter '{other}'"
                    )))
                },
            };
        }
        Ok(options)
    }
}

/// `[tuning]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tuning {
    pub max_page_length: u32,
    pub max_retry: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// 0 disables the budget
    pub source_timeout_secs: u64,
    pub concurrency: usize,
    pub http_timeout_secs: u64,
    pub naive_offset: String,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            max_page_length: DEFAULT_PAGE_SIZE,
            max_retry: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
            max_retry_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
            source_timeout_secs: DEFAULT_SOURCE_TIMEOUT_SECS,
            concurrency: DEFAULT_CONCURRENCY,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            naive_offset: "+00:00".to_string(),
        }
    }
}

impl Tuning {
    fn settings(&self) -> SyncSettings {
        let retry = RetryPolicy::new(
            self.max_retry,
            Duration::from_millis(self.retry_delay_ms),
            Duration::from_millis(self.max_retry_delay_ms),
        );

        SyncSettings {
            mode: RunMode::default(),
            page_size: self.max_page_length,
            concurrency: self.concurrency,
            source_timeout: (self.source_timeout_secs > 0)
                .then(|| Duration::from_secs(self.source_timeout_secs)),
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            fetch_retry: retry.clone(),
            write_retry: retry,
        }
    }
}

/// One `[[source]]` entry
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceEntry {
    name: String,
    user_name: String,
    user_password: String,
    export_module_api_url: String,
    #[serde(default = "default_export_id")]
    export_id: u32,
    #[serde(default = "default_id_application")]
    id_application: i32,
    #[serde(default = "default_enable")]
    enable: bool,
    #[serde(default)]
    query_strings: BTreeMap<String, toml::Value>,
}

fn default_export_id() -> u32 {
    1
}

fn default_id_application() -> i32 {
    DEFAULT_ID_APPLICATION
}

fn default_enable() -> bool {
    true
}

impl SourceEntry {
    fn into_descriptor(self) -> Result<SourceDescriptor> {
        let api_url = Url::parse(self.export_module_api_url.trim()).map_err(|e| {
            Gn2GnError::config(format!(
                "source '{}': invalid export_module_api_url '{}': {e}",
                self.name, self.export_module_api_url
            ))
        })?;

        let credentials = Credentials {
            login: self.user_name,
            password: self.user_password,
            id_application: self.id_application,
        };

        let mut source = SourceDescriptor::new(self.name, api_url, credentials, self.export_id);
        source.enabled = self.enable;
        source.query_strings = self
            .query_strings
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    toml::Value::String(text) => text,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect();
        Ok(source)
    }
}

// ============================================================================
// Validated Configuration
// ============================================================================

/// Everything a run needs, validated
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub destination: DbConfig,
    pub sources: Vec<SourceDescriptor>,
    pub tuning: SyncSettings,
    pub naive_offset: FixedOffset,
    pub mapping: MappingTable,
}

impl SyncConfig {
    /// Read `path`, validate it and apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Gn2GnError::config(format!("cannot read {}: {e}", path.display()))
        })?;

        let mut config = Self::parse(&text).map_err(|e| match e {
            Gn2GnError::Parse(msg) => Gn2GnError::Parse(format!("{}: {msg}", path.display())),
            other => other,
        })?;
        config.apply_env_overrides();

        debug!(
            path = %path.display(),
            sources = config.sources.len(),
            schema = %config.destination.db_schema_import,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate TOML text; no environment lookups
    pub fn parse(text: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(text).map_err(|e| Gn2GnError::Parse(e.to_string()))?;

        let sources = file
            .sources
            .into_iter()
            .map(SourceEntry::into_descriptor)
            .collect::<Result<Vec<_>>>()?;
        validate_sources(&sources)?;
        validate_identifier(&file.db.db_schema_import)?;

        let tuning = file.tuning.settings();
        tuning.validate()?;
        let naive_offset = parse_offset(&file.tuning.naive_offset)?;

        let mapping = file.mapping.unwrap_or_else(MappingTable::geonature_synthese);
        mapping.validate()?;

        Ok(Self {
            destination: file.db,
            sources,
            tuning,
            naive_offset,
            mapping,
        })
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            self.destination.db_password = password;
        }
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                self.destination.url = Some(url);
            }
        }
    }

    /// Keep only the named sources. A named source runs even when its
    /// `enable` flag is off.
    pub fn select_sources(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }

        if let Some(unknown) = names
            .iter()
            .find(|name| !self.sources.iter().any(|s| &s.name == *name))
        {
            return Err(Gn2GnError::config(format!("unknown source '{unknown}'")));
        }

        self.sources.retain(|s| names.contains(&s.name));
        for source in &mut self.sources {
            source.enabled = true;
        }
        Ok(())
    }

    pub fn mapper(&self) -> RecordMapper {
        RecordMapper::new(self.mapping.clone()).with_naive_offset(self.naive_offset)
    }
}
