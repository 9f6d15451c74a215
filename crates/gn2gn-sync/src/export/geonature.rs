//! GeoNature export API client
//!
//! Session flow: `POST {api}/auth/login` sets a `token` cookie, which the
//! client's cookie store replays on `GET {api}/exports/api/{export_id}`.
//!
//! Export pages are addressed by page index (`offset`) and size (`limit`).
//! The client's cursor is a record position, so a position that is not a
//! multiple of the page size re-requests the containing page and drops the
//! records already consumed.

use super::{ExportConnector, ExportSource};
use crate::config::{Credentials, SourceDescriptor, SyncSettings};
use crate::error::ExportError;
use crate::retry::RetryPolicy;
use crate::types::{Cursor, ExportPage, FetchOutcome, RawRecord};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("gn2gn/", env!("CARGO_PKG_VERSION"));

/// Query parameters owned by the pager
const RESERVED_PARAMS: [&str; 2] = ["limit", "offset"];

#[derive(Debug, Deserialize)]
struct ExportResponse {
    items: ExportItems,
    total: Option<u64>,
    total_filtered: Option<u64>,
    limit: Option<u64>,
}

/// `items` is either a plain list or a GeoJSON FeatureCollection
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExportItems {
    Records(Vec<Value>),
    Features { features: Vec<Value> },
}

impl ExportItems {
    fn into_records(self) -> Vec<Value> {
        match self {
            ExportItems::Records(records) => records,
            ExportItems::Features { features } => features,
        }
    }
}

/// Lift GeoJSON `properties` to the top level, keeping `geometry`.
///
/// Anything that is not a Feature is returned untouched; the mapper decides
/// what to do with non-object items.
fn flatten_record(record: Value) -> RawRecord {
    let Value::Object(mut object) = record else {
        return record;
    };

    let is_feature = object.get("type").and_then(Value::as_str) == Some("Feature")
        && matches!(object.get("properties"), Some(Value::Object(_)));
    if !is_feature {
        return Value::Object(object);
    }

    let geometry = object.remove("geometry").filter(|g| !g.is_null());
    let Some(Value::Object(mut properties)) = object.remove("properties") else {
        return Value::Object(object);
    };
    if let Some(geometry) = geometry {
        properties.entry("geometry").or_insert(geometry);
    }
    Value::Object(properties)
}

async fn read_bounded(response: Response, limit: usize) -> Result<Vec<u8>, ExportError> {
    let too_large =
        || ExportError::Protocol(format!("response body exceeds {limit} bytes"));

    if response
        .content_length()
        .is_some_and(|len| len > limit as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Authenticated session against one GeoNature instance
pub struct GeoNatureClient {
    http: Client,
    source: String,
    base_url: String,
    credentials: Credentials,
    export_id: u32,
    query_strings: BTreeMap<String, String>,
    page_size: u32,
    max_response_bytes: usize,
    retry: RetryPolicy,
    authenticated: bool,
    /// Position past which the source reported no more records
    exhausted_at: Option<Cursor>,
}

impl GeoNatureClient {
    pub fn new(source: &SourceDescriptor, settings: &SyncSettings) -> Result<Self, ExportError> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(settings.http_timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let mut query_strings = source.query_strings.clone();
        for reserved in RESERVED_PARAMS {
            if query_strings.remove(reserved).is_some() {
                warn!(
                    source = %source.name,
                    param = reserved,
                    "Ignoring query string managed by the pager"
                );
            }
        }

        Ok(Self {
            http,
            source: source.name.clone(),
            base_url: source.api_url.as_str().trim_end_matches('/').to_string(),
            credentials: source.credentials.clone(),
            export_id: source.export_id,
            query_strings,
            page_size: settings.page_size,
            max_response_bytes: settings.max_response_bytes,
            retry: settings.fetch_retry.clone(),
            authenticated: false,
            exhausted_at: None,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn login(&self) -> Result<(), ExportError> {
        let body = json!({
            "login": self.credentials.login,
            "password": self.credentials.password,
            "id_application": self.credentials.id_application,
        });

        let response = self
            .http
            .post(self.endpoint("auth/login"))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExportError::Transient(format!("login: HTTP {status}")));
        }
        // GeoNature answers 490 on bad credentials, 401/403 elsewhere
        Err(ExportError::Auth(format!(
            "login rejected for user '{}': HTTP {status}",
            self.credentials.login
        )))
    }

    async fn request_page(&self, page: u64) -> Result<ExportResponse, ExportError> {
        let url = self.endpoint(&format!("exports/api/{}", self.export_id));
        let response = self
            .http
            .get(&url)
            .query(&[("limit", u64::from(self.page_size)), ("offset", page)])
            .query(&self.query_strings)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::from_status(
                status,
                &format!("export {} page {page}", self.export_id),
            ));
        }

        let body = read_bounded(response, self.max_response_bytes).await?;
        serde_json::from_slice(&body)
            .map_err(|e| ExportError::Protocol(format!("malformed export response: {e}")))
    }
}

#[async_trait]
impl ExportSource for GeoNatureClient {
    async fn authenticate(&mut self) -> Result<(), ExportError> {
        let this = &*self;
        this.retry.run("login", |_| this.login()).await?;
        self.authenticated = true;
        info!(source = %self.source, user = %self.credentials.login, "Authenticated");
        Ok(())
    }

    async fn fetch_page(&mut self, cursor: Option<Cursor>) -> Result<FetchOutcome, ExportError> {
        if !self.authenticated {
            self.authenticate().await?;
        }

        let position = cursor.unwrap_or(Cursor::START).position();
        if self.exhausted_at.is_some_and(|end| position >= end.position()) {
            debug!(source = %self.source, position, "Export already exhausted");
            return Ok(FetchOutcome::EndOfStream);
        }

        let page_size = u64::from(self.page_size);
        let page = position / page_size;
        let already_consumed = (position % page_size) as usize;

        let this = &*self;
        let response = this
            .retry
            .run("fetch_page", |_| this.request_page(page))
            .await?;

        if let Some(limit) = response.limit.filter(|l| *l != page_size) {
            return Err(ExportError::Protocol(format!(
                "server paged with limit {limit} instead of {page_size}"
            )));
        }

        let records: Vec<RawRecord> = response
            .items
            .into_records()
            .into_iter()
            .skip(already_consumed)
            .map(flatten_record)
            .collect();

        if records.is_empty() {
            debug!(source = %self.source, position, "Empty page, end of export");
            return Ok(FetchOutcome::EndOfStream);
        }

        let next = Cursor::new(position + records.len() as u64);
        let total = response.total_filtered.or(response.total);
        if total.is_some_and(|t| next.position() >= t) {
            self.exhausted_at = Some(next);
        }

        debug!(
            source = %self.source,
            page,
            records = records.len(),
            next = %next,
            total = ?total,
            "Fetched export page"
        );

        Ok(FetchOutcome::Page(ExportPage {
            records,
            next,
            total,
        }))
    }
}

/// Builds a [`GeoNatureClient`] per source from shared run settings
#[derive(Debug, Clone)]
pub struct GeoNatureConnector {
    settings: SyncSettings,
}

impl GeoNatureConnector {
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }
}

impl ExportConnector for GeoNatureConnector {
    fn connect(&self, source: &SourceDescriptor) -> Result<Box<dyn ExportSource>, ExportError> {
        Ok(Box::new(GeoNatureClient::new(source, &self.settings)?))
    }
}
