//! Shared fixtures for gn2gn-sync integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use gn2gn_sync::{
    Credentials, Cursor, ExportConnector, ExportError, ExportPage, ExportSource, FetchOutcome,
    MappingTable, RecordMapper, RetryPolicy, SourceDescriptor, SyncSettings,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// A synthese record the default mapping table accepts
pub fn synthese(id: u64) -> Value {
    json!({
        "id_synthese": id,
        "unique_id_sinp": format!("6f1d2c3e-0000-4000-8000-{id:012}"),
        "cd_nom": 3764,
        "nom_cite": "Parus major",
        "date_debut": "2024-05-01",
        "date_modification": "2024-05-02 08:30:00",
        "observateurs": "Dupont J.",
    })
}

/// Same record without the required `cd_nom`
pub fn broken_synthese(id: u64) -> Value {
    let mut record = synthese(id);
    record.as_object_mut().unwrap().remove("cd_nom");
    record
}

pub fn records(ids: std::ops::RangeInclusive<u64>) -> Vec<Value> {
    ids.map(synthese).collect()
}

pub fn source(name: &str) -> SourceDescriptor {
    SourceDescriptor::new(
        name,
        Url::parse(&format!("http://{name}.invalid/geonature/api")).unwrap(),
        Credentials {
            login: "admin".into(),
            password: "admin".into(),
            id_application: 3,
        },
        1,
    )
}

/// Settings with no sleeping retries and no source deadline
pub fn settings() -> SyncSettings {
    SyncSettings {
        page_size: 2,
        source_timeout: None,
        fetch_retry: RetryPolicy::immediate(1),
        write_retry: RetryPolicy::immediate(1),
        ..SyncSettings::default()
    }
}

pub fn mapper() -> RecordMapper {
    RecordMapper::new(MappingTable::geonature_synthese())
}

/// Scripted export of one source
#[derive(Debug, Default)]
pub struct Script {
    pub records: Vec<Value>,
    pub page_size: usize,
    pub reject_login: bool,
    /// Return the requested cursor as continuation instead of advancing
    pub stuck: bool,
    /// Sleep before answering each fetch
    pub delay: Option<Duration>,
    /// Fail this many fetches with a transient error first
    pub transient_failures: AtomicU32,
    /// Cursor of every fetch_page call, in order
    pub fetches: Mutex<Vec<Option<Cursor>>>,
}

impl Script {
    pub fn new(records: Vec<Value>, page_size: usize) -> Self {
        Self {
            records,
            page_size,
            ..Self::default()
        }
    }

    pub fn fetched(&self) -> Vec<Option<Cursor>> {
        self.fetches.lock().unwrap().clone()
    }
}

#[derive(Debug, Default, Clone)]
pub struct FakeConnector {
    scripts: HashMap<String, Arc<Script>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: &str, script: Script) -> Self {
        self.scripts.insert(source.to_string(), Arc::new(script));
        self
    }

    pub fn script(&self, source: &str) -> Arc<Script> {
        Arc::clone(&self.scripts[source])
    }
}

impl ExportConnector for FakeConnector {
    fn connect(&self, source: &SourceDescriptor) -> Result<Box<dyn ExportSource>, ExportError> {
        let script = self
            .scripts
            .get(&source.name)
            .cloned()
            .ok_or_else(|| ExportError::Protocol(format!("no script for '{}'", source.name)))?;
        Ok(Box::new(FakeSource { script }))
    }
}

struct FakeSource {
    script: Arc<Script>,
}

#[async_trait]
impl ExportSource for FakeSource {
    async fn authenticate(&mut self) -> Result<(), ExportError> {
        if self.script.reject_login {
            return Err(ExportError::Auth("login rejected: HTTP 490".into()));
        }
        Ok(())
    }

    async fn fetch_page(&mut self, cursor: Option<Cursor>) -> Result<FetchOutcome, ExportError> {
        self.script.fetches.lock().unwrap().push(cursor);

        if let Some(delay) = self.script.delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.script.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.script.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ExportError::Transient("HTTP 503".into()));
        }

        let position = cursor.unwrap_or(Cursor::START).position() as usize;
        if self.script.stuck {
            return Ok(FetchOutcome::Page(ExportPage {
                records: self.script.records.clone(),
                next: cursor.unwrap_or(Cursor::START),
                total: None,
            }));
        }
        if position >= self.script.records.len() {
            return Ok(FetchOutcome::EndOfStream);
        }

        let end = (position + self.script.page_size).min(self.script.records.len());
        Ok(FetchOutcome::Page(ExportPage {
            records: self.script.records[position..end].to_vec(),
            next: Cursor::new(end as u64),
            total: Some(self.script.records.len() as u64),
        }))
    }
}
