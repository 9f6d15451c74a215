//! Export client abstraction
//!
//! An [`ExportSource`] is a live, authenticated session against one source.
//! The orchestrator gets one per source per run from an [`ExportConnector`],
//! which lets tests swap the HTTP client for scripted fakes.

mod geonature;

pub use geonature::{GeoNatureClient, GeoNatureConnector};

use crate::config::SourceDescriptor;
use crate::error::ExportError;
use crate::types::{Cursor, FetchOutcome};
use async_trait::async_trait;

#[async_trait]
pub trait ExportSource: Send {
    /// Log in. Called once before the first page; `fetch_page` also logs in
    /// on demand if it was not.
    async fn authenticate(&mut self) -> Result<(), ExportError>;

    /// Fetch the page starting at `cursor` (`None` = start of the export).
    ///
    /// Transient failures have already been retried when this returns.
    async fn fetch_page(&mut self, cursor: Option<Cursor>) -> Result<FetchOutcome, ExportError>;
}

pub trait ExportConnector: Send + Sync {
    fn connect(&self, source: &SourceDescriptor) -> Result<Box<dyn ExportSource>, ExportError>;
}
