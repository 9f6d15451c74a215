//! GN2GN transfer engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls records from the export API of one or more GeoNature instances and
//! upserts them into a PostgreSQL schema, one source at a time.
//!
//! # Architecture
//!
//! ```text
//! SyncOrchestrator ──► ExportSource (GeoNatureClient)   fetch_page(cursor)
//!        │         ──► RecordMapper                     map(source, raw)
//!        │         ──► Destination (PgDestination)      write_batch(batch)
//!        ▼
//!    RunReport
//! ```
//!
//! Each source walks `PENDING → FETCHING → MAPPING → WRITING → ADVANCING`
//! per page until the export is exhausted (`DONE`) or a source-fatal error
//! occurs (`FAILED`). A failed source never stops the others.
//!
//! # Example
//!
//! ```no_run
//! use gn2gn_sync::{
//!     GeoNatureConnector, MappingTable, MemoryDestination, RecordMapper, SyncOrchestrator,
//!     SyncSettings,
//! };
//!
//! # async fn run(sources: Vec<gn2gn_sync::SourceDescriptor>) -> Result<(), Box<dyn std::error::Error>> {
//! let settings = SyncSettings::default();
//! let connector = GeoNatureConnector::new(&settings);
//! let mapper = RecordMapper::new(MappingTable::geonature_synthese());
//! let orchestrator =
//!     SyncOrchestrator::new(sources, settings, mapper, connector, MemoryDestination::new());
//!
//! let report = orchestrator.run_once().await;
//! assert!(!report.has_failures());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod destination;
pub mod error;
pub mod export;
pub mod mapper;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod types;

pub use config::{Credentials, RunMode, SourceDescriptor, SyncSettings};
pub use destination::{Batch, Committed, Destination, MemoryDestination, PgDestination};
pub use error::{ExportError, FailureKind, MappingError, SyncError, WriteError};
pub use export::{ExportConnector, ExportSource, GeoNatureClient, GeoNatureConnector};
pub use mapper::{FieldKind, FieldRule, MappingTable, RecordMapper};
pub use orchestrator::SyncOrchestrator;
pub use report::{RunReport, SourceFailure, SourceReport};
pub use retry::{RetryPolicy, Retryable};
pub use types::{
    Cursor, ExportPage, FetchOutcome, MappedRow, RawRecord, SkippedRecord, SourceState, Watermark,
};
