// # ipfeed-core
//
// Core library for the threat-intel IP collection pipeline.
//
// ## Architecture Overview
//
// - **SessionAuthenticator**: Trait for logging into a source portal
// - **ExtractionStrategy**: Trait for one way of pulling candidate addresses
// - **ExtractionRunner**: Runs strategies in priority order with fallback
// - **validator**: IPv4 syntax and reserved-range checks
// - **RecordStore**: Trait for the deduplicating, soft-deleting record store
// - **SourceCollector**: Authenticate, extract, log out, store
// - **CollectionScheduler**: Per-source intervals, triggers, run log
//
// ## Design Principles
//
// 1. **Core stays portal-agnostic**: HTTP portals live in `ipfeed-portal`
// 2. **One run per source**: The scheduler never overlaps runs of a source
// 3. **Idempotent storage**: Re-collecting an address updates, never duplicates
// 4. **Library-First**: The daemon is a thin wrapper around this crate

pub mod collector;
pub mod config;
pub mod error;
pub mod model;
pub mod run_log;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod traits;
pub mod validator;

pub use collector::SourceCollector;
pub use config::{
    CollectorConfig, Credential, ExtractionConfig, ExtractionMode, PortalEndpoints,
    SchedulerConfig, SourceConfig, StoreConfig,
};
pub use error::{Error, Result};
pub use model::{
    CollectionOutcome, CollectionRun, DateRange, RawContext, RawRecord, StrategyKind,
    ThreatLevel, ValidatedIpRecord,
};
pub use run_log::{RunAction, RunLog, RunLogEntry};
pub use runner::{ExtractionReport, ExtractionRunner, RecordDefaults};
pub use scheduler::{CollectionScheduler, ScheduleEntry, ScheduleState};
pub use store::{MemoryRecordStore, PgRecordStore};
pub use traits::{CollectionTask, ExtractionStrategy, RecordStore, Session, SessionAuthenticator};
