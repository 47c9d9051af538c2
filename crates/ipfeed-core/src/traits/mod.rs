//! Core traits for the collection pipeline
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`SessionAuthenticator`]: Log in to a portal and hand out a [`Session`]
//! - [`ExtractionStrategy`]: Pull candidate records out of an authenticated session
//! - [`RecordStore`]: Upsert sink for validated records
//! - [`CollectionTask`]: One runnable collection for a source, driven by the scheduler

pub mod authenticator;
pub mod strategy;
pub mod record_store;
pub mod collection_task;

pub use authenticator::{Session, SessionAuthenticator};
pub use strategy::ExtractionStrategy;
pub use record_store::{RecordStore, UpsertSummary};
pub use collection_task::CollectionTask;
