// # Record Store Implementations
//
// This module provides implementations of the RecordStore trait for
// different persistence backends.

pub mod memory;
pub mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;
