//! Database access for the probe row.
//!
//! The session talks to storage only through [`Connector`] and [`ProbeStore`],
//! so the state machine can be exercised without a live server.

pub mod mysql;

use async_trait::async_trait;

use crate::config::DatabaseConfig;
use crate::error::BackendError;
use crate::record::{FetchedRow, ProbeField, ProbeRecord};

pub use mysql::MySqlConnector;

/// Establishes the single connection a probe uses.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn ProbeStore>, BackendError>;
}

/// One open connection, bound to the configured probe table.
#[async_trait]
pub trait ProbeStore: Send {
    /// Insert `fields` of `record`, returning the storage-assigned id.
    async fn insert(&mut self, record: &ProbeRecord, fields: &[ProbeField]) -> Result<u64, BackendError>;

    /// Select exactly `fields` for row `id`; `None` when no such row exists.
    async fn fetch(&mut self, id: u64, fields: &[ProbeField]) -> Result<Option<FetchedRow>, BackendError>;

    async fn delete(&mut self, id: u64) -> Result<(), BackendError>;

    async fn close(self: Box<Self>) -> Result<(), BackendError>;
}
