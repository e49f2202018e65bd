//! MySQL/MariaDB implementation of the probe store.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow, MySqlSslMode};
use sqlx::{Column, ConnectOptions, Connection, Row};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DatabaseConfig;
use crate::data::{Connector, ProbeStore};
use crate::error::BackendError;
use crate::record::{FetchedRow, ProbeField, ProbeRecord, TIMESTAMP_FORMAT};
use crate::utils::fmt_duration;

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let code = db
                    .try_downcast_ref::<MySqlDatabaseError>()
                    .map(|e| e.number().to_string())
                    .or_else(|| db.code().map(|c| c.into_owned()));
                BackendError::new(db.message(), code)
            }
            sqlx::Error::Io(io) => {
                BackendError::new(io.to_string(), io.raw_os_error().map(|c| c.to_string()))
            }
            other => BackendError::new(other.to_string(), None),
        }
    }
}

/// Opens one dedicated `MySqlConnection` per probe; no pool survives the invocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlConnector;

impl MySqlConnector {
    fn connect_options(config: &DatabaseConfig) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&config.db_host)
            .port(config.db_port)
            .username(&config.db_user)
            .password(&config.db_password)
            .database(&config.db_database)
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        if !config.ssl {
            return options.ssl_mode(MySqlSslMode::Disabled);
        }

        options = options.ssl_mode(if config.ssl_ca.is_some() {
            MySqlSslMode::VerifyCa
        } else {
            MySqlSslMode::Required
        });
        if let Some(ca) = &config.ssl_ca {
            options = options.ssl_ca(ca);
        }
        if let Some(cert) = &config.ssl_cert {
            options = options.ssl_client_cert(cert);
        }
        if let Some(key) = &config.ssl_key {
            options = options.ssl_client_key(key);
        }
        if config.ssl_capath.is_some() || config.ssl_cipher.is_some() {
            warn!("ssl_capath and ssl_cipher are not supported by the MySQL driver, ignoring them");
        }
        options
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn ProbeStore>, BackendError> {
        let options = Self::connect_options(config);
        let timeout = config.connect_timeout();

        let conn = match tokio::time::timeout(timeout, options.connect()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BackendError::new(
                    format!("connection attempt timed out after {}", fmt_duration(timeout)),
                    None,
                ));
            }
        };

        debug!(
            host = %config.db_host,
            port = config.db_port,
            database = %config.db_database,
            tls = config.ssl,
            "database connection established"
        );

        Ok(Box::new(MySqlProbeStore::new(conn, config.db_table.clone())))
    }
}

pub struct MySqlProbeStore {
    conn: MySqlConnection,
    table: String,
}

impl MySqlProbeStore {
    /// Wrap an already established connection, e.g. one detached from a pool.
    pub fn new(conn: MySqlConnection, table: impl Into<String>) -> Self {
        Self {
            conn,
            table: table.into(),
        }
    }
}

fn column_list(fields: &[ProbeField]) -> String {
    fields.iter().map(|f| f.column()).collect::<Vec<_>>().join(", ")
}

#[async_trait]
impl ProbeStore for MySqlProbeStore {
    async fn insert(&mut self, record: &ProbeRecord, fields: &[ProbeField]) -> Result<u64, BackendError> {
        let placeholders = vec!["?"; fields.len()].join(", ");
        let sql = format!(
            "INSERT INTO `{}` ({}) VALUES ({placeholders})",
            self.table,
            column_list(fields)
        );

        let mut query = sqlx::query(&sql);
        for &field in fields {
            query = query.bind(record.value(field));
        }
        let result = query.execute(&mut self.conn).await?;

        debug!(table = %self.table, id = result.last_insert_id(), "probe row inserted");
        Ok(result.last_insert_id())
    }

    async fn fetch(&mut self, id: u64, fields: &[ProbeField]) -> Result<Option<FetchedRow>, BackendError> {
        let sql = format!(
            "SELECT {} FROM `{}` WHERE id = ?",
            column_list(fields),
            self.table
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut self.conn)
            .await?;

        Ok(row.map(|row| decode_row(&row)).transpose()?)
    }

    async fn delete(&mut self, id: u64) -> Result<(), BackendError> {
        sqlx::query(&format!("DELETE FROM `{}` WHERE id = ?", self.table))
            .bind(id)
            .execute(&mut self.conn)
            .await?;
        debug!(table = %self.table, id, "probe row deleted");
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BackendError> {
        let store = *self;
        store.conn.close().await?;
        Ok(())
    }
}

/// Render every selected column as text, the way it would be compared against the record.
fn decode_row(row: &MySqlRow) -> Result<FetchedRow, sqlx::Error> {
    row.columns()
        .iter()
        .map(|column| Ok((column.name().to_owned(), decode_text(row, column.ordinal())?)))
        .collect()
}

/// Text columns decode directly; DATETIME is rendered in the probe's timestamp format.
fn decode_text(row: &MySqlRow, index: usize) -> Result<Option<String>, sqlx::Error> {
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<Option<NaiveDateTime>, _>(index) {
        return Ok(value.map(|dt| dt.format(TIMESTAMP_FORMAT).to_string()));
    }
    let bytes: Option<Vec<u8>> = row.try_get(index)?;
    Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
}
