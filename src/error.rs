//! Error types for a probe invocation.
//!
//! Every variant is terminal: the session reports it once and then cleans up.

use std::fmt;

use crate::record::IntegrityError;
use crate::validate::ValidationError;

/// A failure reported by the database backend, carrying its native error code when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub message: String,
    pub code: Option<String>,
}

impl BackendError {
    pub fn new(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for BackendError {}

/// Which statement of the probe a [`ProbeError::Query`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Write,
    Read,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStage::Write => f.write_str("writing the probe row"),
            QueryStage::Read => f.write_str("reading back the probe row"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid command line: {0}")]
    Arguments(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("could not connect to database ({host}): {source}")]
    Connection {
        host: String,
        #[source]
        source: BackendError,
    },
    #[error("query failed while {stage}: {source}")]
    Query {
        stage: QueryStage,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error("unable to open a connection to syslog: {0}")]
    Logging(String),
    #[error("unexpected fault: {0}")]
    UnexpectedFault(String),
}
