//! Probe session: one write, one read-back verification, one cleanup.
//!
//! # Data Flow
//! ```text
//! open syslog → validate request → open → write → read_and_verify
//!     → Responder (200 or 500, syslog line on failure)
//!     → cleanup (delete row, close connection, close syslog)
//! ```
//!
//! Any step's error short-circuits to the failure report. Panics are caught at
//! the same boundary and reported as [`ProbeError::UnexpectedFault`].

pub mod fault;
pub mod guard;
pub mod state;

use futures::FutureExt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::data::{Connector, MySqlConnector, ProbeStore};
use crate::error::{ProbeError, QueryStage};
use crate::record::{IntegrityError, ProbeField, ProbeRecord, capture_timestamp};
use crate::request::RequestContext;
use crate::response::Responder;
use crate::system_log::{SyslogOpener, SyslogSink, UnixSyslog};
use crate::utils::{fmt_duration, log_step_duration};
use crate::validate;

pub use fault::{Fault, FaultInterceptor};
pub use guard::ProcessGuard;
pub use state::{SessionState, StateGate};

/// Final outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    Unhealthy(String),
}

impl Verdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Verdict::Healthy)
    }
}

/// External collaborators a session talks to.
pub struct Backends {
    pub connector: Box<dyn Connector>,
    pub syslog: Box<dyn SyslogOpener>,
}

impl Backends {
    /// MySQL over the network and the local syslog daemon.
    pub fn system() -> Self {
        Self {
            connector: Box::new(MySqlConnector),
            syslog: Box::new(UnixSyslog),
        }
    }
}

pub struct Session {
    config: Arc<Config>,
    request: RequestContext,
    record: ProbeRecord,
    fields: Vec<ProbeField>,
    gate: Arc<StateGate>,
    interceptor: FaultInterceptor,
    backends: Backends,
    store: Option<Box<dyn ProbeStore>>,
    syslog: Option<Box<dyn SyslogSink>>,
    responder: Responder,
}

impl Session {
    /// Capture hostname and timestamp, and register the fault interceptor for this thread.
    pub fn new(config: Arc<Config>, request: RequestContext, backends: Backends, responder: Responder) -> Self {
        Self::with_gate(config, request, backends, responder, StateGate::new())
    }

    /// Like [`Session::new`], sharing `gate` with an enclosing [`ProcessGuard`] so the
    /// process as a whole answers at most once.
    pub fn with_gate(
        config: Arc<Config>,
        request: RequestContext,
        backends: Backends,
        responder: Responder,
        gate: Arc<StateGate>,
    ) -> Self {
        let record = ProbeRecord::capture(resolve_hostname(&config), capture_timestamp(config.timezone));
        let fields = config.schema().fields();
        let interceptor = FaultInterceptor::register(gate.clone());

        debug!(
            hostname = %record.hostname,
            timestamp = %record.timestamp,
            fields = ?fields,
            "probe session created"
        );

        Self {
            config,
            request,
            record,
            fields,
            gate,
            interceptor,
            backends,
            store: None,
            syslog: None,
            responder,
        }
    }

    pub fn state(&self) -> SessionState {
        self.gate.current()
    }

    pub fn record(&self) -> &ProbeRecord {
        &self.record
    }

    /// Faults dropped because they happened while the outcome was already being reported.
    pub fn suppressed_faults(&self) -> usize {
        self.interceptor.suppressed()
    }

    /// Run the whole probe, report the outcome exactly once, and clean up.
    pub async fn run(&mut self) -> Verdict {
        let started = Instant::now();

        let result = match AssertUnwindSafe(self.check()).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(ProbeError::UnexpectedFault(
                self.interceptor.take_fault(payload).to_string(),
            )),
        };
        let verdict = match result {
            Ok(()) => Verdict::Healthy,
            Err(e) => Verdict::Unhealthy(e.to_string()),
        };

        self.conclude(&verdict).await;

        info!(
            healthy = verdict.is_healthy(),
            duration = fmt_duration(started.elapsed()),
            "probe finished"
        );
        verdict
    }

    async fn check(&mut self) -> Result<(), ProbeError> {
        if self.gate.current() != SessionState::Idle {
            return Err(ProbeError::UnexpectedFault("probe session already ran".to_owned()));
        }

        self.open_syslog()?;
        self.validate_request()?;
        self.open().await?;
        self.write().await?;
        self.read_and_verify().await
    }

    fn open_syslog(&mut self) -> Result<(), ProbeError> {
        let sink = self
            .backends
            .syslog
            .open(&self.config.syslog)
            .map_err(ProbeError::Logging)?;
        self.syslog = Some(sink);
        Ok(())
    }

    /// Optional columns present in the schema are always validated, defaults included.
    fn validate_request(&mut self) -> Result<(), ProbeError> {
        if self.fields.contains(&ProbeField::SourceAddress) {
            let address = validate::source_address(self.request.remote_addr.as_deref())?;
            self.record.source_address = Some(address);
        }
        if self.fields.contains(&ProbeField::ApplicationName) {
            let name = validate::application_name(self.request.application.as_deref())?;
            self.record.application_name = Some(name);
        }
        Ok(())
    }

    /// Establish the connection held for the rest of the session.
    pub async fn open(&mut self) -> Result<(), ProbeError> {
        let start = Instant::now();
        let database = &self.config.database;
        let store = self
            .backends
            .connector
            .connect(database)
            .await
            .map_err(|source| ProbeError::Connection {
                host: database.db_host.clone(),
                source,
            })?;
        log_step_duration(start, "connect");

        self.store = Some(store);
        self.gate.advance(SessionState::Connected);
        Ok(())
    }

    /// Insert the probe row and remember its id for read-back and cleanup.
    pub async fn write(&mut self) -> Result<(), ProbeError> {
        let start = Instant::now();
        let store = self.store.as_mut().ok_or_else(not_connected)?;
        let id = store
            .insert(&self.record, &self.fields)
            .await
            .map_err(|source| ProbeError::Query {
                stage: QueryStage::Write,
                source,
            })?;
        log_step_duration(start, "write");

        self.record.insert_id = Some(id);
        self.gate.advance(SessionState::Written);
        Ok(())
    }

    /// Select the row back and compare it field by field with what was written.
    pub async fn read_and_verify(&mut self) -> Result<(), ProbeError> {
        let start = Instant::now();
        let id = self
            .record
            .insert_id
            .ok_or_else(|| ProbeError::UnexpectedFault("read-back attempted before write".to_owned()))?;
        let store = self.store.as_mut().ok_or_else(not_connected)?;
        let row = store
            .fetch(id, &self.fields)
            .await
            .map_err(|source| ProbeError::Query {
                stage: QueryStage::Read,
                source,
            })?
            .ok_or(IntegrityError::RowNotFound(id))?;
        log_step_duration(start, "read");

        self.record.verify(&row, &self.fields)?;
        self.gate.advance(SessionState::Verified);
        Ok(())
    }

    /// Report the verdict once, then clean up. Faults in either step are contained here.
    async fn conclude(&mut self, verdict: &Verdict) {
        if self.gate.begin_report() {
            let responder = &mut self.responder;
            let syslog = &mut self.syslog;
            let reported = catch_unwind(AssertUnwindSafe(|| match verdict {
                Verdict::Healthy => responder.report_success(),
                Verdict::Unhealthy(message) => responder.report_failure(syslog.as_mut(), message),
            }));
            if reported.is_err() {
                warn!("fault while reporting the probe outcome");
            }
            self.gate.advance(SessionState::Reported {
                healthy: verdict.is_healthy(),
            });
        }

        if AssertUnwindSafe(self.cleanup()).catch_unwind().await.is_err() {
            debug!("fault during cleanup ignored");
        }
    }

    /// Delete the probe row if one was written, close the connection and the syslog handle.
    ///
    /// Best effort and idempotent: failures are ignored and only the first call has any effect.
    pub async fn cleanup(&mut self) {
        if !self.gate.begin_cleanup() {
            return;
        }

        if let Some(mut store) = self.store.take() {
            if let Some(id) = self.record.insert_id.take()
                && let Err(e) = store.delete(id).await
            {
                debug!(id, error = %e, "failed to delete probe row");
            }
            if let Err(e) = store.close().await {
                debug!(error = %e, "failed to close database connection");
            }
        }

        if let Some(sink) = self.syslog.take() {
            sink.close();
        }
    }
}

fn not_connected() -> ProbeError {
    ProbeError::UnexpectedFault("no open database connection".to_owned())
}

/// Configured override, else the machine's network name.
fn resolve_hostname(config: &Config) -> String {
    if let Some(name) = &config.hostname {
        return name.clone();
    }
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!(error = %e, "could not determine local hostname, using localhost");
            "localhost".to_owned()
        }
    }
}
