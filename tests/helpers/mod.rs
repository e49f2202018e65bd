#![allow(dead_code)]

use async_trait::async_trait;
use db_healthcheck::config::{Config, DatabaseConfig, SyslogConfig};
use db_healthcheck::data::{Connector, ProbeStore};
use db_healthcheck::error::BackendError;
use db_healthcheck::record::{FetchedRow, ProbeField, ProbeRecord};
use db_healthcheck::request::RequestContext;
use db_healthcheck::response::Responder;
use db_healthcheck::session::{Backends, Session};
use db_healthcheck::system_log::{SyslogOpener, SyslogSink};
use figment::Figment;
use figment::providers::{Format, Toml};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

pub const BASE_CONFIG: &str = r#"
    db_host = "db01.example.net"
    db_user = "probe"
    db_password = "s3cret"
    db_database = "monitoring"
    db_table = "healthcheck"
    hostname = "web01"
"#;

/// Build a validated config from the base settings, with `extra` TOML taking precedence.
pub fn make_config(extra: &str) -> Arc<Config> {
    let figment = Figment::from(Toml::string(BASE_CONFIG)).merge(Toml::string(extra));
    Arc::new(Config::from_figment(&figment).expect("test config should be valid"))
}

pub fn request(remote_addr: &str, app: &str) -> RequestContext {
    RequestContext::from_parts(Some(remote_addr.to_owned()), &format!("app={app}"))
}

/// Where a fake backend should misbehave.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub refuse_connect: bool,
    pub fail_insert: bool,
    pub fail_fetch: bool,
    pub fail_delete: bool,
    pub panic_on_insert: bool,
    pub lose_row: bool,
    pub drop_column: Option<ProbeField>,
    pub tamper: Option<(ProbeField, Option<String>)>,
}

#[derive(Debug, Default)]
pub struct DbState {
    pub rows: BTreeMap<u64, FetchedRow>,
    pub next_id: u64,
    pub connects: usize,
    pub inserts: usize,
    pub fetches: usize,
    pub deletes: usize,
    pub closes: usize,
}

/// In-memory table shared between the test and the connector handed to the session.
#[derive(Clone, Default)]
pub struct FakeDb {
    state: Arc<Mutex<DbState>>,
    faults: Faults,
}

impl FakeDb {
    pub fn with_faults(faults: Faults) -> Self {
        Self {
            state: Arc::default(),
            faults,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, DbState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connector(&self) -> Box<dyn Connector> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl Connector for FakeDb {
    async fn connect(&self, _config: &DatabaseConfig) -> Result<Box<dyn ProbeStore>, BackendError> {
        self.state().connects += 1;
        if self.faults.refuse_connect {
            return Err(BackendError::new("Connection refused", Some("2002".to_owned())));
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl ProbeStore for FakeDb {
    async fn insert(&mut self, record: &ProbeRecord, fields: &[ProbeField]) -> Result<u64, BackendError> {
        if self.faults.panic_on_insert {
            panic!("driver bug on insert");
        }
        let mut state = self.state();
        state.inserts += 1;
        if self.faults.fail_insert {
            return Err(BackendError::new("Table 'monitoring.healthcheck' doesn't exist", Some("1146".to_owned())));
        }
        state.next_id += 1;
        let id = state.next_id;
        let row = fields
            .iter()
            .map(|&f| (f.column().to_owned(), record.value(f).map(str::to_owned)))
            .collect();
        state.rows.insert(id, row);
        Ok(id)
    }

    async fn fetch(&mut self, id: u64, fields: &[ProbeField]) -> Result<Option<FetchedRow>, BackendError> {
        let mut state = self.state();
        state.fetches += 1;
        if self.faults.fail_fetch {
            return Err(BackendError::new("Lost connection to MySQL server during query", Some("2013".to_owned())));
        }
        if self.faults.lose_row {
            return Ok(None);
        }
        let Some(stored) = state.rows.get(&id) else {
            return Ok(None);
        };

        let mut row: FetchedRow = fields
            .iter()
            .filter_map(|f| stored.get(f.column()).map(|v| (f.column().to_owned(), v.clone())))
            .collect();
        if let Some(field) = self.faults.drop_column {
            row.remove(field.column());
        }
        if let Some((field, value)) = &self.faults.tamper {
            row.insert(field.column().to_owned(), value.clone());
        }
        Ok(Some(row))
    }

    async fn delete(&mut self, id: u64) -> Result<(), BackendError> {
        let mut state = self.state();
        state.deletes += 1;
        if self.faults.fail_delete {
            return Err(BackendError::new("Lock wait timeout exceeded", Some("1205".to_owned())));
        }
        state.rows.remove(&id);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BackendError> {
        self.state().closes += 1;
        Ok(())
    }
}

/// Syslog stand-in that records every line written at error severity.
#[derive(Clone, Default)]
pub struct RecordingSyslog {
    pub lines: Arc<Mutex<Vec<String>>>,
    pub refuse_open: bool,
    pub panic_on_write: bool,
}

impl RecordingSyslog {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn opener(&self) -> Box<dyn SyslogOpener> {
        Box::new(self.clone())
    }
}

impl SyslogOpener for RecordingSyslog {
    fn open(&self, _config: &SyslogConfig) -> Result<Box<dyn SyslogSink>, String> {
        if self.refuse_open {
            return Err("No such file or directory (os error 2)".to_owned());
        }
        Ok(Box::new(self.clone()))
    }
}

impl SyslogSink for RecordingSyslog {
    fn error(&mut self, message: &str) -> Result<(), String> {
        if self.panic_on_write {
            panic!("syslog socket vanished");
        }
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).push(message.to_owned());
        Ok(())
    }

    fn close(self: Box<Self>) {}
}

/// Stdout stand-in.
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap_or_else(|e| e.into_inner())).into_owned()
    }

    /// Number of HTTP status lines written so far.
    pub fn responses(&self) -> usize {
        self.text().matches("HTTP/1.0 ").count()
    }
}

pub struct Harness {
    pub session: Session,
    pub db: FakeDb,
    pub syslog: RecordingSyslog,
    pub out: Captured,
}

pub fn harness(config: Arc<Config>, request: RequestContext, db: FakeDb, syslog: RecordingSyslog) -> Harness {
    let out = Captured::default();
    let backends = Backends {
        connector: db.connector(),
        syslog: syslog.opener(),
    };
    let responder = Responder::new(out.clone(), config.response_mode);
    let session = Session::new(config, request, backends, responder);
    Harness {
        session,
        db,
        syslog,
        out,
    }
}
