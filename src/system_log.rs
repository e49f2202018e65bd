//! The system log facility that receives one line per failed probe.

use std::str::FromStr;

use ::syslog::{Facility, Formatter3164, Logger, LoggerBackend};

use crate::config::{SyslogConfig, SyslogOptions};

/// An open syslog handle owned by one session.
pub trait SyslogSink: Send {
    /// Write `message` at `LOG_ERR` severity.
    fn error(&mut self, message: &str) -> Result<(), String>;

    fn close(self: Box<Self>);
}

/// Opens the syslog handle at session start; failure is itself a probe failure.
pub trait SyslogOpener: Send + Sync {
    fn open(&self, config: &SyslogConfig) -> Result<Box<dyn SyslogSink>, String>;
}

/// Local syslog daemon over the `/dev/log` family of Unix sockets, RFC 3164 framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSyslog;

impl SyslogOpener for UnixSyslog {
    fn open(&self, config: &SyslogConfig) -> Result<Box<dyn SyslogSink>, String> {
        let facility = Facility::from_str(&config.syslog_facility)
            .map_err(|_| format!("unknown facility {:?}", config.syslog_facility))?;

        let formatter = Formatter3164 {
            facility,
            hostname: None,
            process: config.syslog_ident.clone(),
            pid: std::process::id(),
        };
        let logger = ::syslog::unix(formatter).map_err(|e| e.to_string())?;

        tracing::debug!(
            ident = %config.syslog_ident,
            facility = %config.syslog_facility,
            options = ?config.syslog_options,
            "syslog opened"
        );

        Ok(Box::new(UnixSyslogSink {
            logger,
            ident: config.syslog_ident.clone(),
            perror: config.syslog_options.contains(SyslogOptions::PERROR),
        }))
    }
}

struct UnixSyslogSink {
    logger: Logger<LoggerBackend, Formatter3164>,
    ident: String,
    perror: bool,
}

impl SyslogSink for UnixSyslogSink {
    fn error(&mut self, message: &str) -> Result<(), String> {
        if self.perror {
            eprintln!("{}: {message}", self.ident);
        }
        self.logger.err(message).map_err(|e| e.to_string())
    }

    fn close(self: Box<Self>) {
        tracing::trace!(ident = %self.ident, "syslog closed");
    }
}
