//! Rendering of the single outcome as a syslog line and an HTTP response on stdout.

use http::StatusCode;
use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{error, info, warn};

use crate::config::ResponseMode;
use crate::system_log::SyslogSink;

/// Writes at most one HTTP response for the invocation.
pub struct Responder {
    out: Box<dyn Write + Send>,
    mode: ResponseMode,
    sent: bool,
}

impl Responder {
    pub fn new(out: impl Write + Send + 'static, mode: ResponseMode) -> Self {
        Self {
            out: Box::new(out),
            mode,
            sent: false,
        }
    }

    /// `200 OK` with an empty message section. Nothing goes to syslog.
    pub fn report_success(&mut self) -> bool {
        info!("probe succeeded");
        self.emit(StatusCode::OK, None)
    }

    /// Log `message` at error severity, then answer `500` with the message in the body.
    pub fn report_failure(&mut self, syslog: Option<&mut Box<dyn SyslogSink>>, message: &str) -> bool {
        error!(reason = message, "probe failed");

        if let Some(sink) = syslog {
            // A broken log sink must not cost the caller its response.
            match catch_unwind(AssertUnwindSafe(|| sink.error(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "failed to write failure to syslog"),
                Err(_) => warn!("syslog sink panicked while logging failure"),
            }
        }

        self.emit(StatusCode::INTERNAL_SERVER_ERROR, Some(message))
    }

    fn emit(&mut self, status: StatusCode, message: Option<&str>) -> bool {
        if self.sent {
            warn!(status = status.as_u16(), "response already sent, dropping second report");
            return false;
        }
        self.sent = true;

        let response = format!("{}{}", render_head(status, self.mode), render_body(status, message));
        if let Err(e) = self
            .out
            .write_all(response.as_bytes())
            .and_then(|()| self.out.flush())
        {
            warn!(error = %e, "failed to write HTTP response");
        }
        true
    }
}

fn status_text(status: StatusCode) -> String {
    format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    )
}

/// Header block, terminated by the empty line that separates it from the body.
pub fn render_head(status: StatusCode, mode: ResponseMode) -> String {
    let status_line = match mode {
        ResponseMode::Nph => format!("HTTP/1.0 {}", status_text(status)),
        ResponseMode::Cgi => format!("Status: {}", status_text(status)),
    };
    format!("{status_line}\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n")
}

/// HTML document; the failure message is escaped since it may carry backend text.
pub fn render_body(status: StatusCode, message: Option<&str>) -> String {
    let text = status_text(status);
    let paragraph = message
        .map(|m| format!("<p>{}</p>", html_escape::encode_text(m)))
        .unwrap_or_default();
    format!("<html><head><title>{text}</title></head><body><h1>{text}</h1>{paragraph}</body></html>\n")
}
