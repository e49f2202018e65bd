//! Fault boundary around the whole invocation, including the work done before
//! a [`Session`](super::Session) exists.
//!
//! The guard owns the process-wide [`StateGate`]. Sessions built with
//! [`Session::with_gate`](super::Session::with_gate) share it, so a fault that
//! escapes after the session has answered cannot produce a second response.

use futures::FutureExt;
use std::future::Future;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;

use super::fault::FaultInterceptor;
use super::state::{SessionState, StateGate};
use crate::config::ResponseMode;
use crate::error::ProbeError;
use crate::response::Responder;

pub struct ProcessGuard {
    gate: Arc<StateGate>,
    interceptor: FaultInterceptor,
}

impl ProcessGuard {
    /// Register the process-level interceptor on the current thread.
    pub fn install() -> Self {
        let gate = StateGate::new();
        let interceptor = FaultInterceptor::register(gate.clone());
        Self { gate, interceptor }
    }

    pub fn gate(&self) -> Arc<StateGate> {
        self.gate.clone()
    }

    /// Answer `500` with `message` unless a response was already started.
    ///
    /// No syslog line is written: failures reported here happen before the
    /// syslog settings are known to be usable.
    pub fn fail(&self, out: impl Write + Send + 'static, mode: ResponseMode, message: &str) -> bool {
        if !self.gate.begin_report() {
            debug!(reason = message, "response already started, dropping failure");
            return false;
        }
        let sent = Responder::new(out, mode).report_failure(None, message);
        self.gate.advance(SessionState::Reported { healthy: false });
        sent
    }

    /// Drive `body`; a fault escaping it is answered on `out` like any other failure.
    pub async fn run<F>(&self, out: impl Write + Send + 'static, body: F)
    where
        F: Future<Output = ()>,
    {
        if let Err(payload) = AssertUnwindSafe(body).catch_unwind().await {
            let fault = self.interceptor.take_fault(payload);
            let message = ProbeError::UnexpectedFault(fault.to_string()).to_string();
            self.fail(out, ResponseMode::default(), &message);
        }
    }
}
