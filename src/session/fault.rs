//! Fault interception for faults that escape the normal error path.
//!
//! One process-wide panic hook is installed on first use. It dispatches to the
//! interceptor registered on the current thread, which records the fault for the
//! session's `catch_unwind` boundary, or drops it when the session has already
//! started reporting. Threads without an interceptor keep the previous hook.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, PoisonError};

use super::state::{SessionState, StateGate};

/// A captured fault, with the source location when the hook saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub message: String,
    pub location: Option<String>,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {location}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

struct Slot {
    gate: Arc<StateGate>,
    captured: Mutex<Option<Fault>>,
    suppressed: AtomicUsize,
}

impl Slot {
    fn capture(&self, info: &PanicHookInfo<'_>) {
        let fault = Fault {
            message: payload_message(info.payload()),
            location: info.location().map(|l| format!("{}:{}", l.file(), l.line())),
        };

        if self.gate.peek().is_none_or(SessionState::is_reporting) {
            self.suppressed.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(fault = %fault, "fault during failure handling suppressed");
            return;
        }

        tracing::debug!(fault = %fault, "fault intercepted");
        let mut captured = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        captured.get_or_insert(fault);
    }
}

thread_local! {
    static ACTIVE: RefCell<Option<Arc<Slot>>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let fallback = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let slot = ACTIVE
                .try_with(|active| active.try_borrow().ok().and_then(|slot| slot.clone()))
                .ok()
                .flatten();
            match slot {
                Some(slot) => slot.capture(info),
                None => fallback(info),
            }
        }));
    });
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_owned()
    }
}

/// Routes faults on this thread into the owning session's failure path.
pub struct FaultInterceptor {
    slot: Arc<Slot>,
    previous: Option<Arc<Slot>>,
}

impl FaultInterceptor {
    /// Register for the current thread. Registrations nest: dropping this one
    /// reactivates whatever was registered before it.
    pub fn register(gate: Arc<StateGate>) -> Self {
        install_hook();
        let slot = Arc::new(Slot {
            gate,
            captured: Mutex::new(None),
            suppressed: AtomicUsize::new(0),
        });
        let previous = ACTIVE.with(|active| active.borrow_mut().replace(slot.clone()));
        Self { slot, previous }
    }

    /// Turn an unwound panic into the fault to report, preferring what the hook captured.
    pub fn take_fault(&self, payload: Box<dyn Any + Send>) -> Fault {
        let captured = self
            .slot
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        captured.unwrap_or_else(|| Fault {
            message: payload_message(&*payload),
            location: None,
        })
    }

    /// Faults dropped because they arrived after reporting had begun.
    pub fn suppressed(&self) -> usize {
        self.slot.suppressed.load(Ordering::SeqCst)
    }
}

impl Drop for FaultInterceptor {
    fn drop(&mut self) {
        let _ = ACTIVE.try_with(|active| {
            if let Ok(mut active) = active.try_borrow_mut()
                && active.as_ref().is_some_and(|slot| Arc::ptr_eq(slot, &self.slot))
            {
                *active = self.previous.take();
            }
        });
    }
}
