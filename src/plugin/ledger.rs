//! Unload ledger
//!
//! One ordered list of teardown callbacks per consumer. Draining runs the
//! list in reverse registration order; each callback is taken out of the
//! ledger before it runs, so nothing ever runs twice, and a failing (or
//! panicking) callback never stops the rest of the drain.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::core::consumer::ConsumerId;
use crate::core::error::Result;

/// A zero-argument teardown callback
pub type UnloadFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// What happened during one drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Callbacks executed, including failed ones
    pub ran: usize,
    /// Error messages in the order they occurred
    pub failures: Vec<String>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn first_error(&self) -> Option<&str> {
        self.failures.first().map(String::as_str)
    }
}

/// Per-consumer teardown callbacks
#[derive(Default)]
pub struct UnloadLedger {
    entries: Mutex<HashMap<ConsumerId, Vec<UnloadFn>>>,
}

impl UnloadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback to `consumer`'s entry
    pub fn register<F>(&self, consumer: &ConsumerId, callback: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.lock()
            .entry(consumer.clone())
            .or_default()
            .push(Box::new(callback));
    }

    /// Run and remove every callback for `consumer`, newest first.
    ///
    /// Callbacks registered while draining are run as part of the same drain.
    pub fn drain(&self, consumer: &ConsumerId) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            // Never hold the lock while a callback runs.
            let next = {
                let mut entries = self.lock();
                let next = entries.get_mut(consumer).and_then(Vec::pop);
                if next.is_none() {
                    entries.remove(consumer);
                }
                next
            };
            let Some(callback) = next else {
                break;
            };

            report.ran += 1;
            match catch_unwind(AssertUnwindSafe(callback)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(consumer = %consumer, error = %e, "Unload callback failed");
                    report.failures.push(e.to_string());
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(consumer = %consumer, panic = %message, "Unload callback panicked");
                    report.failures.push(message);
                }
            }
        }

        if report.ran > 0 {
            debug!(
                consumer = %consumer,
                ran = report.ran,
                failures = report.failures.len(),
                "Unload ledger drained"
            );
        }
        report
    }

    /// Number of callbacks waiting for `consumer`
    pub fn pending(&self, consumer: &ConsumerId) -> usize {
        self.lock().get(consumer).map_or(0, Vec::len)
    }

    /// Consumers with at least one pending callback
    pub fn consumers(&self) -> Vec<ConsumerId> {
        let mut consumers: Vec<_> = self
            .lock()
            .iter()
            .filter(|(_, callbacks)| !callbacks.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        consumers.sort();
        consumers
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConsumerId, Vec<UnloadFn>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
