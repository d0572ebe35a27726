//! Attributed fault reports and the channel that collects them.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{error, warn};

use super::{Classified, ErrorCategory, ErrorSeverity};

/// An attributed error raised by a background task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    /// Component that raised the fault (e.g. `"channel"`, `"fanout"`).
    pub component: String,
    /// Error category.
    pub category: ErrorCategory,
    /// Error severity.
    pub severity: ErrorSeverity,
    /// Service the fault belongs to.
    pub service: Option<String>,
    /// Session the fault belongs to.
    pub session_id: Option<String>,
    /// Channel attempt counter when the fault was raised.
    pub attempt: Option<u32>,
    /// Human-readable message.
    pub message: String,
}

impl Fault {
    /// Build a fault from a classified error.
    pub fn from_error<E: Classified + ?Sized>(component: &str, err: &E) -> Self {
        Self {
            component: component.to_owned(),
            category: err.category(),
            severity: err.severity(),
            service: err.service().map(str::to_owned),
            session_id: err.session_id().map(str::to_owned),
            attempt: err.attempt(),
            message: err.to_string(),
        }
    }

    /// Build a fault with only a category and message.
    pub fn new(component: &str, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            component: component.to_owned(),
            category,
            severity: ErrorSeverity::Error,
            service: None,
            session_id: None,
            attempt: None,
            message: message.into(),
        }
    }

    /// Attach a session ID.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.component, self.category, self.message)?;
        if let Some(service) = &self.service {
            write!(f, " service={service}")?;
        }
        if let Some(session_id) = &self.session_id {
            write!(f, " session={session_id}")?;
        }
        if let Some(attempt) = self.attempt {
            write!(f, " attempt={attempt}")?;
        }
        Ok(())
    }
}

/// Sending half of the fault channel. Cheap to clone.
///
/// Every report is logged; when a [`FaultReceiver`] exists it also receives
/// the fault.
#[derive(Clone, Debug)]
pub struct FaultReporter {
    tx: Option<mpsc::UnboundedSender<Fault>>,
}

impl FaultReporter {
    /// Create a connected reporter/receiver pair.
    pub fn channel() -> (Self, FaultReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, FaultReceiver { rx })
    }

    /// A reporter that only logs.
    pub fn log_only() -> Self {
        Self { tx: None }
    }

    /// Report a fault.
    pub fn report(&self, fault: Fault) {
        match fault.severity {
            ErrorSeverity::Transient => warn!(
                component = %fault.component,
                category = %fault.category,
                service = fault.service.as_deref(),
                session_id = fault.session_id.as_deref(),
                attempt = fault.attempt,
                "{}", fault.message
            ),
            ErrorSeverity::Error | ErrorSeverity::Fatal => error!(
                component = %fault.component,
                category = %fault.category,
                service = fault.service.as_deref(),
                session_id = fault.session_id.as_deref(),
                attempt = fault.attempt,
                "{}", fault.message
            ),
        }
        if let Some(tx) = &self.tx {
            if tx.send(fault).is_err() {
                warn!("fault receiver dropped, fault only logged");
            }
        }
    }

    /// Attribute and report a classified error.
    pub fn report_error<E: Classified + ?Sized>(&self, component: &str, err: &E) {
        self.report(Fault::from_error(component, err));
    }
}

impl Default for FaultReporter {
    fn default() -> Self {
        Self::log_only()
    }
}

/// Receiving half of the fault channel.
#[derive(Debug)]
pub struct FaultReceiver {
    rx: mpsc::UnboundedReceiver<Fault>,
}

impl FaultReceiver {
    /// Wait for the next fault. `None` once every reporter is dropped.
    pub async fn recv(&mut self) -> Option<Fault> {
        self.rx.recv().await
    }

    /// Take every fault reported so far without waiting.
    pub fn drain(&mut self) -> Vec<Fault> {
        let mut faults = Vec::new();
        while let Ok(fault) = self.rx.try_recv() {
            faults.push(fault);
        }
        faults
    }
}
