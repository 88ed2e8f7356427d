//! Session-level error reporting.
//!
//! Failures that happen while a round is being processed never abort the
//! round. They are turned into [`ErrorEvent`]s and handed to the session's
//! [`ErrorHandler`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::identity::ConnectorId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A message referenced a connector that has already been removed.
    StaleReference,
    /// Part of a payload could not be parsed or decoded.
    MalformedPayload,
    /// An RPC or setter could not be resolved or raised an error.
    Invocation,
    /// The client broke the protocol: bad token, unexpected message id, or a
    /// call to an interface the connector does not expose.
    ProtocolViolation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub connector: Option<ConnectorId>,
    pub message: String,
}

impl ErrorEvent {
    pub fn new(kind: ErrorKind, connector: Option<ConnectorId>, message: impl Into<String>) -> Self {
        Self {
            kind,
            connector,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.connector {
            Some(id) => write!(f, "{:?} on connector {}: {}", self.kind, id, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

pub trait ErrorHandler: Send {
    fn handle(&mut self, event: ErrorEvent);
}

/// Default handler: logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn handle(&mut self, event: ErrorEvent) {
        let connector = event.connector.as_ref().map(ConnectorId::as_str).unwrap_or("-");
        match event.kind {
            ErrorKind::StaleReference => debug!(connector, message = %event.message, "stale reference"),
            ErrorKind::MalformedPayload => warn!(connector, message = %event.message, "malformed payload"),
            ErrorKind::Invocation => error!(connector, message = %event.message, "invocation failed"),
            ErrorKind::ProtocolViolation => warn!(connector, message = %event.message, "protocol violation"),
        }
    }
}

/// Keeps every event, sharing them with clones of itself. Useful for
/// surfacing errors to an embedding application.
#[derive(Debug, Default, Clone)]
pub struct CollectingErrorHandler {
    events: Arc<Mutex<Vec<ErrorEvent>>>,
}

impl CollectingErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ErrorEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<ErrorEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl ErrorHandler for CollectingErrorHandler {
    fn handle(&mut self, event: ErrorEvent) {
        LoggingErrorHandler.handle(event.clone());
        self.events.lock().push(event);
    }
}
