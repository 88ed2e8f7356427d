//! One UI session: the tracker, the RPC queues and the error channel behind a
//! single lock.
//!
//! [`UiSession`] holds everything one client's round-trips touch. [`Session`]
//! wraps it in a mutex so client requests and server pushes are serialized,
//! and keeps a queue of deferred mutations that run at the start of the next
//! round.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ErrorEvent, ErrorHandler, ErrorKind, LoggingErrorHandler};
use crate::identity::ConnectorId;
use crate::metadata::TypeDataStore;
use crate::protocol::wire::{DecodedClientBatch, decode_client_batch, encode_server_batch};
use crate::protocol::{RpcCall, ServerBatch, WireError};
use crate::rpc::{RpcDispatcher, RpcError};
use crate::state::StateValue;
use crate::telemetry::{Metric, PerfGuard, record_bytes};
use crate::tracker::{Connector, ConnectorTracker, TrackerError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client message carried an invalid CSRF token")]
    CsrfMismatch,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Server-side state of one client connection.
pub struct UiSession {
    config: Config,
    store: Arc<TypeDataStore>,
    tracker: ConnectorTracker,
    root: ConnectorId,
    rpc: RpcDispatcher,
    errors: Box<dyn ErrorHandler>,
    csrf_token: String,
    next_client_id: u64,
    last_sent: Option<u64>,
    last_activity: Instant,
}

impl UiSession {
    pub fn new(config: Config, store: Arc<TypeDataStore>, root: Connector) -> Result<Self, SessionError> {
        let mut tracker = ConnectorTracker::new();
        let root = tracker.set_root(root)?;
        let csrf_token = Uuid::new_v4().to_string();
        debug!(root = %root, "ui session created");
        Ok(Self {
            config,
            store,
            tracker,
            root,
            rpc: RpcDispatcher::new(),
            errors: Box::new(LoggingErrorHandler),
            csrf_token,
            next_client_id: 0,
            last_sent: None,
            last_activity: Instant::now(),
        })
    }

    pub fn with_error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.errors = Box::new(handler);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &TypeDataStore {
        &self.store
    }

    pub fn tracker(&self) -> &ConnectorTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ConnectorTracker {
        &mut self.tracker
    }

    pub fn root_id(&self) -> &ConnectorId {
        &self.root
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    /// Sync id of the last response written, if any.
    pub fn last_sent(&self) -> Option<u64> {
        self.last_sent
    }

    /// Queues a call to the client half of `connector`.
    pub fn call_client(
        &mut self,
        connector: &ConnectorId,
        interface: &str,
        method: &str,
        args: Vec<StateValue>,
    ) -> Result<(), RpcError> {
        self.rpc.call(
            &self.tracker,
            &self.store,
            RpcCall {
                connector: connector.clone(),
                interface: interface.to_owned(),
                method: method.to_owned(),
                args,
            },
        )
    }

    /// Calls waiting for a future response.
    pub fn pending_calls(&self) -> usize {
        self.rpc.pending()
    }

    fn report(&mut self, event: ErrorEvent) {
        self.errors.handle(event);
    }

    /// Applies one client message and builds the response to it.
    pub fn handle_batch(&mut self, decoded: DecodedClientBatch) -> Result<ServerBatch, SessionError> {
        self.last_activity = Instant::now();
        let DecodedClientBatch { batch, malformed } = decoded;

        if self.config.csrf_check && batch.csrf_token.as_deref() != Some(self.csrf_token.as_str()) {
            self.report(ErrorEvent::new(
                ErrorKind::ProtocolViolation,
                None,
                "missing or invalid CSRF token",
            ));
            return Err(SessionError::CsrfMismatch);
        }

        let mut resync = batch.resynchronize;
        let mut apply_rpc = true;
        if let Some(client_id) = batch.client_id {
            let expected = self.next_client_id;
            if client_id == expected {
                self.next_client_id += 1;
            } else if client_id < expected {
                debug!(client_id, expected, "duplicate client message; resending state");
                apply_rpc = false;
                resync = true;
            } else {
                warn!(client_id, expected, "unexpected client message id; resending state");
                apply_rpc = false;
                resync = true;
            }
        }

        if self.config.sync_id_check && batch.sync_id != self.last_sent {
            info!(
                acknowledged = ?batch.sync_id,
                sent = ?self.last_sent,
                "client is behind the last response; resending state"
            );
            resync = true;
        }

        for problem in malformed {
            self.report(ErrorEvent::new(ErrorKind::MalformedPayload, None, problem.to_string()));
        }

        if apply_rpc && !batch.rpc.is_empty() {
            let _guard = PerfGuard::new(Metric::RpcDispatch);
            let count = batch.rpc.len();
            let report = self.rpc.dispatch(&mut self.tracker, &self.store, batch.rpc);
            trace!(
                calls = count,
                invoked = report.invoked,
                dropped = report.dropped,
                "client batch applied"
            );
            if report.aborted {
                warn!(skipped = report.skipped, "client batch aborted by protocol violation");
            }
            for event in report.errors {
                self.report(event);
            }
        }

        Ok(self.write_response(resync))
    }

    /// Encodes everything that changed since the last response.
    ///
    /// With `resync` the client copy is considered lost and the whole
    /// visible tree is sent again.
    pub fn write_response(&mut self, resync: bool) -> ServerBatch {
        let _guard = PerfGuard::new(Metric::SyncRound);
        if resync {
            self.tracker.mark_all_uninitialized();
        }

        for call in self.tracker.run_response_hooks(&self.store) {
            let connector = call.connector.clone();
            if let Err(err) = self.rpc.call(&self.tracker, &self.store, call) {
                self.report(ErrorEvent::new(ErrorKind::Invocation, Some(connector), err.to_string()));
            }
        }

        let sync = self.tracker.encode_round(&self.store);
        for (connector, err) in sync.failures {
            self.report(ErrorEvent::new(ErrorKind::Invocation, Some(connector), err.to_string()));
        }

        let order = self.tracker.traversal_order();
        let mut errors = Vec::new();
        let rpc = self.rpc.flush(sync.sync_id, &order, &self.store, &mut errors);
        for event in errors {
            self.report(event);
        }

        self.last_sent = Some(sync.sync_id);
        let batch = ServerBatch {
            sync_id: sync.sync_id,
            client_id: self.next_client_id,
            resynchronize: resync,
            csrf_token: resync.then(|| self.csrf_token.clone()),
            types: sync.types.into_iter().collect(),
            hierarchy: sync.hierarchy.into_iter().collect(),
            state: sync.states.into_iter().collect(),
            rpc,
            removed: sync.removed,
        };
        debug!(
            sync_id = batch.sync_id,
            states = batch.state.len(),
            calls = batch.rpc.len(),
            removed = batch.removed.len(),
            "response written"
        );
        batch
    }

    fn is_inactive(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) >= self.config.session_timeout
    }
}

type Task = Box<dyn FnOnce(&mut UiSession) + Send>;

/// A [`UiSession`] behind its lock, shareable across threads and tasks.
pub struct Session {
    inner: Mutex<UiSession>,
    tasks_tx: Sender<Task>,
    tasks_rx: Receiver<Task>,
}

impl Session {
    pub fn new(ui: UiSession) -> Self {
        let (tasks_tx, tasks_rx) = crossbeam_channel::unbounded();
        Self {
            inner: Mutex::new(ui),
            tasks_tx,
            tasks_rx,
        }
    }

    /// Runs `f` under the session lock.
    pub fn access<R>(&self, f: impl FnOnce(&mut UiSession) -> R) -> R {
        let mut ui = self.inner.lock();
        f(&mut ui)
    }

    /// Queues `f` to run under the lock at the start of the next round.
    pub fn access_later(&self, f: impl FnOnce(&mut UiSession) + Send + 'static) {
        if self.tasks_tx.send(Box::new(f)).is_err() {
            warn!("session task queue closed; dropping deferred access");
        }
    }

    /// Runs every queued [`access_later`](Self::access_later) closure now.
    pub fn run_pending(&self) -> usize {
        let mut ui = self.inner.lock();
        self.drain_tasks(&mut ui)
    }

    fn drain_tasks(&self, ui: &mut UiSession) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.tasks_rx.try_recv() {
            task(ui);
            ran += 1;
        }
        ran
    }

    /// Handles one JSON client message and returns the JSON response.
    pub fn handle_message(&self, body: &str) -> Result<String, SessionError> {
        record_bytes(Metric::ClientMessage, body.len());
        let decoded = match decode_client_batch(body) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.access(|ui| {
                    ui.report(ErrorEvent::new(ErrorKind::MalformedPayload, None, err.to_string()));
                });
                return Err(err.into());
            }
        };
        let response = {
            let mut ui = self.inner.lock();
            self.drain_tasks(&mut ui);
            ui.handle_batch(decoded)?
        };
        let body = encode_server_batch(&response)?;
        record_bytes(Metric::ServerMessage, body.len());
        Ok(body)
    }

    /// Builds a server-initiated response outside any client request.
    pub fn push(&self) -> ServerBatch {
        let mut ui = self.inner.lock();
        self.drain_tasks(&mut ui);
        ui.write_response(false)
    }

    pub fn is_inactive(&self, now: Instant) -> bool {
        self.inner.lock().is_inactive(now)
    }

    pub fn csrf_token(&self) -> String {
        self.inner.lock().csrf_token.clone()
    }
}
