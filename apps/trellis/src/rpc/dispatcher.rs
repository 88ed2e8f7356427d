use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, trace, warn};

use super::queue::PendingRpcQueue;
use super::{RpcError, decode_call, encode_call, validate_call};
use crate::error::{ErrorEvent, ErrorKind};
use crate::identity::{ConnectorId, Lookup};
use crate::metadata::{InvocationContext, TypeDataStore};
use crate::protocol::{DATA_REQUEST_RPC, RpcCall, WireCall};
use crate::state::{StateObject, StateValue};
use crate::tracker::ConnectorTracker;

/// Outcome of applying one incoming batch of calls.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub invoked: usize,
    pub dropped: usize,
    /// Set when a protocol violation stopped the batch; `skipped` calls after
    /// it were never looked at.
    pub aborted: bool,
    pub skipped: usize,
    pub errors: Vec<ErrorEvent>,
}

/// Server side of the RPC layer: applies client calls to connector handlers
/// and queues server-to-client calls until the next response.
#[derive(Debug, Default)]
pub struct RpcDispatcher {
    outgoing: PendingRpcQueue,
}

impl RpcDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a server-to-client call and queues it for the current round.
    pub fn call(&mut self, tracker: &ConnectorTracker, store: &TypeDataStore, call: RpcCall) -> Result<(), RpcError> {
        if !tracker.contains(call.connector.as_str()) {
            return Err(RpcError::UnknownConnector(call.connector));
        }
        let method = validate_call(store, &call)?;
        for interface in tracker.client_interfaces(call.connector.as_str()) {
            self.outgoing.register_interface(&call.connector, interface);
        }
        trace!(connector = %call.connector, interface = %call.interface, method = %call.method, "client call queued");
        self.outgoing.push(call, method.policy, tracker.sync_id());
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.outgoing.len()
    }

    /// Encodes the calls due in `round` for the connectors in `order`.
    pub fn flush(
        &mut self,
        round: u64,
        order: &[ConnectorId],
        store: &TypeDataStore,
        errors: &mut Vec<ErrorEvent>,
    ) -> Vec<WireCall> {
        self.outgoing
            .flush_ordered(round, order)
            .into_iter()
            .filter_map(|call| match encode_call(store, &call) {
                Ok(wire) => Some(wire),
                Err(err) => {
                    errors.push(ErrorEvent::new(
                        ErrorKind::Invocation,
                        Some(call.connector.clone()),
                        err.to_string(),
                    ));
                    None
                }
            })
            .collect()
    }

    /// Applies client calls in order.
    ///
    /// A failing call is reported and the next one still runs. Calls to
    /// removed or unknown connectors are dropped quietly, as are calls to
    /// disabled connectors other than row requests. A call to an interface
    /// the connector never registered ends the batch.
    pub fn dispatch(&mut self, tracker: &mut ConnectorTracker, store: &TypeDataStore, calls: Vec<WireCall>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let total = calls.len();

        for (index, wire) in calls.into_iter().enumerate() {
            let id = wire.connector().clone();
            match tracker.lookup(id.as_str()) {
                Lookup::Live(_) => {}
                Lookup::Stale => {
                    debug!(connector = %id, interface = wire.interface(), "ignoring call to removed connector");
                    report.dropped += 1;
                    continue;
                }
                Lookup::Unknown => {
                    debug!(connector = %id, interface = wire.interface(), "ignoring call to unknown connector");
                    report.dropped += 1;
                    continue;
                }
            }

            if !tracker.is_enabled(id.as_str()) && wire.interface() != DATA_REQUEST_RPC {
                warn!(connector = %id, interface = wire.interface(), method = wire.method(), "ignoring call to disabled connector");
                report.dropped += 1;
                continue;
            }

            if !tracker.has_server_rpc(id.as_str(), wire.interface()) {
                report.errors.push(ErrorEvent::new(
                    ErrorKind::ProtocolViolation,
                    Some(id.clone()),
                    format!("connector does not expose interface {}", wire.interface()),
                ));
                report.aborted = true;
                report.skipped = total - index - 1;
                break;
            }

            let call = match decode_call(store, &wire) {
                Ok((_, call)) => call,
                Err(err) => {
                    report
                        .errors
                        .push(ErrorEvent::new(ErrorKind::Invocation, Some(id), err.to_string()));
                    continue;
                }
            };

            match self.invoke(tracker, store, call) {
                Ok(()) => report.invoked += 1,
                Err(event) => report.errors.push(event),
            }
        }
        report
    }

    fn invoke(&mut self, tracker: &mut ConnectorTracker, store: &TypeDataStore, call: RpcCall) -> Result<(), ErrorEvent> {
        let id = call.connector.clone();
        let failure = |message: String| ErrorEvent::new(ErrorKind::Invocation, Some(id.clone()), message);

        let Some(mut handler) = tracker.take_handler(id.as_str(), &call.interface) else {
            return Err(failure(format!("handler for {} is not available", call.interface)));
        };

        let mut ctx = ServerInvocation {
            tracker: &mut *tracker,
            connector: id.clone(),
            calls: Vec::new(),
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            store.invoke(&call.interface, &call.method, handler.as_mut(), &mut ctx, &call.args)
        }));
        let queued = ctx.calls;
        tracker.restore_handler(id.as_str(), &call.interface, handler);

        let result = match outcome {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(failure(err.to_string())),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                Err(failure(format!("{}.{} panicked: {message}", call.interface, call.method)))
            }
        };

        for queued in queued {
            if let Err(err) = self.call(tracker, store, queued) {
                warn!(connector = %id, error = %err, "dropping call queued by handler");
            }
        }
        result
    }
}

/// Invocation context for server-side handlers.
struct ServerInvocation<'a> {
    tracker: &'a mut ConnectorTracker,
    connector: ConnectorId,
    calls: Vec<RpcCall>,
}

impl InvocationContext for ServerInvocation<'_> {
    fn connector(&self) -> &ConnectorId {
        &self.connector
    }

    fn state_mut(&mut self) -> Option<&mut StateObject> {
        self.tracker.state_mut(self.connector.as_str())
    }

    fn mark_dirty(&mut self) {
        self.tracker.mark_dirty(self.connector.as_str());
    }

    fn call(&mut self, interface: &str, method: &str, args: Vec<StateValue>) {
        self.calls.push(RpcCall {
            connector: self.connector.clone(),
            interface: interface.to_owned(),
            method: method.to_owned(),
            args,
        });
    }

    fn tracker(&mut self) -> Option<&mut ConnectorTracker> {
        Some(&mut *self.tracker)
    }
}
