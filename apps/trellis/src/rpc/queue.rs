use std::collections::HashMap;

use tracing::debug;

use crate::identity::ConnectorId;
use crate::metadata::DispatchPolicy;
use crate::protocol::RpcCall;

#[derive(Debug, Clone)]
struct PendingCall {
    call: RpcCall,
    policy: DispatchPolicy,
    round: u64,
    seq: u64,
}

#[derive(Debug, Default)]
struct InterfaceQueue {
    interface: String,
    calls: Vec<PendingCall>,
}

/// Outgoing calls waiting for the next flush, grouped per connector and per
/// interface.
#[derive(Debug, Default)]
pub struct PendingRpcQueue {
    connectors: HashMap<ConnectorId, Vec<InterfaceQueue>>,
    next_seq: u64,
}

impl PendingRpcQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the flush position of `interface` on `connector`. Interfaces are
    /// flushed in the order they were first registered.
    pub fn register_interface(&mut self, connector: &ConnectorId, interface: &str) {
        let queues = self.connectors.entry(connector.clone()).or_default();
        if !queues.iter().any(|queue| queue.interface == interface) {
            queues.push(InterfaceQueue {
                interface: interface.to_owned(),
                calls: Vec::new(),
            });
        }
    }

    /// Queues a call made during `round`.
    pub fn push(&mut self, call: RpcCall, policy: DispatchPolicy, round: u64) {
        self.register_interface(&call.connector, &call.interface);
        let seq = self.next_seq;
        self.next_seq += 1;
        let Some(queue) = self
            .connectors
            .get_mut(&call.connector)
            .and_then(|queues| queues.iter_mut().find(|queue| queue.interface == call.interface))
        else {
            return;
        };
        if policy == DispatchPolicy::LastOnly {
            queue
                .calls
                .retain(|pending| !(pending.policy == DispatchPolicy::LastOnly && pending.call.method == call.method));
        }
        queue.calls.push(PendingCall {
            call,
            policy,
            round,
            seq,
        });
    }

    pub fn len(&self) -> usize {
        self.connectors
            .values()
            .flat_map(|queues| queues.iter())
            .map(|queue| queue.calls.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every call for a connector that no longer exists.
    pub fn drop_connector(&mut self, connector: &ConnectorId) -> usize {
        self.connectors
            .remove(connector)
            .map(|queues| queues.iter().map(|queue| queue.calls.len()).sum())
            .unwrap_or(0)
    }

    /// Takes the calls that are due in `round`, connector by connector in
    /// `order`, interfaces in registration order. Delayed calls made during
    /// `round` itself stay queued. Calls for connectors missing from `order`
    /// are discarded.
    pub fn flush_ordered(&mut self, round: u64, order: &[ConnectorId]) -> Vec<RpcCall> {
        let mut out = Vec::new();
        for connector in order {
            if let Some(queues) = self.connectors.get_mut(connector) {
                for queue in queues.iter_mut() {
                    out.extend(take_due(&mut queue.calls, round).into_iter().map(|pending| pending.call));
                }
            }
        }

        let stale: Vec<ConnectorId> = self
            .connectors
            .keys()
            .filter(|connector| !order.contains(*connector))
            .cloned()
            .collect();
        for connector in stale {
            let dropped = self.drop_connector(&connector);
            if dropped > 0 {
                debug!(connector = %connector, dropped, "discarding calls for connector the client cannot see");
            }
        }
        out
    }

    /// Takes the calls that are due in `round` in the order they were made.
    pub fn flush_sequential(&mut self, round: u64) -> Vec<RpcCall> {
        let mut due: Vec<PendingCall> = self
            .connectors
            .values_mut()
            .flat_map(|queues| queues.iter_mut())
            .flat_map(|queue| take_due(&mut queue.calls, round))
            .collect();
        due.sort_by_key(|pending| pending.seq);
        due.into_iter().map(|pending| pending.call).collect()
    }
}

fn take_due(calls: &mut Vec<PendingCall>, round: u64) -> Vec<PendingCall> {
    let (due, held): (Vec<_>, Vec<_>) = std::mem::take(calls)
        .into_iter()
        .partition(|pending| pending.policy != DispatchPolicy::Delayed || pending.round < round);
    *calls = held;
    due
}
