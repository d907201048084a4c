//! Best-effort fan-out of dispatch frames to connection outbound queues.
//!
//! Delivery is at-most-once with no persistence: a closed or full queue drops
//! the frame for that connection only, and the caller gets an aggregate
//! attempted/delivered count rather than per-connection failures. Not suitable
//! for audit-critical delivery — receivers are expected to re-fetch
//! authoritative state.

use std::sync::Arc;

use ripple_common::HubEvent;

use super::registry::{ConnectionSender, HubRegistry};

/// Aggregate outcome of one fan-out call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
}

pub struct Dispatcher {
    registry: Arc<HubRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HubRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver to every currently-registered connection.
    pub fn send_to_all(&self, event: &HubEvent) -> DispatchReport {
        deliver(self.registry.senders_all(), event)
    }

    /// Deliver to the members of `group` as of dispatch time. A group with no
    /// members is a successful no-op.
    pub fn send_to_group(&self, group: &str, event: &HubEvent) -> DispatchReport {
        deliver(self.registry.senders_for_group(group), event)
    }

    /// Deliver to every connection of `principal` — a principal with several
    /// tabs or devices receives the event on each of them.
    pub fn send_to_user(&self, principal: &str, event: &HubEvent) -> DispatchReport {
        deliver(self.registry.senders_for_principal(principal), event)
    }
}

fn deliver(senders: Vec<ConnectionSender>, event: &HubEvent) -> DispatchReport {
    let frame = event.to_frame();
    let attempted = senders.len();
    let mut delivered = 0;

    for sender in senders {
        match sender.try_send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(err) => {
                tracing::debug!(
                    event = event.name(),
                    error = %err,
                    "dropped frame for unreachable connection"
                );
            }
        }
    }

    DispatchReport {
        attempted,
        delivered,
    }
}
