//! Hub service: registry plus dispatcher, with lifecycle notifications.
//!
//! One owned instance lives in `AppState` and is handed by reference to every
//! connection task and route handler — no global state, and a fresh hub per
//! test is trivial.

use std::sync::Arc;

use serde_json::Value;

use ripple_common::id::{self, prefix};
use ripple_common::{ChangeEvent, HubEvent};

use super::dispatch::{DispatchReport, Dispatcher};
use super::registry::{ConnectionInfo, ConnectionSender, HubRegistry};
use super::HubError;

pub struct Hub {
    registry: Arc<HubRegistry>,
    dispatcher: Dispatcher,
}

impl Hub {
    pub fn new() -> Self {
        let registry = Arc::new(HubRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        Self {
            registry,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &HubRegistry {
        &self.registry
    }

    /// Admit a connection under a fresh `conn_` id and announce it to every
    /// current connection (the new one included, so presence-aware clients
    /// need no separate poll).
    pub fn register(
        &self,
        principal: &str,
        sender: ConnectionSender,
    ) -> Result<ConnectionInfo, HubError> {
        let connection_id = id::prefixed_ulid(prefix::CONNECTION);
        let info = self.registry.register(&connection_id, principal, sender)?;
        self.dispatcher
            .send_to_all(&HubEvent::user_connected(principal, &connection_id));
        tracing::info!(
            connection_id = %info.connection_id,
            principal = %info.principal,
            "connection registered"
        );
        Ok(info)
    }

    /// Remove a connection, notifying each group it was in and then everyone
    /// else. An unknown id is a silent no-op — disconnect cleanup races the
    /// kick path, and both sides call this.
    pub fn disconnect(&self, connection_id: &str) {
        match self.registry.unregister(connection_id) {
            Ok(removed) => {
                for group in &removed.groups {
                    self.dispatcher
                        .send_to_group(group, &HubEvent::group_left(&removed.principal, group));
                }
                self.dispatcher
                    .send_to_all(&HubEvent::user_disconnected(&removed.principal));
                tracing::info!(
                    connection_id,
                    principal = %removed.principal,
                    groups = removed.groups.len(),
                    "connection unregistered"
                );
            }
            Err(err) => {
                tracing::debug!(connection_id, %err, "unregister for unknown connection");
            }
        }
    }

    /// Join a group, announcing the transition to all members — the joiner
    /// included, so the joining client can confirm success. Re-joining emits
    /// nothing.
    pub fn join_group(&self, connection_id: &str, group: &str) -> Result<(), HubError> {
        if let Some(principal) = self.registry.join(connection_id, group)? {
            self.dispatcher
                .send_to_group(group, &HubEvent::group_joined(&principal, group));
            tracing::debug!(connection_id, group, "joined group");
        }
        Ok(())
    }

    /// Leave a group, announcing the transition to the remaining members.
    /// Leaving a group never joined emits nothing.
    pub fn leave_group(&self, connection_id: &str, group: &str) -> Result<(), HubError> {
        if let Some(principal) = self.registry.leave(connection_id, group)? {
            self.dispatcher
                .send_to_group(group, &HubEvent::group_left(&principal, group));
            tracing::debug!(connection_id, group, "left group");
        }
        Ok(())
    }

    /// Fan a committed change out to every connection.
    pub fn broadcast_change(&self, change: ChangeEvent) -> DispatchReport {
        self.dispatcher.send_to_all(&HubEvent::DataChanged(change))
    }

    /// Fan a named application event out to one group.
    pub fn send_to_group(&self, group: &str, event_name: &str, data: Value) -> DispatchReport {
        self.dispatcher
            .send_to_group(group, &HubEvent::custom(event_name, data))
    }

    /// Fan a named application event out to every connection of a principal.
    pub fn send_to_user(&self, principal: &str, event_name: &str, data: Value) -> DispatchReport {
        self.dispatcher
            .send_to_user(principal, &HubEvent::custom(event_name, data))
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use ripple_common::events::EventName;
    use ripple_common::protocol::ServerFrame;
    use ripple_common::ChangeKind;

    use super::*;

    fn connect(hub: &Hub, principal: &str) -> (String, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(32);
        let info = hub.register(principal, tx).unwrap();
        (info.connection_id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn names(frames: &[ServerFrame]) -> Vec<&str> {
        frames.iter().filter_map(|f| f.t.as_deref()).collect()
    }

    #[test]
    fn register_announces_to_everyone_including_self() {
        let hub = Hub::new();
        let (_a, mut a_rx) = connect(&hub, "alice");
        let (b_id, mut b_rx) = connect(&hub, "bob");

        let a_frames = drain(&mut a_rx);
        // a sees its own USER_CONNECTED and then bob's.
        assert_eq!(
            names(&a_frames),
            vec![EventName::USER_CONNECTED, EventName::USER_CONNECTED]
        );
        assert_eq!(a_frames[1].d["principal"], "bob");
        assert_eq!(a_frames[1].d["connection_id"], b_id);

        // b only sees its own.
        assert_eq!(names(&drain(&mut b_rx)), vec![EventName::USER_CONNECTED]);
    }

    #[test]
    fn join_notifies_group_members_once() {
        let hub = Hub::new();
        let (a, mut a_rx) = connect(&hub, "alice");
        let (b, mut b_rx) = connect(&hub, "bob");
        drain(&mut a_rx);
        drain(&mut b_rx);

        hub.join_group(&a, "g1").unwrap();
        // Self-notification confirms the join.
        assert_eq!(names(&drain(&mut a_rx)), vec![EventName::GROUP_JOINED]);
        // Non-members hear nothing.
        assert!(drain(&mut b_rx).is_empty());

        hub.join_group(&b, "g1").unwrap();
        let a_frames = drain(&mut a_rx);
        assert_eq!(names(&a_frames), vec![EventName::GROUP_JOINED]);
        assert_eq!(a_frames[0].d["principal"], "bob");

        // Repeated join: no state change, no duplicate notification.
        hub.join_group(&a, "g1").unwrap();
        assert!(drain(&mut a_rx).is_empty());
        assert!(drain(&mut b_rx).is_empty());
    }

    #[test]
    fn leave_notifies_remaining_members_only() {
        let hub = Hub::new();
        let (a, mut a_rx) = connect(&hub, "alice");
        let (b, mut b_rx) = connect(&hub, "bob");
        hub.join_group(&a, "g1").unwrap();
        hub.join_group(&b, "g1").unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        hub.leave_group(&a, "g1").unwrap();
        // The leaver is already out of the snapshot.
        assert!(drain(&mut a_rx).is_empty());
        let b_frames = drain(&mut b_rx);
        assert_eq!(names(&b_frames), vec![EventName::GROUP_LEFT]);
        assert_eq!(b_frames[0].d["principal"], "alice");
    }

    #[test]
    fn leave_without_join_emits_nothing() {
        let hub = Hub::new();
        let (a, mut a_rx) = connect(&hub, "alice");
        let (b, mut b_rx) = connect(&hub, "bob");
        hub.join_group(&b, "g1").unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        hub.leave_group(&a, "g1").unwrap();
        assert!(drain(&mut a_rx).is_empty());
        assert!(drain(&mut b_rx).is_empty());
        assert_eq!(hub.registry().members_of("g1"), vec![b]);
    }

    #[test]
    fn disconnect_cascades_group_left_then_user_disconnected() {
        let hub = Hub::new();
        let (a, mut a_rx) = connect(&hub, "alice");
        let (b, mut b_rx) = connect(&hub, "bob");
        hub.join_group(&a, "g1").unwrap();
        hub.join_group(&b, "g1").unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        hub.disconnect(&a);
        let b_frames = drain(&mut b_rx);
        assert_eq!(
            names(&b_frames),
            vec![EventName::GROUP_LEFT, EventName::USER_DISCONNECTED]
        );
        assert_eq!(b_frames[0].d["group"], "g1");
        assert_eq!(b_frames[1].d["principal"], "alice");
    }

    #[test]
    fn disconnect_unknown_connection_emits_nothing() {
        let hub = Hub::new();
        let (_a, mut a_rx) = connect(&hub, "alice");
        drain(&mut a_rx);

        hub.disconnect("conn_unknown");
        assert!(drain(&mut a_rx).is_empty());
    }

    #[test]
    fn broadcast_change_reaches_all_connections() {
        let hub = Hub::new();
        let (_a, mut a_rx) = connect(&hub, "alice");
        let (_b, mut b_rx) = connect(&hub, "bob");
        drain(&mut a_rx);
        drain(&mut b_rx);

        let change = ChangeEvent::new(
            ChangeKind::Update,
            "order",
            "42",
            Some(serde_json::json!({ "status": "shipped" })),
            "svc-orders",
        );
        let report = hub.broadcast_change(change);
        assert_eq!(report.delivered, 2);

        let frames = drain(&mut a_rx);
        assert_eq!(names(&frames), vec![EventName::DATA_CHANGED]);
        assert_eq!(frames[0].d["entity_id"], "42");
        assert_eq!(frames[0].d["kind"], "update");
    }

    #[test]
    fn send_to_user_reaches_all_tabs_of_that_principal() {
        let hub = Hub::new();
        let (_a1, mut a1_rx) = connect(&hub, "alice");
        let (_a2, mut a2_rx) = connect(&hub, "alice");
        let (_b, mut b_rx) = connect(&hub, "bob");
        drain(&mut a1_rx);
        drain(&mut a2_rx);
        drain(&mut b_rx);

        let report = hub.send_to_user("alice", "PING", serde_json::json!({}));
        assert_eq!(report.delivered, 2);
        assert_eq!(names(&drain(&mut a1_rx)), vec!["PING"]);
        assert_eq!(names(&drain(&mut a2_rx)), vec!["PING"]);
        assert!(drain(&mut b_rx).is_empty());
    }

    #[test]
    fn send_to_group_respects_membership() {
        let hub = Hub::new();
        let (a, mut a_rx) = connect(&hub, "alice");
        let (_b, mut b_rx) = connect(&hub, "bob");
        hub.join_group(&a, "order_42").unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        let report = hub.send_to_group(
            "order_42",
            "ORDER_UPDATED",
            serde_json::json!({ "status": "shipped" }),
        );
        assert_eq!(report.delivered, 1);

        let frames = drain(&mut a_rx);
        assert_eq!(names(&frames), vec!["ORDER_UPDATED"]);
        assert_eq!(frames[0].d["status"], "shipped");
        assert!(drain(&mut b_rx).is_empty());
    }
}
