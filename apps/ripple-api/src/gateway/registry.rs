//! Connection, group, and principal bookkeeping.
//!
//! One `RwLock` guards the connection table, the group index, and the
//! principal index together, so every logical operation (register, unregister,
//! join, leave) updates all sides atomically. The invariant enforced here:
//! `C ∈ members(G)` if and only if `G ∈ groups(C)`, and likewise for the
//! principal index. Groups exist implicitly — first join creates them, last
//! leave removes them from the index.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use ripple_common::protocol::ServerFrame;

use super::HubError;

/// Outbound frame queue for one connection. Dropping the sender wakes the
/// session loop, which tears the socket down.
pub type ConnectionSender = mpsc::Sender<ServerFrame>;

/// Read-only snapshot of one registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub principal: String,
    pub groups: HashSet<String>,
    pub connected_at: DateTime<Utc>,
}

/// A connection removed by `unregister`, with the groups it was cascaded
/// out of (sorted, for a deterministic notification order).
#[derive(Debug, Clone)]
pub struct RemovedConnection {
    pub connection_id: String,
    pub principal: String,
    pub groups: Vec<String>,
}

struct ConnectionEntry {
    principal: String,
    groups: HashSet<String>,
    connected_at: DateTime<Utc>,
    sender: ConnectionSender,
}

impl ConnectionEntry {
    fn info(&self, connection_id: &str) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: connection_id.to_string(),
            principal: self.principal.clone(),
            groups: self.groups.clone(),
            connected_at: self.connected_at,
        }
    }
}

#[derive(Default)]
struct HubIndex {
    connections: HashMap<String, ConnectionEntry>,
    /// Group name → member connection ids. Empty groups are removed.
    groups: HashMap<String, HashSet<String>>,
    /// Principal → connection ids, kept in lockstep with `connections`.
    principals: HashMap<String, HashSet<String>>,
}

/// Authoritative registry of live connections.
pub struct HubRegistry {
    index: RwLock<HubIndex>,
}

impl HubRegistry {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(HubIndex::default()),
        }
    }

    /// Admit a connection. Fails if the id is already live; an id may be
    /// reused only after the prior connection has been fully removed.
    pub fn register(
        &self,
        connection_id: &str,
        principal: &str,
        sender: ConnectionSender,
    ) -> Result<ConnectionInfo, HubError> {
        let mut index = self.index.write();
        if index.connections.contains_key(connection_id) {
            return Err(HubError::DuplicateConnection(connection_id.to_string()));
        }
        let entry = ConnectionEntry {
            principal: principal.to_string(),
            groups: HashSet::new(),
            connected_at: Utc::now(),
            sender,
        };
        let info = entry.info(connection_id);
        index.connections.insert(connection_id.to_string(), entry);
        index
            .principals
            .entry(principal.to_string())
            .or_default()
            .insert(connection_id.to_string());
        Ok(info)
    }

    /// Remove a connection, cascading it out of every group it joined and out
    /// of the principal index.
    pub fn unregister(&self, connection_id: &str) -> Result<RemovedConnection, HubError> {
        let mut guard = self.index.write();
        let index = &mut *guard;
        let entry = index
            .connections
            .remove(connection_id)
            .ok_or_else(|| HubError::NotFound(connection_id.to_string()))?;

        let mut groups: Vec<String> = entry.groups.into_iter().collect();
        groups.sort();
        for group in &groups {
            let now_empty = match index.groups.get_mut(group) {
                Some(members) => {
                    members.remove(connection_id);
                    members.is_empty()
                }
                None => false,
            };
            if now_empty {
                index.groups.remove(group);
            }
        }

        let principal_gone = match index.principals.get_mut(&entry.principal) {
            Some(conns) => {
                conns.remove(connection_id);
                conns.is_empty()
            }
            None => false,
        };
        if principal_gone {
            index.principals.remove(&entry.principal);
        }

        Ok(RemovedConnection {
            connection_id: connection_id.to_string(),
            principal: entry.principal,
            groups,
        })
    }

    pub fn lookup(&self, connection_id: &str) -> Result<ConnectionInfo, HubError> {
        let index = self.index.read();
        index
            .connections
            .get(connection_id)
            .map(|entry| entry.info(connection_id))
            .ok_or_else(|| HubError::NotFound(connection_id.to_string()))
    }

    /// Add the connection to a group. Returns `Ok(Some(principal))` on a real
    /// transition and `Ok(None)` when the connection was already a member —
    /// re-joining is a no-op, not an error.
    pub fn join(&self, connection_id: &str, group: &str) -> Result<Option<String>, HubError> {
        let mut guard = self.index.write();
        let index = &mut *guard;
        let entry = index
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| HubError::NotFound(connection_id.to_string()))?;
        if !entry.groups.insert(group.to_string()) {
            return Ok(None);
        }
        let principal = entry.principal.clone();
        index
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(connection_id.to_string());
        Ok(Some(principal))
    }

    /// Remove the connection from a group. Returns `Ok(Some(principal))` on a
    /// real transition and `Ok(None)` when it was not a member.
    pub fn leave(&self, connection_id: &str, group: &str) -> Result<Option<String>, HubError> {
        let mut guard = self.index.write();
        let index = &mut *guard;
        let entry = index
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| HubError::NotFound(connection_id.to_string()))?;
        if !entry.groups.remove(group) {
            return Ok(None);
        }
        let principal = entry.principal.clone();
        let now_empty = match index.groups.get_mut(group) {
            Some(members) => {
                members.remove(connection_id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            index.groups.remove(group);
        }
        Ok(Some(principal))
    }

    /// Member connection ids of a group; empty for unknown groups. O(group
    /// size), not O(all connections).
    pub fn members_of(&self, group: &str) -> Vec<String> {
        let index = self.index.read();
        index
            .groups
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Member snapshots of a group, for the inspection API.
    pub fn member_infos(&self, group: &str) -> Vec<ConnectionInfo> {
        let index = self.index.read();
        let Some(members) = index.groups.get(group) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|id| index.connections.get(id).map(|entry| entry.info(id)))
            .collect()
    }

    pub fn list_connections(&self) -> Vec<ConnectionInfo> {
        let index = self.index.read();
        index
            .connections
            .iter()
            .map(|(id, entry)| entry.info(id))
            .collect()
    }

    /// Group names with their member counts.
    pub fn group_sizes(&self) -> Vec<(String, usize)> {
        let index = self.index.read();
        index
            .groups
            .iter()
            .map(|(name, members)| (name.clone(), members.len()))
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.index.read().connections.len()
    }

    pub fn group_count(&self) -> usize {
        self.index.read().groups.len()
    }

    // -- Sender snapshots for the dispatcher ------------------------------
    //
    // Membership is resolved once, under the read lock; the actual writes
    // happen outside it. A connection that leaves mid-dispatch may still
    // receive the frame — accepted best-effort semantics.

    pub(crate) fn senders_all(&self) -> Vec<ConnectionSender> {
        let index = self.index.read();
        index
            .connections
            .values()
            .map(|entry| entry.sender.clone())
            .collect()
    }

    pub(crate) fn senders_for_group(&self, group: &str) -> Vec<ConnectionSender> {
        let index = self.index.read();
        let Some(members) = index.groups.get(group) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|id| index.connections.get(id).map(|entry| entry.sender.clone()))
            .collect()
    }

    pub(crate) fn senders_for_principal(&self, principal: &str) -> Vec<ConnectionSender> {
        let index = self.index.read();
        let Some(conns) = index.principals.get(principal) else {
            return Vec::new();
        };
        conns
            .iter()
            .filter_map(|id| index.connections.get(id).map(|entry| entry.sender.clone()))
            .collect()
    }
}

impl Default for HubRegistry {
    fn default() -> Self {
        Self::new()
    }
}
