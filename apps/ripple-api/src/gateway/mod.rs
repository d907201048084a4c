//! Real-time gateway: connection registry, group fan-out, and the socket loop.

pub mod dispatch;
pub mod hub;
pub mod registry;
pub mod server;

use thiserror::Error;

/// Errors from registry and membership operations.
///
/// `NotFound` is expected in normal operation — disconnect cleanup races
/// membership calls and operator kicks — and callers tolerate it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("connection `{0}` is already registered")]
    DuplicateConnection(String),
    #[error("connection `{0}` is not registered")]
    NotFound(String),
}
