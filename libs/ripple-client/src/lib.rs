//! Resilient client for the Ripple gateway.
//!
//! Maintains a logical connection over an unreliable transport: named event
//! listeners, server method invocation, and automatic reconnection on a
//! deterministic backoff schedule with group re-join replay.

pub mod backoff;
pub mod client;
pub mod error;
pub mod handlers;
pub mod options;
pub mod state;
pub mod transport;

pub use backoff::BackoffSchedule;
pub use client::RippleClient;
pub use error::{ClientError, Result};
pub use handlers::HandlerId;
pub use options::ClientOptions;
pub use state::ConnectionState;
