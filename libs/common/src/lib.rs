pub mod change;
pub mod events;
pub mod id;
pub mod protocol;

pub use change::{ChangeEvent, ChangeKind};
pub use events::HubEvent;

/// Principal assigned to connections that identify without a token.
pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";
