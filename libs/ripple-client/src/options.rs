//! Client configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::backoff::BackoffSchedule;
use crate::error::ClientError;

/// Supplies the access token for each connect attempt, so reconnects pick up
/// refreshed credentials.
pub type TokenSupplier = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Invoked when the connection fails terminally: a drop with auto-reconnect
/// off, or an exhausted reconnect budget.
pub type ErrorCallback = Arc<dyn Fn(&ClientError) + Send + Sync>;

#[derive(Clone)]
pub struct ClientOptions {
    /// Gateway endpoint, e.g. `ws://localhost:4010/ws`.
    pub endpoint: String,
    pub token_supplier: Option<TokenSupplier>,
    /// Reconnect automatically after a drop from Connected. An initial
    /// `connect()` failure is never retried automatically.
    pub auto_reconnect: bool,
    pub backoff: BackoffSchedule,
    /// Bound on the socket handshake and each individual reconnect attempt.
    pub handshake_timeout: Duration,
    /// After this many consecutive failed reconnect attempts the client goes
    /// terminally Disconnected. `None` keeps retrying at the backoff cap.
    pub max_reconnect_attempts: Option<u32>,
    pub on_error: Option<ErrorCallback>,
}

impl ClientOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token_supplier: None,
            auto_reconnect: true,
            backoff: BackoffSchedule::default(),
            handshake_timeout: Duration::from_secs(10),
            max_reconnect_attempts: None,
            on_error: None,
        }
    }

    pub fn token_supplier(
        mut self,
        supplier: impl Fn() -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.token_supplier = Some(Arc::new(supplier));
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn backoff(mut self, schedule: BackoffSchedule) -> Self {
        self.backoff = schedule;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&ClientError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let options = ClientOptions::new("ws://localhost:4010/ws");
        assert!(options.auto_reconnect);
        assert!(options.token_supplier.is_none());
        assert!(options.max_reconnect_attempts.is_none());
        assert_eq!(options.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn builder_methods_chain() {
        let options = ClientOptions::new("ws://x/ws")
            .auto_reconnect(false)
            .handshake_timeout(Duration::from_secs(3))
            .max_reconnect_attempts(5)
            .token_supplier(|| Some("t".to_string()));
        assert!(!options.auto_reconnect);
        assert_eq!(options.max_reconnect_attempts, Some(5));
        let token = options.token_supplier.as_ref().unwrap()();
        assert_eq!(token.as_deref(), Some("t"));
    }
}
