/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// HS256 secret for bearer/IDENTIFY tokens. When unset, tokens cannot be
    /// validated and every caller is admitted as anonymous.
    pub auth_secret: Option<String>,
    /// Heartbeat interval advertised to clients in READY (ms).
    pub heartbeat_interval_ms: u64,
    /// How long a fresh socket may take to send IDENTIFY (seconds).
    pub handshake_timeout_secs: u64,
    /// Outbound frame queue depth per connection. A full queue drops frames
    /// for that connection only.
    pub outbound_buffer: usize,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", 4010),
            auth_secret: std::env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty()),
            heartbeat_interval_ms: env_or("HEARTBEAT_INTERVAL_MS", 30_000),
            handshake_timeout_secs: env_or("HANDSHAKE_TIMEOUT_SECS", 10),
            outbound_buffer: env_or("OUTBOUND_BUFFER", 256),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4010,
            auth_secret: None,
            heartbeat_interval_ms: 30_000,
            handshake_timeout_secs: 10,
            outbound_buffer: 256,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
