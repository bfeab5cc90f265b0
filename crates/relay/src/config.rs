// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The DB pool reads its own tuning variables in db/pool.rs.

use std::net::SocketAddr;

const DEV_JWT_SECRET: &str = "socialnet_local_development_jwt_secret_must_be_32_chars";
const DEV_SOCKET_SECRET: &str = "socialnet_local_development_socket_secret";
const DEFAULT_MAX_FRAME_BYTES: usize = 65_536;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HS256 secret shared with the REST backend that issues access tokens.
    pub jwt_secret: String,
    /// Shared secret presented by internal publishers (the publish bridge).
    pub socket_secret: String,
    /// PostgreSQL connection string. `None` runs against the in-memory store.
    pub database_url: Option<String>,
    /// `host[:port]` the publish bridge dials back into.
    pub public_host: String,
    /// Whether the publish bridge dials `wss://` instead of `ws://`.
    pub secured: bool,
    /// Log filter directive (e.g. `info`, `socialnet_relay=debug`).
    pub log_filter: String,
    /// Largest inbound WebSocket frame accepted.
    pub max_frame_bytes: usize,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `SOCIALNET_RELAY_HOST` | `0.0.0.0` |
    /// | `SOCIALNET_RELAY_PORT` | `8000` |
    /// | `SOCIALNET_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `SOCIALNET_SOCKET_SECRET` | dev-only placeholder |
    /// | `SOCIALNET_RELAY_DATABASE_URL` | *(none)* |
    /// | `SOCIALNET_RELAY_PUBLIC_HOST` | `{host}:{port}`, loopback for a wildcard host |
    /// | `SOCIALNET_RELAY_SECURED` | `false` |
    /// | `SOCIALNET_RELAY_LOG_FILTER` | `info` |
    /// | `SOCIALNET_RELAY_MAX_FRAME_BYTES` | `65536` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("SOCIALNET_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("SOCIALNET_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8000);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret =
            env("SOCIALNET_RELAY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());
        let socket_secret =
            env("SOCIALNET_SOCKET_SECRET").unwrap_or_else(|_| DEV_SOCKET_SECRET.into());

        let database_url = env("SOCIALNET_RELAY_DATABASE_URL").ok();

        // A wildcard bind address cannot be dialed; the bridge uses loopback then.
        let public_host = env("SOCIALNET_RELAY_PUBLIC_HOST").unwrap_or_else(|_| {
            if listen_addr.ip().is_unspecified() {
                format!("127.0.0.1:{port}")
            } else {
                listen_addr.to_string()
            }
        });
        let secured = env("SOCIALNET_RELAY_SECURED")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let log_filter = env("SOCIALNET_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let max_frame_bytes = env("SOCIALNET_RELAY_MAX_FRAME_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|bytes| *bytes > 0)
            .unwrap_or(DEFAULT_MAX_FRAME_BYTES);

        Self {
            listen_addr,
            jwt_secret,
            socket_secret,
            database_url,
            public_host,
            secured,
            log_filter,
            max_frame_bytes,
        }
    }

    /// Returns true when either secret is still the development placeholder.
    pub fn uses_dev_secrets(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET || self.socket_secret == DEV_SOCKET_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = RelayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 8000);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert!(cfg.uses_dev_secrets());
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.public_host, "127.0.0.1:8000");
        assert!(!cfg.secured);
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.max_frame_bytes, 65_536);
    }

    #[test]
    fn custom_host_and_port_flow_into_public_host() {
        let mut m = HashMap::new();
        m.insert("SOCIALNET_RELAY_HOST", "127.0.0.1");
        m.insert("SOCIALNET_RELAY_PORT", "9000");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(cfg.public_host, "127.0.0.1:9000");
    }

    #[test]
    fn wildcard_bind_publishes_on_loopback() {
        let mut m = HashMap::new();
        m.insert("SOCIALNET_RELAY_HOST", "0.0.0.0");
        m.insert("SOCIALNET_RELAY_PORT", "9100");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:9100");
        assert_eq!(cfg.public_host, "127.0.0.1:9100");
    }

    #[test]
    fn public_host_and_secured_override() {
        let mut m = HashMap::new();
        m.insert("SOCIALNET_RELAY_PUBLIC_HOST", "realtime.socialnet.dev");
        m.insert("SOCIALNET_RELAY_SECURED", "true");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.public_host, "realtime.socialnet.dev");
        assert!(cfg.secured);
    }

    #[test]
    fn custom_secrets_are_not_dev() {
        let mut m = HashMap::new();
        m.insert("SOCIALNET_RELAY_JWT_SECRET", "production_secret_at_least_32_chars!!");
        m.insert("SOCIALNET_SOCKET_SECRET", "production-socket-secret");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert!(!cfg.uses_dev_secrets());
        assert_eq!(cfg.socket_secret, "production-socket-secret");
    }

    #[test]
    fn database_url_from_env() {
        let mut m = HashMap::new();
        m.insert("SOCIALNET_RELAY_DATABASE_URL", "postgres://u:p@host/db");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://u:p@host/db"));
    }

    #[test]
    fn invalid_numbers_use_defaults() {
        let mut m = HashMap::new();
        m.insert("SOCIALNET_RELAY_PORT", "not_a_number");
        m.insert("SOCIALNET_RELAY_MAX_FRAME_BYTES", "0");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 8000);
        assert_eq!(cfg.max_frame_bytes, 65_536);
    }
}
