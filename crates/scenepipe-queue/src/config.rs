//! Broker and publisher configuration.

use std::time::Duration;

use url::Url;

/// Broker connection configuration.
#[derive(Clone)]
pub struct BrokerConfig {
    /// Broker host name or address
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Optional ACL user
    pub username: Option<String>,
    /// Optional password
    pub password: Option<String>,
    /// Consumer group shared by all instances of a consumer type
    pub consumer_group: String,
    /// How long startup keeps retrying an unreachable broker
    pub connect_deadline: Duration,
    /// Minimum idle time before an unacknowledged message is redelivered
    pub claim_min_idle: Duration,
    /// Deliveries after which a message is dead-lettered
    pub max_deliveries: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            consumer_group: "scenepipe".to_string(),
            connect_deadline: Duration::from_secs(120), // 2 minutes
            claim_min_idle: Duration::from_secs(300),   // 5 minutes
            max_deliveries: 5,
        }
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("consumer_group", &self.consumer_group)
            .field("connect_deadline", &self.connect_deadline)
            .field("claim_min_idle", &self.claim_min_idle)
            .field("max_deliveries", &self.max_deliveries)
            .finish()
    }
}

impl BrokerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("BROKER_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("BROKER_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(6379),
            username: std::env::var("BROKER_USERNAME").ok().filter(|s| !s.is_empty()),
            password: std::env::var("BROKER_PASSWORD").ok().filter(|s| !s.is_empty()),
            consumer_group: std::env::var("BROKER_CONSUMER_GROUP")
                .unwrap_or_else(|_| "scenepipe".to_string()),
            connect_deadline: Duration::from_secs(
                std::env::var("BROKER_CONNECT_DEADLINE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            claim_min_idle: Duration::from_secs(
                std::env::var("BROKER_CLAIM_MIN_IDLE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            max_deliveries: std::env::var("BROKER_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }

    /// Connection URL with credentials percent-encoded.
    pub fn redis_url(&self) -> String {
        let base = format!("redis://{}:{}", self.host, self.port);
        let Ok(mut url) = Url::parse(&base) else {
            return base;
        };
        if let Some(user) = &self.username {
            let _ = url.set_username(user);
        }
        if let Some(password) = &self.password {
            let _ = url.set_password(Some(password));
        }
        url.to_string()
    }
}

/// Job publisher configuration.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Base URL under which the workers reach `/worker-data/`
    pub base_url: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://host.docker.internal:5000".to_string(),
        }
    }
}

impl PublisherConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://host.docker.internal:5000".to_string()),
        }
    }
}
