use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCHEMA_VERSION: &str = "12.170.2";

/// How the identity segment of the engine endpoint is chosen.
///
/// The engine keys scratch sessions by identity, so `PerMount` gets a fresh
/// session (and fresh data) for every provider, while `Fixed` lets several
/// providers share one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum IdentityPolicy {
    PerMount,
    Fixed(String),
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        IdentityPolicy::PerMount
    }
}

/// Transport configuration for the engine. Two configs that compare equal
/// resolve to the same handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub app_prefix: String,
    pub schema_version: String,
    pub identity: IdentityPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 9076,
            secure: false,
            app_prefix: "enginedata".into(),
            schema_version: DEFAULT_SCHEMA_VERSION.into(),
            identity: IdentityPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn endpoint(&self, identity: &str) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!(
            "{scheme}://{}:{}/app/{}/identity/{identity}",
            self.host, self.port, self.app_prefix
        )
    }
}

/// Immutable, opaque connection descriptor. Never mutated after creation;
/// a changed configuration yields a new handle with a new id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    id: u64,
    url: String,
    schema_version: String,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }
}

/// Memoizes one handle per configuration. Performs no I/O.
#[derive(Debug)]
pub struct ConnectionProvider {
    mount_stamp: i64,
    next_id: u64,
    current: Option<(ConnectionConfig, ConnectionHandle)>,
}

impl ConnectionProvider {
    pub fn new() -> Self {
        Self::with_mount_stamp(Utc::now().timestamp_millis())
    }

    pub fn with_mount_stamp(mount_stamp: i64) -> Self {
        Self {
            mount_stamp,
            next_id: 0,
            current: None,
        }
    }

    /// Returns the cached handle when `config` is unchanged, otherwise builds
    /// and caches a new one.
    pub fn provide(&mut self, config: &ConnectionConfig) -> ConnectionHandle {
        if let Some((cached_config, handle)) = &self.current {
            if cached_config == config {
                return handle.clone();
            }
        }

        let identity = match &config.identity {
            IdentityPolicy::PerMount => self.mount_stamp.to_string(),
            IdentityPolicy::Fixed(value) => value.clone(),
        };

        self.next_id += 1;
        let handle = ConnectionHandle {
            id: self.next_id,
            url: config.endpoint(&identity),
            schema_version: config.schema_version.clone(),
        };
        self.current = Some((config.clone(), handle.clone()));
        handle
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

impl Default for ConnectionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_config_yields_same_handle() {
        let mut provider = ConnectionProvider::with_mount_stamp(1_700_000_000_000);
        let config = ConnectionConfig::default();

        let first = provider.provide(&config);
        let second = provider.provide(&config.clone());

        assert_eq!(first, second);
        assert_eq!(
            first.url(),
            "ws://localhost:9076/app/enginedata/identity/1700000000000"
        );
        assert_eq!(first.schema_version(), DEFAULT_SCHEMA_VERSION);
    }

    #[test]
    fn changed_config_yields_new_handle() {
        let mut provider = ConnectionProvider::with_mount_stamp(42);
        let first = provider.provide(&ConnectionConfig::default());
        let second = provider.provide(&ConnectionConfig {
            identity: IdentityPolicy::Fixed("shared".into()),
            ..ConnectionConfig::default()
        });

        assert_ne!(first.id(), second.id());
        assert!(second.url().ends_with("/identity/shared"));
    }

    #[test]
    fn per_mount_identity_differs_between_providers() {
        let config = ConnectionConfig::default();
        let a = ConnectionProvider::with_mount_stamp(1).provide(&config);
        let b = ConnectionProvider::with_mount_stamp(2).provide(&config);
        assert_ne!(a.url(), b.url());

        let fixed = ConnectionConfig {
            identity: IdentityPolicy::Fixed("x".into()),
            ..config
        };
        let c = ConnectionProvider::with_mount_stamp(1).provide(&fixed);
        let d = ConnectionProvider::with_mount_stamp(2).provide(&fixed);
        assert_eq!(c.url(), d.url());
    }

    #[test]
    fn secure_config_uses_wss() {
        let config = ConnectionConfig {
            secure: true,
            ..ConnectionConfig::default()
        };
        assert!(config.endpoint("id").starts_with("wss://"));
    }
}
