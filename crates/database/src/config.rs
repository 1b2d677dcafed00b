use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Sizing applied to every per-tenant SQL pool.
///
/// `max_idle` mirrors the knob exposed by classic database/sql-style pools;
/// sqlx caps idle connections at `max_open`, so the effective idle limit is
/// the smaller of the two.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_open: u32,
    pub max_idle: u32,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open: 100,
            max_idle: 100,
            idle_timeout: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(3600),
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolSettings {
    pub fn from_env() -> Self {
        Self {
            max_open: env_parse("TENANT_POOL_MAX_OPEN", 100),
            max_idle: env_parse("TENANT_POOL_MAX_IDLE", 100),
            idle_timeout: Duration::from_secs(env_parse("TENANT_POOL_MAX_IDLE_TIME_SECS", 60)),
            max_lifetime: Duration::from_secs(env_parse("TENANT_POOL_MAX_LIFETIME_SECS", 3600)),
            acquire_timeout: Duration::from_secs(env_parse("TENANT_POOL_ACQUIRE_TIMEOUT_SECS", 10)),
        }
    }
}

/// Connection settings for the master pool that serves `app_dsns` lookups.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "mysql://root@localhost:3306/registry".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REGISTRY_DATABASE_URL").unwrap_or_else(|_| Self::default().url),
            max_connections: env_parse("REGISTRY_DATABASE_MAX_CONNECTIONS", 10),
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Registry-wide options. Built with the `with_*` setters or loaded from the
/// environment; every field has a usable default.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Invalidation channel this registry reconciles against.
    pub channel: String,
    /// Deployment stage tag, carried into log lines.
    pub stage: String,
    /// Log level hint for the embedding application's subscriber setup.
    pub log_level: String,
    pub pool: PoolSettings,
    /// Connect every known tenant at startup instead of lazily on first use.
    pub eager_bootstrap: bool,
    /// How long a waiter sleeps between cache re-checks while another task
    /// establishes the same connection.
    pub inflight_wait: Duration,
    /// Upper bound on a single `get`, covering both the in-flight wait and
    /// the establishment itself.
    pub connect_deadline: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            channel: "appdsn:changes".to_string(),
            stage: "dev".to_string(),
            log_level: "info".to_string(),
            pool: PoolSettings::default(),
            eager_bootstrap: false,
            inflight_wait: Duration::from_millis(100),
            connect_deadline: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        Self {
            channel: std::env::var("REGISTRY_CHANNEL").unwrap_or_else(|_| Self::default().channel),
            stage: std::env::var("REGISTRY_STAGE").unwrap_or_else(|_| "dev".to_string()),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            pool: PoolSettings::from_env(),
            eager_bootstrap: env_parse("REGISTRY_EAGER_BOOTSTRAP", false),
            inflight_wait: Duration::from_millis(env_parse("REGISTRY_INFLIGHT_WAIT_MS", 100)),
            connect_deadline: Duration::from_secs(env_parse("REGISTRY_CONNECT_DEADLINE_SECS", 30)),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_eager_bootstrap(mut self, eager: bool) -> Self {
        self.eager_bootstrap = eager;
        self
    }

    pub fn with_inflight_wait(mut self, wait: Duration) -> Self {
        self.inflight_wait = wait;
        self
    }

    pub fn with_connect_deadline(mut self, deadline: Duration) -> Self {
        self.connect_deadline = deadline;
        self
    }
}
