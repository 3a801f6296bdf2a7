//! Configuration management
//!
//! Values are layered: built-in defaults, then an optional `devrank.toml`
//! (path overridable with `DEVRANK_CONFIG`), then `DEVRANK_*` environment
//! variables using `__` as the section separator (`DEVRANK_HARVEST__WORKERS=8`).
//! The conventional `DATABASE_URL`, `REDIS_URL` and `GITHUB_TOKENS`
//! variables are honored last.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/devrank";

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Upstream Constants
// ============================================================================

pub const DEFAULT_GITHUB_BASE_URL: &str = "https://api.github.com";
pub const DEFAULT_GITHUB_USER_AGENT: &str = "devrank-harvester";
pub const DEFAULT_GITHUB_TIMEOUT_SECS: u64 = 30;

/// Longest single sleep when every credential is cooling down.
pub const DEFAULT_MAX_EXHAUSTED_WAIT_SECS: u64 = 15 * 60;

pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_FLOOR_SECS: u64 = 1;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 60 * 60;

// ============================================================================
// Harvest / Ranking Constants
// ============================================================================

pub const DEFAULT_HARVEST_WORKERS: usize = 5;
pub const DEFAULT_HARVEST_MAX_ATTEMPTS: i32 = 3;
pub const DEFAULT_HARVEST_RETRY_BASE_SECS: u64 = 30;
pub const DEFAULT_HARVEST_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_HARVEST_STALE_AFTER_HOURS: i64 = 24;
pub const DEFAULT_ACTIVITY_MAX_PAGES: u32 = 3;
pub const DEFAULT_REPO_MAX_PAGES: u32 = 10;
/// Must exceed the longest exhausted-pool sleep.
pub const DEFAULT_STALE_JOB_TIMEOUT_SECS: u64 = 30 * 60;

/// Subjects need strictly more than 30 followers to be ranked.
pub const DEFAULT_RANKING_MIN_FOLLOWERS: i64 = 31;
pub const DEFAULT_RANKING_RECALCULATE_AFTER_HOURS: i64 = 24;
pub const DEFAULT_RANKING_ACTIVITY_WINDOW_DAYS: i64 = 90;

pub const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_SCHEDULER_LOCK_TTL_SECS: u64 = 30 * 60;
pub const DEFAULT_DISCOVERY_MIN_FOLLOWERS: i64 = 31;
pub const DEFAULT_DISCOVERY_MAX_PAGES: u32 = 2;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 60 * 60;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub cors: CorsConfig,
    pub github: GithubConfig,
    pub credentials: CredentialConfig,
    pub harvest: HarvestConfig,
    pub ranking: RankingConfig,
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Shared key-value store. Without a URL an in-process store is used, which
/// only coordinates a single instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Upstream API access
#[derive(Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    pub base_url: String,
    pub tokens: Vec<String>,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub max_exhausted_wait_secs: u64,
}

impl std::fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubConfig")
            .field("base_url", &self.base_url)
            .field("tokens", &format_args!("[{} redacted]", self.tokens.len()))
            .field("user_agent", &self.user_agent)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_exhausted_wait_secs", &self.max_exhausted_wait_secs)
            .finish()
    }
}

/// Cooldown policy for rate-limited credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub base_backoff_secs: u64,
    pub floor_secs: u64,
    pub max_backoff_secs: u64,
}

impl CredentialConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_secs(self.base_backoff_secs)
    }

    pub fn floor(&self) -> Duration {
        Duration::from_secs(self.floor_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

/// Harvest queue and worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub workers: usize,
    pub max_attempts: i32,
    pub retry_base_delay_secs: u64,
    pub poll_interval_ms: u64,
    /// Age after which a stored subject is refreshed on read
    pub stale_after_hours: i64,
    pub activity_max_pages: u32,
    pub repo_max_pages: u32,
    /// Active jobs without a heartbeat for this long are assumed orphaned by a
    /// crashed worker
    pub stale_job_timeout_secs: u64,
}

/// Named region and the free-text aliases that map to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub name: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    pub min_followers: i64,
    pub recalculate_after_hours: i64,
    pub activity_window_days: i64,
    /// Empty means the built-in gazetteer
    pub regions: Vec<RegionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub lock_ttl_secs: u64,
    /// Locations searched upstream for new subjects each cycle
    pub discovery_locations: Vec<String>,
    pub discovery_min_followers: i64,
    pub discovery_max_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Config {
    /// Load configuration from `.env`, the optional TOML file and the environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_figment(Self::figment())?;
        config.validate()?;

        Ok(config)
    }

    /// The layered provider chain, exposed for tests and tooling
    pub fn figment() -> Figment {
        let file = std::env::var("DEVRANK_CONFIG").unwrap_or_else(|_| "devrank.toml".to_string());

        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("DEVRANK_").split("__").ignore(&["config"]))
            .merge(
                Env::raw()
                    .only(&["DATABASE_URL", "REDIS_URL"])
                    .map(|key| match key.as_str() {
                        "DATABASE_URL" => "database.url".into(),
                        _ => "redis.url".into(),
                    }),
            )
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment.extract()?;

        if let Ok(tokens) = std::env::var("GITHUB_TOKENS") {
            config.github.tokens = split_list(&tokens);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.harvest.workers == 0 {
            anyhow::bail!("Harvest workers must be greater than 0");
        }

        if self.harvest.max_attempts < 1 {
            anyhow::bail!("Harvest max_attempts must be at least 1");
        }

        if self.harvest.stale_job_timeout_secs <= self.github.max_exhausted_wait_secs {
            anyhow::bail!(
                "Harvest stale_job_timeout_secs ({}) must exceed github max_exhausted_wait_secs ({})",
                self.harvest.stale_job_timeout_secs,
                self.github.max_exhausted_wait_secs
            );
        }

        let creds = &self.credentials;
        if creds.floor_secs > creds.max_backoff_secs || creds.base_backoff_secs > creds.max_backoff_secs {
            anyhow::bail!(
                "Credential backoff bounds are inverted (base {}s, floor {}s, max {}s)",
                creds.base_backoff_secs,
                creds.floor_secs,
                creds.max_backoff_secs
            );
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        if self.github.tokens.is_empty() {
            tracing::warn!("No GitHub tokens configured - upstream calls will be anonymous");
        }

        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            redis: RedisConfig::default(),
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            github: GithubConfig {
                base_url: DEFAULT_GITHUB_BASE_URL.to_string(),
                tokens: Vec::new(),
                user_agent: DEFAULT_GITHUB_USER_AGENT.to_string(),
                request_timeout_secs: DEFAULT_GITHUB_TIMEOUT_SECS,
                max_exhausted_wait_secs: DEFAULT_MAX_EXHAUSTED_WAIT_SECS,
            },
            credentials: CredentialConfig {
                base_backoff_secs: DEFAULT_BACKOFF_BASE_SECS,
                floor_secs: DEFAULT_BACKOFF_FLOOR_SECS,
                max_backoff_secs: DEFAULT_BACKOFF_MAX_SECS,
            },
            harvest: HarvestConfig {
                workers: DEFAULT_HARVEST_WORKERS,
                max_attempts: DEFAULT_HARVEST_MAX_ATTEMPTS,
                retry_base_delay_secs: DEFAULT_HARVEST_RETRY_BASE_SECS,
                poll_interval_ms: DEFAULT_HARVEST_POLL_INTERVAL_MS,
                stale_after_hours: DEFAULT_HARVEST_STALE_AFTER_HOURS,
                activity_max_pages: DEFAULT_ACTIVITY_MAX_PAGES,
                repo_max_pages: DEFAULT_REPO_MAX_PAGES,
                stale_job_timeout_secs: DEFAULT_STALE_JOB_TIMEOUT_SECS,
            },
            ranking: RankingConfig {
                min_followers: DEFAULT_RANKING_MIN_FOLLOWERS,
                recalculate_after_hours: DEFAULT_RANKING_RECALCULATE_AFTER_HOURS,
                activity_window_days: DEFAULT_RANKING_ACTIVITY_WINDOW_DAYS,
                regions: Vec::new(),
            },
            scheduler: SchedulerConfig {
                enabled: true,
                interval_secs: DEFAULT_SCHEDULER_INTERVAL_SECS,
                lock_ttl_secs: DEFAULT_SCHEDULER_LOCK_TTL_SECS,
                discovery_locations: Vec::new(),
                discovery_min_followers: DEFAULT_DISCOVERY_MIN_FOLLOWERS,
                discovery_max_pages: DEFAULT_DISCOVERY_MAX_PAGES,
            },
            cache: CacheConfig {
                ttl_secs: DEFAULT_CACHE_TTL_SECS,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use serial_test::serial;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.harvest.workers, 5);
        assert_eq!(config.harvest.max_attempts, 3);
        assert_eq!(config.ranking.min_followers, 31);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.harvest.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.credentials.floor_secs = config.credentials.max_backoff_secs + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_stale_timeout_above_exhausted_wait() {
        let mut config = Config::default();
        config.harvest.stale_job_timeout_secs = config.github.max_exhausted_wait_secs;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stale_job_timeout_secs"));

        config.harvest.stale_job_timeout_secs = config.github.max_exhausted_wait_secs + 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_layered_sources() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "devrank.toml",
                r#"
                [harvest]
                workers = 2

                [[ranking.regions]]
                name = "Portugal"
                aliases = ["portugal", "lisbon"]
                "#,
            )?;
            jail.set_env("DEVRANK_SERVER__PORT", "9100");
            jail.set_env("DATABASE_URL", "postgresql://db/devrank_test");
            jail.set_env("REDIS_URL", "redis://cache:6379");
            jail.set_env("GITHUB_TOKENS", "ghp_one, ghp_two,,");

            let config = Config::from_figment(Config::figment())
                .map_err(|e| figment::Error::from(e.to_string()))?;

            assert_eq!(config.harvest.workers, 2);
            assert_eq!(config.server.port, 9100);
            assert_eq!(config.database.url, "postgresql://db/devrank_test");
            assert_eq!(config.redis.url.as_deref(), Some("redis://cache:6379"));
            assert_eq!(config.github.tokens, vec!["ghp_one", "ghp_two"]);
            assert_eq!(config.ranking.regions[0].aliases.len(), 2);
            Ok(())
        });
    }

    #[test]
    fn test_github_debug_redacts_tokens() {
        let mut config = Config::default();
        config.github.tokens = vec!["ghp_secret".to_string()];
        let rendered = format!("{:?}", config.github);
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("1 redacted"));
    }
}
