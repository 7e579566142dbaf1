use anyhow::{ensure, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest batch the queue service hands out per receive call.
pub const MAX_BATCH_SIZE: u32 = 32;
/// Largest visibility timeout the queue service accepts (7 days).
pub const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

const DEFAULT_POSTGRES_PORT: u16 = 5432;

fn setup_config_path() -> Option<PathBuf> {
    env::var("TRAFFIC_SETUP_CONFIG_PATH")
        .ok()
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

/// Optional JSON file carrying the same keys as the environment. Values here only fill gaps the
/// environment left open.
#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    azure_storage_account_name: Option<String>,
    #[serde(default)]
    azure_storage_account_key: Option<String>,
    #[serde(default)]
    azure_storage_queue_name: Option<String>,
    #[serde(default)]
    azure_storage_queue_endpoint: Option<String>,
    #[serde(default)]
    sql_server: Option<String>,
    #[serde(default)]
    sql_database: Option<String>,
    #[serde(default)]
    sql_user: Option<String>,
    #[serde(default)]
    sql_password: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    batch_size: Option<u32>,
    #[serde(default)]
    visibility_timeout_secs: Option<u64>,
    #[serde(default)]
    max_empty_polls: Option<u32>,
    #[serde(default)]
    empty_poll_delay_secs: Option<u64>,
    #[serde(default)]
    publish_interval_ms: Option<u64>,
    #[serde(default)]
    poison_dequeue_limit: Option<u32>,
}

fn read_setup_config(path: &Path) -> Result<SetupConfigOverrides> {
    ensure!(path.exists(), "setup config {} not found", path.display());
    let mut bytes = std::fs::read(path)
        .with_context(|| format!("failed to read setup config {}", path.display()))?;
    simd_json::serde::from_slice(&mut bytes)
        .with_context(|| format!("failed to parse setup config {}", path.display()))
}

/// Problems with the file are logged and the environment alone is used, so tracing should be
/// installed before this runs.
fn load_setup_config_overrides() -> SetupConfigOverrides {
    let Some(path) = setup_config_path() else {
        return SetupConfigOverrides::default();
    };
    read_setup_config(&path).unwrap_or_else(|err| {
        tracing::warn!(error = %format!("{err:#}"), "ignoring setup config; using env only");
        SetupConfigOverrides::default()
    })
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("invalid {key}={raw:?}: {err}")),
        None => Ok(None),
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub account_name: String,
    pub account_key: String,
    pub queue_name: String,
    pub endpoint: String,
    pub poison_queue_name: String,
}

#[derive(Clone, Debug)]
pub struct SqlConfig {
    pub server: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database_url: Option<String>,
    pub pool_size: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub queue: QueueConfig,
    pub sql: SqlConfig,
    pub batch_size: u32,
    pub visibility_timeout_secs: u64,
    pub max_empty_polls: u32,
    pub empty_poll_delay_secs: u64,
    pub publish_interval_ms: u64,
    pub poison_dequeue_limit: Option<u32>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let overrides = load_setup_config_overrides();

        let account_name = env_string("azure_storage_account_name")
            .or_else(|| non_empty(overrides.azure_storage_account_name.as_ref()))
            .context("azure_storage_account_name is required")?;
        let account_key = env_string("azure_storage_account_key")
            .or_else(|| non_empty(overrides.azure_storage_account_key.as_ref()))
            .context("azure_storage_account_key is required")?;
        let queue_name = env_string("azure_storage_queue_name")
            .or_else(|| non_empty(overrides.azure_storage_queue_name.as_ref()))
            .context("azure_storage_queue_name is required")?;
        let endpoint = env_string("TRAFFIC_QUEUE_ENDPOINT")
            .or_else(|| non_empty(overrides.azure_storage_queue_endpoint.as_ref()))
            .unwrap_or_else(|| default_queue_endpoint(&account_name));
        let poison_queue_name = env_string("TRAFFIC_POISON_QUEUE_NAME")
            .unwrap_or_else(|| format!("{queue_name}-poison"));

        let sql = SqlConfig::from_overrides(&overrides)?;

        let config = Self {
            queue: QueueConfig {
                account_name,
                account_key,
                queue_name,
                endpoint,
                poison_queue_name,
            },
            sql,
            batch_size: env_parsed("TRAFFIC_BATCH_SIZE")?
                .or(overrides.batch_size)
                .unwrap_or(MAX_BATCH_SIZE),
            visibility_timeout_secs: env_parsed("TRAFFIC_VISIBILITY_TIMEOUT_SECS")?
                .or(overrides.visibility_timeout_secs)
                .unwrap_or(30),
            max_empty_polls: env_parsed("TRAFFIC_MAX_EMPTY_POLLS")?
                .or(overrides.max_empty_polls)
                .unwrap_or(3),
            empty_poll_delay_secs: env_parsed("TRAFFIC_EMPTY_POLL_DELAY_SECS")?
                .or(overrides.empty_poll_delay_secs)
                .unwrap_or(5),
            publish_interval_ms: env_parsed("TRAFFIC_PUBLISH_INTERVAL_MS")?
                .or(overrides.publish_interval_ms)
                .unwrap_or(1000),
            poison_dequeue_limit: env_parsed("TRAFFIC_POISON_DEQUEUE_LIMIT")?
                .or(overrides.poison_dequeue_limit),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=MAX_BATCH_SIZE).contains(&self.batch_size),
            "batch size must be within 1..={MAX_BATCH_SIZE} (got {})",
            self.batch_size
        );
        ensure!(
            (1..=MAX_VISIBILITY_TIMEOUT_SECS).contains(&self.visibility_timeout_secs),
            "visibility timeout must be within 1..={MAX_VISIBILITY_TIMEOUT_SECS} seconds"
        );
        ensure!(self.max_empty_polls > 0, "max empty polls must be > 0");
        ensure!(self.publish_interval_ms > 0, "publish interval must be > 0");
        ensure!(self.sql.pool_size > 0, "database pool size must be > 0");
        if let Some(limit) = self.poison_dequeue_limit {
            ensure!(limit > 0, "poison dequeue limit must be > 0 when set");
        }
        Ok(())
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn empty_poll_delay(&self) -> Duration {
        Duration::from_secs(self.empty_poll_delay_secs)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

/// Collector endpoint for trace export; unset disables OTLP. Loads `.env` itself because it is
/// read before the rest of the configuration, once tracing can report setup problems.
pub fn otlp_endpoint() -> Option<String> {
    dotenv().ok();
    env_string("OTEL_EXPORTER_OTLP_ENDPOINT")
}

impl SqlConfig {
    /// Store settings alone, for tools that never touch the queue.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let overrides = load_setup_config_overrides();
        let sql = Self::from_overrides(&overrides)?;
        ensure!(sql.pool_size > 0, "database pool size must be > 0");
        Ok(sql)
    }

    fn from_overrides(overrides: &SetupConfigOverrides) -> Result<Self> {
        Ok(Self {
            server: env_string("sql_server").or_else(|| non_empty(overrides.sql_server.as_ref())),
            database: env_string("sql_database")
                .or_else(|| non_empty(overrides.sql_database.as_ref())),
            user: env_string("sql_user").or_else(|| non_empty(overrides.sql_user.as_ref())),
            password: env_string("sql_password")
                .or_else(|| non_empty(overrides.sql_password.as_ref())),
            database_url: env_string("DATABASE_URL")
                .or_else(|| non_empty(overrides.database_url.as_ref())),
            pool_size: env_parsed("TRAFFIC_DB_POOL_SIZE")?.unwrap_or(1),
            acquire_timeout_secs: env_parsed("TRAFFIC_DB_ACQUIRE_TIMEOUT_SECS")?.unwrap_or(30),
        })
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Builds connection options from `DATABASE_URL` when present, otherwise from the
    /// server/database/user/password parts with TLS required.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(url) = &self.database_url {
            let url = normalize_database_url(url);
            return url
                .parse::<PgConnectOptions>()
                .context("invalid DATABASE_URL");
        }

        let server = self.server.as_deref().context("sql_server is required")?;
        let database = self
            .database
            .as_deref()
            .context("sql_database is required")?;
        let user = self.user.as_deref().context("sql_user is required")?;
        let password = self
            .password
            .as_deref()
            .context("sql_password is required")?;
        let (host, port) = split_server(server)?;

        Ok(PgConnectOptions::new()
            .host(&host)
            .port(port)
            .database(database)
            .username(user)
            .password(password)
            .ssl_mode(PgSslMode::Require))
    }
}

fn default_queue_endpoint(account_name: &str) -> String {
    format!("https://{account_name}.queue.core.windows.net")
}

/// Accepts `host`, `host:port`, `host,port` and the `tcp:` prefix seen in managed-SQL connection
/// strings.
fn split_server(server: &str) -> Result<(String, u16)> {
    let trimmed = server.trim();
    let trimmed = trimmed.strip_prefix("tcp:").unwrap_or(trimmed);
    let (host, port) = match trimmed.rsplit_once([',', ':']) {
        Some((host, port)) => {
            let port = port
                .trim()
                .parse::<u16>()
                .with_context(|| format!("invalid port in sql_server {server:?}"))?;
            (host.trim(), port)
        }
        None => (trimmed, DEFAULT_POSTGRES_PORT),
    };
    ensure!(!host.is_empty(), "sql_server {server:?} has no host");
    Ok((host.to_string(), port))
}

fn normalize_database_url(url: &str) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url.to_string()
}
