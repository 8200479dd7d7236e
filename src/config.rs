// Configuration File Support
//
// TOML configuration for the patient service with environment variable
// overrides. A missing file yields the defaults, which match the deployed
// service and the published chaos parameters.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::logging::{LogFormat, LogLevel};
use crate::store::PoolSettings;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "patient.toml";

/// Longest issued token lifetime: one year
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub chaos: ChaosConfig,
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (plain, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin, `*` for any
    pub cors_origin: String,
    /// Deployment label reported by the service info endpoint
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origin: "*".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// MySQL connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub pool: PoolConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            name: "patient".to_string(),
            user: "admin".to_string(),
            password: String::new(),
            pool: PoolConfig::default(),
        }
    }
}

/// Connection pool limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub max: u32,
    pub min: u32,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max: 10,
            min: 2,
            acquire_timeout_ms: 30_000,
            idle_timeout_ms: 10_000,
        }
    }
}

impl PoolConfig {
    pub fn settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
        }
    }
}

/// Credential configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret".to_string(),
            token_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Chaos scenario parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ChaosConfig {
    /// Load post authors one query per post in the list endpoint
    pub mode: bool,
    pub db_failure: DbFailureConfig,
    pub pool_exhaustion: PoolExhaustionConfig,
    pub memory_leak: MemoryLeakConfig,
    pub slow_query: SlowQueryConfig,
    pub api_timeout: ApiTimeoutConfig,
    pub jwt_expiry: JwtExpiryConfig,
    pub high_cpu: HighCpuConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DbFailureConfig {
    /// Deliberately wrong endpoint
    pub host: String,
    pub port: u16,
    pub acquire_timeout_ms: u64,
}

impl Default for DbFailureConfig {
    fn default() -> Self {
        Self {
            host: "wrong-db-endpoint.xxxx.eu-west-1.rds.amazonaws.com".to_string(),
            port: 3306,
            acquire_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolExhaustionConfig {
    /// Attempts per pooled connection
    pub overload_factor: u32,
    pub sleep_secs: u64,
    pub stagger_ms: u64,
}

impl Default for PoolExhaustionConfig {
    fn default() -> Self {
        Self {
            overload_factor: 3,
            sleep_secs: 5,
            stagger_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryLeakConfig {
    pub duration_secs: u64,
    pub chunk_bytes: usize,
    pub leak_interval_ms: u64,
    pub sample_interval_ms: u64,
    /// Denominator for usage percentages
    pub memory_limit_mb: u64,
    pub warn_percent: f64,
    pub critical_percent: f64,
}

impl Default for MemoryLeakConfig {
    fn default() -> Self {
        Self {
            duration_secs: 30,
            chunk_bytes: 1024 * 1024,
            leak_interval_ms: 500,
            sample_interval_ms: 2000,
            memory_limit_mb: 512,
            warn_percent: 80.0,
            critical_percent: 90.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SlowQueryConfig {
    pub seed_posts: u32,
    pub slow_threshold_ms: u64,
}

impl Default for SlowQueryConfig {
    fn default() -> Self {
        Self {
            seed_posts: 100,
            slow_threshold_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiTimeoutConfig {
    /// Upstream that answers slower than `timeout_ms`
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for ApiTimeoutConfig {
    fn default() -> Self {
        Self {
            url: "https://httpstat.us/200?sleep=10000".to_string(),
            timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JwtExpiryConfig {
    pub validity_secs: u64,
    pub wait_ms: u64,
}

impl Default for JwtExpiryConfig {
    fn default() -> Self {
        Self {
            validity_secs: 1,
            wait_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HighCpuConfig {
    pub duration_secs: u64,
    /// Loop iterations per blocking batch
    pub iterations: u64,
    pub batch_interval_ms: u64,
    pub sample_interval_ms: u64,
}

impl Default for HighCpuConfig {
    fn default() -> Self {
        Self {
            duration_secs: 30,
            iterations: 5_000_000,
            batch_interval_ms: 1000,
            sample_interval_ms: 2000,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to expose the Prometheus endpoint
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from a specific path
    ///
    /// Returns defaults (plus environment overrides) if the file does not
    /// exist; errors if it exists but cannot be read, parsed or validated.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Variable names are the ones the service is deployed with:
    /// PORT, CORS_ORIGIN, APP_ENV, DB_HOST, DB_PORT, DB_NAME, DB_USER, DB_PASSWORD,
    /// JWT_SECRET, CHAOS_MODE, PATIENT_LOG_LEVEL, PATIENT_LOG_FORMAT
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("PATIENT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PATIENT_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(origin) = std::env::var("CORS_ORIGIN") {
            self.server.cors_origin = origin;
        }
        if let Ok(environment) = std::env::var("APP_ENV") {
            self.server.environment = environment;
        }

        if let Ok(host) = std::env::var("DB_HOST") {
            self.database.host = host;
        }
        if let Ok(port) = std::env::var("DB_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.database.port = port;
            }
        }
        if let Ok(name) = std::env::var("DB_NAME") {
            self.database.name = name;
        }
        if let Ok(user) = std::env::var("DB_USER") {
            self.database.user = user;
        }
        if let Ok(password) = std::env::var("DB_PASSWORD") {
            self.database.password = password;
        }

        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(mode) = std::env::var("CHAOS_MODE") {
            self.chaos.mode = mode == "true";
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.logging
            .level
            .parse::<LogLevel>()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        self.logging
            .format
            .parse::<LogFormat>()
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        if self.server.port == 0 {
            anyhow::bail!("Server port must be > 0");
        }

        let pool = &self.database.pool;
        if pool.max == 0 {
            anyhow::bail!("Pool max must be >= 1");
        }
        if pool.min > pool.max {
            anyhow::bail!("Pool min ({}) must be <= max ({})", pool.min, pool.max);
        }
        if pool.acquire_timeout_ms == 0 {
            anyhow::bail!("Pool acquire timeout must be > 0");
        }

        if self.auth.jwt_secret.is_empty() {
            anyhow::bail!("JWT secret must not be empty");
        }
        if self.auth.token_ttl_secs == 0 || self.auth.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            anyhow::bail!(
                "Token TTL must be between 1 and {} seconds (got {})",
                MAX_TOKEN_TTL_SECS,
                self.auth.token_ttl_secs
            );
        }

        self.chaos.validate()
    }
}

impl ChaosConfig {
    fn validate(&self) -> Result<()> {
        if self.db_failure.acquire_timeout_ms == 0 {
            anyhow::bail!("db_failure.acquire_timeout_ms must be > 0");
        }
        if self.pool_exhaustion.overload_factor == 0 {
            anyhow::bail!("pool_exhaustion.overload_factor must be >= 1");
        }

        let leak = &self.memory_leak;
        if leak.duration_secs == 0 || leak.leak_interval_ms == 0 || leak.sample_interval_ms == 0 {
            anyhow::bail!("memory_leak duration and intervals must be > 0");
        }
        if leak.memory_limit_mb == 0 {
            anyhow::bail!("memory_leak.memory_limit_mb must be > 0");
        }
        if !(leak.warn_percent < leak.critical_percent && leak.critical_percent <= 100.0) {
            anyhow::bail!(
                "memory_leak thresholds must satisfy warn < critical <= 100 (got {} / {})",
                leak.warn_percent,
                leak.critical_percent
            );
        }

        if self.slow_query.seed_posts == 0 {
            anyhow::bail!("slow_query.seed_posts must be > 0");
        }

        if self.api_timeout.timeout_ms == 0 {
            anyhow::bail!("api_timeout.timeout_ms must be > 0");
        }
        let url = reqwest::Url::parse(&self.api_timeout.url)
            .with_context(|| format!("Invalid api_timeout.url: {}", self.api_timeout.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("api_timeout.url must be http or https, got {}", url.scheme());
        }

        let cpu = &self.high_cpu;
        if cpu.duration_secs == 0 || cpu.batch_interval_ms == 0 || cpu.sample_interval_ms == 0 {
            anyhow::bail!("high_cpu duration and intervals must be > 0");
        }

        Ok(())
    }
}
