use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub database: DatabaseConfig,

    pub security: SecurityConfig,

    pub otp: OtpConfig,

    pub rate_limit: RateLimitConfig,

    pub email: EmailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,

    /// 0 means let tokio decide.
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/almoner.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB.
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations).
    pub argon2_time_cost: u32,

    /// Argon2 parallelism.
    pub argon2_parallelism: u32,

    /// Symmetric key for session token signing. Must be at least 32 bytes;
    /// startup fails otherwise. Override via ALMONER_SESSION_SECRET.
    pub session_secret: String,

    /// Session token lifetime. No refresh, no early revocation.
    pub session_ttl_minutes: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
            session_secret: String::new(),
            session_ttl_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    /// Service-wide switch for the email second factor.
    pub enabled: bool,

    /// Digits in the one-time code.
    pub code_length: u32,

    /// Minutes before an issued code expires.
    pub ttl_minutes: u32,

    /// Wrong guesses allowed before the challenge is destroyed.
    pub max_attempts: u32,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            code_length: 6,
            ttl_minutes: 5,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Login/OTP/setup endpoints.
    pub login_limit: u32,

    /// Authenticated admin mutations.
    pub admin_limit: u32,

    /// Public reads (questions, health).
    pub public_limit: u32,

    pub window_seconds: u64,

    pub gc_interval_seconds: u64,

    /// Keys untouched this long are dropped by the GC sweep.
    pub gc_idle_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_limit: 5,
            admin_limit: 30,
            public_limit: 120,
            window_seconds: 60,
            gc_interval_seconds: 600,
            gc_idle_seconds: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// "log" writes mail to the log (development); "webhook" posts JSON to
    /// the delivery service.
    pub mode: String,

    pub webhook_url: String,

    pub timeout_seconds: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            mode: "log".to_string(),
            webhook_url: String::new(),
            timeout_seconds: 10,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("ALMONER_SESSION_SECRET") {
            self.security.session_secret = secret;
        }
        if let Ok(url) = std::env::var("ALMONER_DATABASE_URL") {
            self.database.url = url;
        }
    }

    /// Fail fast on configuration that would weaken the auth core.
    pub fn validate(&self) -> Result<()> {
        if self.security.session_secret.len() < 32 {
            bail!("security.session_secret must be at least 32 bytes");
        }
        if self.security.session_ttl_minutes <= 0 {
            bail!("security.session_ttl_minutes must be positive");
        }
        if !(4..=10).contains(&self.otp.code_length) {
            bail!("otp.code_length must be between 4 and 10");
        }
        if self.otp.max_attempts == 0 {
            bail!("otp.max_attempts must be at least 1");
        }
        if self.rate_limit.window_seconds == 0 {
            bail!("rate_limit.window_seconds must be positive");
        }
        match self.email.mode.as_str() {
            "log" => {}
            "webhook" => {
                if self.email.webhook_url.is_empty() {
                    bail!("email.webhook_url is required when email.mode is 'webhook'");
                }
            }
            other => bail!("Unknown email.mode '{other}' (expected 'log' or 'webhook')"),
        }

        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("almoner").join("config.toml"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".almoner").join("config.toml"));
        }

        paths
    }
}
