use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default port the hub listens on
pub const DEFAULT_PORT: u16 = 8080;

/// Default quiet period before an edit burst is committed
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Default time `stop` waits for peers to acknowledge the close
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(1000);

/// Hub configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface the listener binds (default: 0.0.0.0)
    pub host: String,
    /// Default listening port (default: 8080)
    pub port: u16,
    /// Document database file path (default: ./docshare.db)
    pub database_path: PathBuf,
    /// Originator id stamped on locally published updates
    pub user_id: String,
    /// Quiet period of the change publisher (default: 1000ms)
    pub debounce: Duration,
    /// How long stopping waits for peers to close (default: 1000ms)
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            database_path: PathBuf::from("./docshare.db"),
            user_id: uuid::Uuid::new_v4().to_string(),
            debounce: DEFAULT_DEBOUNCE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let host = env::var("HOST").unwrap_or(defaults.host);
        let port = match env::var("PORT") {
            Ok(v) => v.trim().parse().map_err(|_| ConfigError::InvalidPort)?,
            Err(_) => defaults.port,
        };

        let database_path = env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let user_id = env::var("USER_ID")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.user_id);

        let debounce = match env::var("DEBOUNCE_MS") {
            Ok(v) => parse_millis(&v).ok_or(ConfigError::InvalidDebounce)?,
            Err(_) => defaults.debounce,
        };

        let shutdown_grace = match env::var("SHUTDOWN_GRACE_MS") {
            Ok(v) => parse_millis(&v).ok_or(ConfigError::InvalidShutdownGrace)?,
            Err(_) => defaults.shutdown_grace,
        };

        Ok(Config {
            host,
            port,
            database_path,
            user_id,
            debounce,
            shutdown_grace,
        })
    }
}

fn parse_millis(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_millis)
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidDebounce,
    InvalidShutdownGrace,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
            ConfigError::InvalidDebounce => write!(f, "Invalid DEBOUNCE_MS environment variable"),
            ConfigError::InvalidShutdownGrace => {
                write!(f, "Invalid SHUTDOWN_GRACE_MS environment variable")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
