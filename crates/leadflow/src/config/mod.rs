use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::routing::{ConfigValidationError, RoutingConfig};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub routing: RoutingConfig,
    pub sweeper: SweeperConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let defaults = RoutingConfig::default();
        let routing = RoutingConfig {
            min_confidence_threshold: env_parse(
                "ROUTING_MIN_CONFIDENCE",
                defaults.min_confidence_threshold,
            )?,
            max_agents_per_lead: env_parse("ROUTING_MAX_AGENTS", defaults.max_agents_per_lead)?,
            notification_timeout_ms: env_parse(
                "ROUTING_NOTIFICATION_TIMEOUT_MS",
                defaults.notification_timeout_ms,
            )?,
            round_robin_enabled: env_flag("ROUTING_ROUND_ROBIN", defaults.round_robin_enabled)?,
            load_balancing_enabled: env_flag(
                "ROUTING_LOAD_BALANCING",
                defaults.load_balancing_enabled,
            )?,
        };
        routing.validate().map_err(ConfigError::Routing)?;

        let sweeper = SweeperConfig {
            interval_secs: env_parse("SWEEP_INTERVAL_SECS", 900)?,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            routing,
            sweeper,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Cadence for the background expiry sweep.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval_secs: u64,
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key }),
        Err(_) => Ok(default),
    }
}

fn env_flag(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key }),
        },
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { key: &'static str },
    Routing(ConfigValidationError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { key } => {
                write!(f, "{key} could not be parsed")
            }
            ConfigError::Routing(err) => write!(f, "routing defaults rejected: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::Routing(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("ROUTING_MIN_CONFIDENCE");
        env::remove_var("ROUTING_MAX_AGENTS");
        env::remove_var("ROUTING_NOTIFICATION_TIMEOUT_MS");
        env::remove_var("ROUTING_ROUND_ROBIN");
        env::remove_var("ROUTING_LOAD_BALANCING");
        env::remove_var("SWEEP_INTERVAL_SECS");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.routing, RoutingConfig::default());
        assert_eq!(config.sweeper.interval_secs, 900);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn routing_overrides_are_applied() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ROUTING_MIN_CONFIDENCE", "0.72");
        env::set_var("ROUTING_MAX_AGENTS", "5");
        env::set_var("ROUTING_ROUND_ROBIN", "on");
        env::set_var("ROUTING_LOAD_BALANCING", "off");
        env::set_var("SWEEP_INTERVAL_SECS", "30");

        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.routing.min_confidence_threshold, 0.72);
        assert_eq!(config.routing.max_agents_per_lead, 5);
        assert!(config.routing.round_robin_enabled);
        assert!(!config.routing.load_balancing_enabled);
        assert_eq!(config.sweeper.interval_secs, 30);
        reset_env();
    }

    #[test]
    fn rejects_unparseable_threshold() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ROUTING_MIN_CONFIDENCE", "not-a-number");
        match AppConfig::load() {
            Err(ConfigError::InvalidValue { key }) => {
                assert_eq!(key, "ROUTING_MIN_CONFIDENCE");
            }
            other => panic!("expected invalid value error, got {other:?}"),
        }
        reset_env();
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ROUTING_MIN_CONFIDENCE", "1.5");
        match AppConfig::load() {
            Err(ConfigError::Routing(_)) => {}
            other => panic!("expected routing validation error, got {other:?}"),
        }
        reset_env();
    }
}
