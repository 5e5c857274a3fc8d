//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::score::DEFAULT_WIN_SCORE;
use crate::util::time::DEFAULT_TICK_RATE_HZ;

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// PostgREST persistence settings
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: String,
    /// Supabase service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,

    /// HS256 secret shared with the auth service
    pub auth_jwt_secret: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,

    /// In-memory store when absent
    pub supabase: Option<SupabaseConfig>,

    pub tick_rate_hz: u32,
    /// How long a room may sit without connected players
    pub room_grace: Duration,
    pub default_win_score: u32,

    pub persist_max_attempts: u32,
    pub persist_backoff: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Render-style PORT wins over SERVER_ADDR
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(_) => return Err(ConfigError::Invalid("LOG_FORMAT")),
        };

        let supabase = match (lookup("SUPABASE_URL"), lookup("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseConfig {
                url,
                service_role_key,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
        };

        let auth_jwt_secret = lookup("AUTH_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("AUTH_JWT_SECRET"))?;

        let tick_rate_hz: u32 = parse_or(&lookup, "TICK_RATE_HZ", DEFAULT_TICK_RATE_HZ)?;
        if !(1..=240).contains(&tick_rate_hz) {
            return Err(ConfigError::Invalid("TICK_RATE_HZ"));
        }
        let default_win_score: u32 = parse_or(&lookup, "DEFAULT_WIN_SCORE", DEFAULT_WIN_SCORE)?;
        if default_win_score == 0 {
            return Err(ConfigError::Invalid("DEFAULT_WIN_SCORE"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,

            auth_jwt_secret,
            client_origin: lookup("CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:5173".to_string()),

            supabase,

            tick_rate_hz,
            room_grace: Duration::from_secs(parse_or(&lookup, "ROOM_GRACE_SECS", 30u64)?),
            default_win_score,

            persist_max_attempts: parse_or(&lookup, "PERSIST_MAX_ATTEMPTS", 4u32)?.max(1),
            persist_backoff: Duration::from_millis(parse_or(&lookup, "PERSIST_BACKOFF_MS", 200u64)?),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_with_only_the_secret() {
        let config = load(&[("AUTH_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.tick_rate_hz, 60);
        assert_eq!(config.default_win_score, 11);
        assert_eq!(config.room_grace, Duration::from_secs(30));
        assert_eq!(config.persist_max_attempts, 4);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.supabase.is_none());
    }

    #[test]
    fn port_overrides_server_addr() {
        let config = load(&[
            ("AUTH_JWT_SECRET", "s"),
            ("PORT", "9000"),
            ("SERVER_ADDR", "127.0.0.1:1234"),
        ])
        .unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn missing_or_invalid_values_fail() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("AUTH_JWT_SECRET"))));
        assert!(matches!(
            load(&[("AUTH_JWT_SECRET", "s"), ("TICK_RATE_HZ", "fast")]),
            Err(ConfigError::Invalid("TICK_RATE_HZ"))
        ));
        assert!(matches!(
            load(&[("AUTH_JWT_SECRET", "s"), ("TICK_RATE_HZ", "0")]),
            Err(ConfigError::Invalid("TICK_RATE_HZ"))
        ));
        assert!(matches!(
            load(&[("AUTH_JWT_SECRET", "s"), ("SUPABASE_URL", "https://x.supabase.co")]),
            Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"))
        ));
        assert!(matches!(
            load(&[("AUTH_JWT_SECRET", "s"), ("SERVER_ADDR", "nope")]),
            Err(ConfigError::InvalidAddress)
        ));
    }
}
