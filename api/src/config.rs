use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub port: u16,
    /// Browser origins allowed by CORS
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let store = match var("COACHLOG_STORE").as_deref().map(str::trim) {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "COACHLOG_STORE",
                    value: other.to_string(),
                    reason: "expected 'postgres' or 'memory'",
                });
            }
        };

        let database_url = var("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let db_max_connections = parse_or(
            "COACHLOG_DB_MAX_CONNECTIONS",
            var("COACHLOG_DB_MAX_CONNECTIONS"),
            20u32,
        )?;
        if db_max_connections == 0 {
            return Err(ConfigError::Invalid {
                name: "COACHLOG_DB_MAX_CONNECTIONS",
                value: "0".to_string(),
                reason: "must be at least 1",
            });
        }

        let jwt_secret =
            var("COACHLOG_JWT_SECRET").ok_or(ConfigError::Missing("COACHLOG_JWT_SECRET"))?;
        let jwt_audience =
            var("COACHLOG_JWT_AUDIENCE").unwrap_or_else(|| "authenticated".to_string());
        let port = parse_or("PORT", var("PORT"), 3000u16)?;
        let cors_origins = var("COACHLOG_CORS_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            store,
            database_url,
            db_max_connections,
            jwt_secret,
            jwt_audience,
            port,
            cors_origins,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
            reason: "expected a positive integer",
        }),
    }
}
