use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct InvoicingConfig {
    pub common: core_config::Config,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    /// Demo fallback for every request, regardless of per-request flags.
    pub demo_mode: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<Secret<String>>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl InvoicingConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common = core_config::Config::load()?;

        let is_prod = common.is_production()
            || env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let store: StoreBackend = get_env("STORE_BACKEND", Some("postgres"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let url = match store {
            StoreBackend::Postgres => Some(get_env("DATABASE_URL", None, is_prod)?),
            StoreBackend::Memory => env::var("DATABASE_URL").ok(),
        };

        Ok(InvoicingConfig {
            common,
            store,
            database: DatabaseConfig {
                url: url.map(Secret::new),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 1)?,
                run_migrations: parse_env("DATABASE_RUN_MIGRATIONS", true)?,
            },
            demo_mode: env_flag("DEMO_MODE") || env_flag("INVOICING_DEMO_MODE"),
        })
    }

    /// Configuration for an in-memory instance, used by tests and local runs.
    pub fn in_memory() -> Self {
        InvoicingConfig {
            common: core_config::Config::default(),
            store: StoreBackend::Memory,
            database: DatabaseConfig {
                url: None,
                max_connections: 1,
                min_connections: 0,
                run_migrations: false,
            },
            demo_mode: false,
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).is_ok_and(|val| val.eq_ignore_ascii_case("true"))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(val) => val.parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, val))
        }),
        Err(_) => Ok(default),
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    const KEYS: [&str; 7] = [
        "STORE_BACKEND",
        "DATABASE_URL",
        "DATABASE_MAX_CONNECTIONS",
        "DATABASE_RUN_MIGRATIONS",
        "DEMO_MODE",
        "INVOICING_DEMO_MODE",
        "ENVIRONMENT",
    ];

    fn clear() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn memory_backend_needs_no_database_url() {
        clear();
        env::set_var("STORE_BACKEND", "memory");

        let config = InvoicingConfig::load().unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert!(config.database.url.is_none());
        assert!(!config.demo_mode);
        clear();
    }

    #[test]
    #[serial]
    fn postgres_backend_requires_database_url() {
        clear();
        assert!(InvoicingConfig::load().is_err());

        env::set_var("DATABASE_URL", "postgres://localhost/invoicing");
        env::set_var("DATABASE_MAX_CONNECTIONS", "4");
        let config = InvoicingConfig::load().unwrap();
        assert_eq!(config.store, StoreBackend::Postgres);
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(
            config.database.url.unwrap().expose_secret(),
            "postgres://localhost/invoicing"
        );
        clear();
    }

    #[test]
    #[serial]
    fn either_demo_variable_enables_demo_mode() {
        clear();
        env::set_var("STORE_BACKEND", "memory");
        env::set_var("INVOICING_DEMO_MODE", "TRUE");
        assert!(InvoicingConfig::load().unwrap().demo_mode);

        env::remove_var("INVOICING_DEMO_MODE");
        env::set_var("DEMO_MODE", "true");
        assert!(InvoicingConfig::load().unwrap().demo_mode);
        clear();
    }

    #[test]
    #[serial]
    fn rejects_unknown_backend_and_bad_numbers() {
        clear();
        env::set_var("STORE_BACKEND", "sqlite");
        assert!(InvoicingConfig::load().is_err());

        env::set_var("STORE_BACKEND", "memory");
        env::set_var("DATABASE_MAX_CONNECTIONS", "many");
        assert!(InvoicingConfig::load().is_err());
        clear();
    }
}
