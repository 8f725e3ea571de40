//! Runtime configuration, read from the environment (and `.env` via dotenvy).

use std::{env, fmt::Display, str::FromStr};

use anyhow::{Context, Result};
use tracing::{info, warn};

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// SQLite database file.
    pub database_url: String,
    pub db_pool_size: u32,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    /// `*` allows any origin.
    pub cors_origin: String,
    /// Notifications buffered before new ones are dropped.
    pub notify_queue_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set, using the development secret");
            DEV_JWT_SECRET.to_string()
        });

        Ok(Self {
            port: load("PORT", "8080")?,
            database_url: load("DATABASE_URL", "askboard.db")?,
            db_pool_size: load("DB_POOL_SIZE", "8")?,
            jwt_secret,
            token_ttl_days: load("TOKEN_TTL_DAYS", "7")?,
            cors_origin: load("CORS_ORIGIN", "*")?,
            notify_queue_capacity: load("NOTIFY_QUEUE_CAPACITY", "256")?,
        })
    }

    /// Settings for tests: in-memory friendly, fixed secret.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            database_url: ":memory:".to_string(),
            db_pool_size: 1,
            jwt_secret: "test-secret".to_string(),
            token_ttl_days: 7,
            cors_origin: "*".to_string(),
            notify_queue_capacity: 16,
        }
    }
}

fn load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e: T::Err| anyhow::anyhow!("{e}"))
        .with_context(|| format!("{key} has an invalid value: {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_falls_back_to_default() {
        let port: u16 = load("ASKBOARD_TEST_UNSET_PORT", "8080").unwrap();
        assert_eq!(port, 8080);
    }

    #[test]
    fn load_rejects_garbage() {
        env::set_var("ASKBOARD_TEST_BAD_PORT", "eighty");
        let err = load::<u16>("ASKBOARD_TEST_BAD_PORT", "8080").unwrap_err();
        assert!(err.to_string().contains("ASKBOARD_TEST_BAD_PORT"));
    }
}
