use std::{env, fmt::Display, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

const DEV_JWT_SECRET: &str = "dev-secret-change-me";
const DEFAULT_MSU_API_URL: &str = "https://openapi.msu.io/v1beta";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {key} value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub msu_api_key: Option<String>,
    pub msu_api_url: String,
    pub cors_origins: Vec<String>,
    pub assets_dir: String,
}

impl Config {
    /// Reads the process environment. Call after `dotenvy::dotenv()`.
    pub fn load() -> Result<Self, ConfigError> {
        let jwt_secret = var("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set, using the development secret");
            DEV_JWT_SECRET.to_string()
        });

        let cors_origins = try_load::<String>(
            "CORS_ORIGINS",
            "https://forum.example.com,http://localhost:3000",
        )?
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect();

        Ok(Self {
            port: try_load("APP_PORT", "3000")?,
            database_url: try_load("DATABASE_URL", "forum.db")?,
            jwt_secret,
            msu_api_key: var("MSU_API_KEY"),
            msu_api_url: try_load("MSU_API_URL", DEFAULT_MSU_API_URL)?,
            cors_origins,
            assets_dir: try_load("ASSETS_DIR", "./assets")?,
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let port: u16 = try_load("FORUM_TEST_UNSET_PORT", "3000").unwrap();
        assert_eq!(port, 3000);
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = try_load::<u16>("FORUM_TEST_UNSET_PORT", "not-a-port").unwrap_err();
        assert!(err.to_string().contains("FORUM_TEST_UNSET_PORT"));
    }
}
