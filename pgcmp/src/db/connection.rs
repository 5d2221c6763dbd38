//! Database connection handling
//!
//! This module provides functionality to establish and manage database connections.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

static URL_PASSWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<prefix>[A-Za-z][A-Za-z0-9+.-]*://[^:@/]*):[^@/]*@").unwrap());
static PARAM_PASSWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bpassword=[^&\s]*").unwrap());

/// A pooled connection to one of the compared databases
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
    label: String,
}

impl DatabaseConnection {
    /// Connect to the database at `url` using the shared pool settings
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self> {
        let label = redact_url(url);
        tracing::debug!(database = %label, pool_size = config.pool_size, "Connecting");

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.max(1))
            .acquire_timeout(config.connect_timeout())
            .connect(url)
            .await
            .map_err(|e| Error::ConnectionError(format!("{}: {}", label, e)))?;

        tracing::info!(database = %label, "Connected");
        Ok(Self { pool, label })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, label: &str) -> Self {
        Self {
            pool,
            label: redact_url(label),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The connection URL with any password masked
    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Mask passwords in a connection URL or keyword/value connection string
pub fn redact_url(url: &str) -> String {
    let masked = URL_PASSWORD.replace(url, "$prefix:****@");
    PARAM_PASSWORD.replace_all(&masked, "password=****").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("postgres://app:s3cret@db:5432/shop", "postgres://app:****@db:5432/shop")]
    #[case("postgresql://app@db/shop", "postgresql://app@db/shop")]
    #[case("postgres://db/shop?password=x&sslmode=require", "postgres://db/shop?password=****&sslmode=require")]
    #[case("host=db user=app password=hunter2 dbname=shop", "host=db user=app password=**** dbname=shop")]
    fn passwords_are_masked(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(redact_url(url), expected);
    }
}
