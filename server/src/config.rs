//! Configuration management for the server.

use std::env;
use std::path::PathBuf;

/// Default cap on a single media upload.
const DEFAULT_MAX_MEDIA_BYTES: usize = 10 * 1024 * 1024;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Largest number of pooled database connections
    pub db_max_connections: u32,
    /// Shared bearer token; when unset every request is accepted
    pub auth_secret: Option<String>,
    /// Directory holding uploaded photo bytes
    pub media_dir: PathBuf,
    /// Base URL used to build media links handed to clients
    pub public_url: String,
    /// Largest accepted upload body
    pub max_media_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let db_max_connections = match env::var("DB_MAX_CONNECTIONS") {
            Ok(value) => value
                .parse()
                .ok()
                .filter(|n: &u32| *n > 0)
                .ok_or(ConfigError::InvalidPoolSize)?,
            Err(_) => DEFAULT_DB_MAX_CONNECTIONS,
        };

        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        let media_dir = env::var("MEDIA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./media"));

        let public_url = env::var("PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();

        let max_media_bytes = match env::var("MAX_MEDIA_BYTES") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidMediaLimit)?,
            Err(_) => DEFAULT_MAX_MEDIA_BYTES,
        };

        Ok(Self {
            host,
            port,
            database_url,
            db_max_connections,
            auth_secret,
            media_dir,
            public_url,
            max_media_bytes,
        })
    }

    /// Public link for a stored blob.
    pub fn media_url(&self, blob_ref: &str) -> String {
        format!("{}/media/{}", self.public_url, blob_ref)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid MAX_MEDIA_BYTES value")]
    InvalidMediaLimit,

    #[error("DB_MAX_CONNECTIONS must be a positive integer")]
    InvalidPoolSize,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> Config {
        Config {
            host: "0.0.0.0".into(),
            port: 3000,
            database_url: "postgres://localhost/recipebox".into(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            auth_secret: None,
            media_dir: PathBuf::from("./media"),
            public_url: "https://recipes.example.com".into(),
            max_media_bytes: DEFAULT_MAX_MEDIA_BYTES,
        }
    }

    #[test]
    fn media_url_joins_public_url() {
        let config = test_config();
        assert_eq!(
            config.media_url("abc123"),
            "https://recipes.example.com/media/abc123"
        );
    }
}
