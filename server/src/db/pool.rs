//! Connection pool for the recipe database.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;

/// Type alias for the database pool.
pub type Pool = PgPool;

/// How long a handler waits for a free connection before failing.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool settings derived from the server config.
pub fn pool_options(config: &Config) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
}

/// Connect using the configured URL and pool size.
pub async fn create_pool(config: &Config) -> Result<Pool, sqlx::Error> {
    tracing::info!(
        max_connections = config.db_max_connections,
        "Connecting to database..."
    );
    pool_options(config).connect(&config.database_url).await
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;

    #[test]
    fn pool_follows_config() {
        let mut config = test_config();
        config.db_max_connections = 4;

        let options = pool_options(&config);

        assert_eq!(options.get_max_connections(), 4);
        assert_eq!(options.get_acquire_timeout(), ACQUIRE_TIMEOUT);
    }
}
