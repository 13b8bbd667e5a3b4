use std::time::Duration;

use almox_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Opens a pool with WAL, a busy timeout and foreign keys enforced on every connection.
/// File databases are created on first use.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let url = normalize_url(database_url);
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
}

pub async fn ping(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await.map(|_| ())
}

fn normalize_url(database_url: &str) -> String {
    let url = database_url.trim();
    if url == ":memory:" {
        return "sqlite::memory:".to_string();
    }
    if url.starts_with("sqlite://") && !url.contains('?') && !url.contains(":memory:") {
        return format!("{url}?mode=rwc");
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::{connect_with_settings, normalize_url, ping};

    #[test]
    fn file_urls_are_opened_in_create_mode() {
        assert_eq!(normalize_url("sqlite://almox.db"), "sqlite://almox.db?mode=rwc");
        assert_eq!(normalize_url("sqlite://almox.db?mode=ro"), "sqlite://almox.db?mode=ro");
        assert_eq!(normalize_url(":memory:"), "sqlite::memory:");
        assert_eq!(normalize_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[tokio::test]
    async fn in_memory_pool_answers_ping() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        ping(&pool).await.expect("ping");

        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("read pragma");
        assert_eq!(foreign_keys, 1);
    }
}
