//! Settings persistence for pitchline-cg

use sqlx::SqlitePool;

use pitchline_common::Result;

const EVALUATOR_BASE_URL_KEY: &str = "cg_evaluator_base_url";

/// Get a setting value by key
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value)
}

/// Set a setting value by key (upsert)
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Get the configured evaluator base URL, if set in the database
pub async fn get_evaluator_base_url(pool: &SqlitePool) -> Result<Option<String>> {
    get_setting(pool, EVALUATOR_BASE_URL_KEY).await
}

/// Persist the evaluator base URL
pub async fn set_evaluator_base_url(pool: &SqlitePool, url: &str) -> Result<()> {
    set_setting(pool, EVALUATOR_BASE_URL_KEY, url).await
}
