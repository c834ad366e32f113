//! Transaction-scoped advisory locks keyed by a string.
//!
//! The key is hashed with `hashtextextended` into the 64-bit advisory lock
//! space. The lock is released when the surrounding transaction commits or
//! rolls back, so these must be called on a connection inside a transaction.

use anyhow::{Context, Result};
use sqlx::PgConnection;

/// Block until the advisory lock for `key` is held by this transaction.
pub async fn advisory_xact_lock(conn: &mut PgConnection, key: &str) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key)
        .execute(conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock for {key}"))?;

    Ok(())
}
