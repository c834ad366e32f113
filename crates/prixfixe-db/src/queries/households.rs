//! Database query functions for `households` and `household_memberships`.

use anyhow::{Context, Result};
use sqlx::PgExecutor;

use crate::models::{Household, HouseholdMembership, MemberRole};

/// Insert a household with a caller-supplied id.
pub async fn insert_household<'e>(
    executor: impl PgExecutor<'e>,
    id: &str,
    name: &str,
) -> Result<Household> {
    let household = sqlx::query_as::<_, Household>(
        "INSERT INTO households (id, name) VALUES ($1, $2) RETURNING *",
    )
    .bind(id)
    .bind(name)
    .fetch_one(executor)
    .await
    .context("failed to insert household")?;

    Ok(household)
}

/// Fetch a household by id.
pub async fn get_household<'e>(
    executor: impl PgExecutor<'e>,
    id: &str,
) -> Result<Option<Household>> {
    let household = sqlx::query_as::<_, Household>("SELECT * FROM households WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch household")?;

    Ok(household)
}

/// Add a member, or update the role of an existing one.
pub async fn add_member<'e>(
    executor: impl PgExecutor<'e>,
    household_id: &str,
    user_id: &str,
    role: MemberRole,
) -> Result<HouseholdMembership> {
    let membership = sqlx::query_as::<_, HouseholdMembership>(
        "INSERT INTO household_memberships (household_id, user_id, role) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (household_id, user_id) DO UPDATE SET role = EXCLUDED.role \
         RETURNING *",
    )
    .bind(household_id)
    .bind(user_id)
    .bind(role)
    .fetch_one(executor)
    .await
    .context("failed to add household member")?;

    Ok(membership)
}

/// Remove a member. Returns `false` if the user was not a member.
pub async fn remove_member<'e>(
    executor: impl PgExecutor<'e>,
    household_id: &str,
    user_id: &str,
) -> Result<bool> {
    let result =
        sqlx::query("DELETE FROM household_memberships WHERE household_id = $1 AND user_id = $2")
            .bind(household_id)
            .bind(user_id)
            .execute(executor)
            .await
            .context("failed to remove household member")?;

    Ok(result.rows_affected() > 0)
}

/// List memberships ordered by user id.
pub async fn list_members<'e>(
    executor: impl PgExecutor<'e>,
    household_id: &str,
) -> Result<Vec<HouseholdMembership>> {
    let members = sqlx::query_as::<_, HouseholdMembership>(
        "SELECT * FROM household_memberships WHERE household_id = $1 ORDER BY user_id",
    )
    .bind(household_id)
    .fetch_all(executor)
    .await
    .context("failed to list household members")?;

    Ok(members)
}

/// Current member user ids, ordered.
pub async fn member_ids<'e>(
    executor: impl PgExecutor<'e>,
    household_id: &str,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT user_id FROM household_memberships WHERE household_id = $1 ORDER BY user_id",
    )
    .bind(household_id)
    .fetch_all(executor)
    .await
    .context("failed to list household member ids")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Whether `user_id` currently belongs to `household_id`.
pub async fn is_member<'e>(
    executor: impl PgExecutor<'e>,
    household_id: &str,
    user_id: &str,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM household_memberships \
         WHERE household_id = $1 AND user_id = $2)",
    )
    .bind(household_id)
    .bind(user_id)
    .fetch_one(executor)
    .await
    .context("failed to check household membership")?;

    Ok(exists)
}
