//! Database query functions for `meal_plan_option_votes`.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgExecutor};

use crate::models::MealPlanOptionVote;

/// Replace every vote `voter_id` has cast on `event_id` with `votes`.
///
/// Must run inside a transaction so readers never see a half-written ballot.
pub async fn replace_ballot(
    conn: &mut PgConnection,
    event_id: &str,
    voter_id: &str,
    votes: &[MealPlanOptionVote],
) -> Result<()> {
    sqlx::query("DELETE FROM meal_plan_option_votes WHERE event_id = $1 AND voter_id = $2")
        .bind(event_id)
        .bind(voter_id)
        .execute(&mut *conn)
        .await
        .context("failed to delete previous ballot")?;

    for v in votes {
        sqlx::query(
            "INSERT INTO meal_plan_option_votes \
             (id, option_id, event_id, voter_id, rank, abstain, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&v.id)
        .bind(&v.option_id)
        .bind(&v.event_id)
        .bind(&v.voter_id)
        .bind(v.rank)
        .bind(v.abstain)
        .bind(v.created_at)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert vote for option {}", v.option_id))?;
    }

    Ok(())
}

/// All votes cast on an event, grouped by voter and ordered by rank.
pub async fn votes_for_event<'e>(
    executor: impl PgExecutor<'e>,
    event_id: &str,
) -> Result<Vec<MealPlanOptionVote>> {
    let votes = sqlx::query_as::<_, MealPlanOptionVote>(
        "SELECT * FROM meal_plan_option_votes WHERE event_id = $1 \
         ORDER BY voter_id, abstain, rank, option_id",
    )
    .bind(event_id)
    .fetch_all(executor)
    .await
    .context("failed to list votes for event")?;

    Ok(votes)
}

/// One voter's ballot on an event.
pub async fn ballot_for_voter<'e>(
    executor: impl PgExecutor<'e>,
    event_id: &str,
    voter_id: &str,
) -> Result<Vec<MealPlanOptionVote>> {
    let votes = sqlx::query_as::<_, MealPlanOptionVote>(
        "SELECT * FROM meal_plan_option_votes WHERE event_id = $1 AND voter_id = $2 \
         ORDER BY abstain, rank, option_id",
    )
    .bind(event_id)
    .bind(voter_id)
    .fetch_all(executor)
    .await
    .context("failed to fetch ballot")?;

    Ok(votes)
}
