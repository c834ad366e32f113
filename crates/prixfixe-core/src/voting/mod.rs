//! Voting engine: ballot submission and per-event tallies.

mod ballot;
mod tally;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::info;

use prixfixe_db::ids::id_from_key;
use prixfixe_db::models::{MealPlanEvent, MealPlanOptionVote};
use prixfixe_db::queries::{households, meal_plans, votes};

use crate::error::{EngineError, EngineResult};
use crate::finalize::lock_plan;

pub use ballot::{BallotEntry, rankings_from_votes, validate_ballot};
pub use tally::{NoWinnerReason, TallyOutcome, tally};

/// Store `voter_id`'s ballot for an event, replacing any earlier one.
///
/// Fails with `not_found` for an unknown plan or event, `conflict` when the
/// plan is no longer awaiting votes or its deadline has passed, and
/// `invalid_input` for a non-member voter or a malformed ballot. Vote ids are
/// derived from `(option, voter)`, so submitting the same ballot twice leaves
/// the stored rows unchanged.
pub async fn cast_ballot(
    pool: &PgPool,
    plan_id: &str,
    event_id: &str,
    voter_id: &str,
    entries: &[BallotEntry],
    now: DateTime<Utc>,
) -> EngineResult<Vec<MealPlanOptionVote>> {
    let mut tx = pool.begin().await?;

    let event = meal_plans::get_event(&mut *tx, event_id)
        .await?
        .filter(|e| e.meal_plan_id == plan_id)
        .ok_or_else(|| EngineError::not_found(format!("event {event_id} of meal plan {plan_id}")))?;

    lock_plan(&mut *tx, plan_id).await?;

    let plan = meal_plans::get_meal_plan(&mut *tx, plan_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("meal plan {plan_id}")))?;
    if plan.status.is_terminal() {
        return Err(EngineError::Conflict(format!(
            "meal plan {plan_id} is {} and no longer accepts ballots",
            plan.status
        )));
    }
    if now >= plan.voting_deadline {
        return Err(EngineError::Conflict(format!(
            "voting for meal plan {plan_id} closed at {}",
            plan.voting_deadline
        )));
    }
    if !households::is_member(&mut *tx, &plan.household_id, voter_id).await? {
        return Err(EngineError::InvalidInput(format!(
            "voter {voter_id} is not a member of household {}",
            plan.household_id
        )));
    }

    let option_ids: Vec<String> = meal_plans::options_for_event(&mut *tx, event_id)
        .await?
        .into_iter()
        .map(|o| o.id)
        .collect();
    validate_ballot(entries, &option_ids)?;

    let rows = ballot_rows(&event, voter_id, entries, now);
    votes::replace_ballot(&mut *tx, event_id, voter_id, &rows).await?;
    tx.commit().await?;

    info!(plan_id, event_id, voter_id, entries = rows.len(), "ballot recorded");
    Ok(rows)
}

fn ballot_rows(
    event: &MealPlanEvent,
    voter_id: &str,
    entries: &[BallotEntry],
    now: DateTime<Utc>,
) -> Vec<MealPlanOptionVote> {
    entries
        .iter()
        .map(|e| MealPlanOptionVote {
            id: id_from_key(&["vote", &e.option_id, voter_id]),
            option_id: e.option_id.clone(),
            event_id: event.id.clone(),
            voter_id: voter_id.to_owned(),
            rank: if e.abstain { 0 } else { i16::from(e.rank) },
            abstain: e.abstain,
            created_at: now,
        })
        .collect()
}

/// Tally one event using the ballots of current household members only.
pub async fn tally_event(
    conn: &mut PgConnection,
    event_id: &str,
    members: &HashSet<String>,
) -> EngineResult<TallyOutcome> {
    let option_ids: Vec<String> = meal_plans::options_for_event(&mut *conn, event_id)
        .await?
        .into_iter()
        .map(|o| o.id)
        .collect();
    let votes = votes::votes_for_event(&mut *conn, event_id).await?;
    let rankings = rankings_from_votes(&votes, members);
    Ok(tally(&option_ids, &rankings))
}
