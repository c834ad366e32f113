//! Plan finalizer.
//!
//! Closes voting on a plan: tallies every undecided event, persists the
//! winners, and moves the plan to `finalized` or `finalization_failed`.
//! All of this happens in one transaction holding the plan's advisory lock,
//! so the finalizer, the ballot path, and the downstream builders never
//! interleave on the same plan.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

use prixfixe_db::models::MealPlanStatus;
use prixfixe_db::queries::{households, locks, meal_plans};

use crate::error::{EngineError, EngineResult};
use crate::events::{DomainEvent, EventBus};
use crate::voting::{TallyOutcome, tally_event};

/// Take the plan's transaction-scoped advisory lock.
///
/// The lock is released when the surrounding transaction commits or rolls
/// back.
pub async fn lock_plan(conn: &mut PgConnection, plan_id: &str) -> EngineResult<()> {
    locks::advisory_xact_lock(conn, &plan_lock_key(plan_id)).await?;
    Ok(())
}

fn plan_lock_key(plan_id: &str) -> String {
    format!("meal_plan:{plan_id}")
}

/// Result of finalizing a single plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    Finalized,
    FinalizationFailed { reason: String },
    AlreadyTerminal { status: MealPlanStatus },
    /// Members are still missing ballots and the deadline has not passed.
    NotReady,
}

impl FinalizeOutcome {
    /// Whether this run moved the plan out of `awaiting_votes`.
    pub fn transitioned(&self) -> bool {
        matches!(self, Self::Finalized | Self::FinalizationFailed { .. })
    }
}

impl fmt::Display for FinalizeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finalized => f.write_str("finalized"),
            Self::FinalizationFailed { .. } => f.write_str("finalization_failed"),
            Self::AlreadyTerminal { .. } => f.write_str("already_terminal"),
            Self::NotReady => f.write_str("not_ready"),
        }
    }
}

/// Finalize one plan if it is ready.
///
/// A plan is ready once its deadline has passed, or once the household has
/// at least one member and every member has a ballot on every undecided
/// event. Events whose winner was already chosen keep it. Exactly one domain
/// event is published when this call performs the transition.
pub async fn finalize_meal_plan(
    pool: &PgPool,
    events: &EventBus,
    plan_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<FinalizeOutcome> {
    let mut tx = pool.begin().await?;
    let outcome = finalize_locked(&mut *tx, plan_id, now).await?;
    tx.commit().await?;

    match &outcome {
        FinalizeOutcome::Finalized => {
            info!(plan_id, "meal plan finalized");
            events.publish(DomainEvent::PlanFinalized {
                plan_id: plan_id.to_owned(),
                outcome: MealPlanStatus::Finalized,
            });
        }
        FinalizeOutcome::FinalizationFailed { reason } => {
            info!(plan_id, %reason, "meal plan finalization failed");
            events.publish(DomainEvent::PlanFinalizationFailed {
                plan_id: plan_id.to_owned(),
                reason: reason.clone(),
            });
        }
        FinalizeOutcome::AlreadyTerminal { status } => {
            debug!(plan_id, %status, "meal plan already terminal");
        }
        FinalizeOutcome::NotReady => {
            debug!(plan_id, "meal plan not ready for finalization");
        }
    }

    Ok(outcome)
}

async fn finalize_locked(
    conn: &mut PgConnection,
    plan_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<FinalizeOutcome> {
    lock_plan(&mut *conn, plan_id).await?;

    let plan = meal_plans::get_meal_plan(&mut *conn, plan_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("meal plan {plan_id}")))?;
    if plan.status.is_terminal() {
        return Ok(FinalizeOutcome::AlreadyTerminal {
            status: plan.status,
        });
    }

    let members: HashSet<String> = households::member_ids(&mut *conn, &plan.household_id)
        .await?
        .into_iter()
        .collect();

    if now < plan.voting_deadline {
        let fully_voted = !members.is_empty()
            && meal_plans::missing_votes(&mut *conn, plan_id).await?.is_empty();
        if !fully_voted {
            return Ok(FinalizeOutcome::NotReady);
        }
    }

    let mut failures = Vec::new();
    for event in meal_plans::events_for_plan(&mut *conn, plan_id).await? {
        let options = meal_plans::options_for_event(&mut *conn, &event.id).await?;
        if let Some(chosen) = options.iter().find(|o| o.chosen) {
            debug!(plan_id, event_id = %event.id, option_id = %chosen.id, "event already decided");
            continue;
        }

        let outcome = tally_event(&mut *conn, &event.id, &members).await?;
        meal_plans::set_event_explanation(&mut *conn, &event.id, &outcome.explanation()).await?;
        match &outcome {
            TallyOutcome::Winner {
                option_id,
                tiebroken,
                ..
            } => {
                meal_plans::option_set_chosen(&mut *conn, option_id, *tiebroken).await?;
                debug!(plan_id, event_id = %event.id, %option_id, tiebroken, "event decided");
            }
            TallyOutcome::NoWinner { reason } => {
                failures.push(format!("no winner for event {}: {reason}", event.id));
            }
        }
    }

    let (status, explanation) = if failures.is_empty() {
        (MealPlanStatus::Finalized, String::new())
    } else {
        (MealPlanStatus::FinalizationFailed, failures.join("; "))
    };

    if !meal_plans::set_status(&mut *conn, plan_id, status, &explanation).await? {
        // The lock makes this unreachable unless the row vanished mid-run.
        return Err(EngineError::Conflict(format!(
            "meal plan {plan_id} changed status during finalization"
        )));
    }

    Ok(if failures.is_empty() {
        FinalizeOutcome::Finalized
    } else {
        FinalizeOutcome::FinalizationFailed {
            reason: explanation,
        }
    })
}
