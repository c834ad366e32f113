//! Meal-plan task state machine.
//!
//! Validates and executes status transitions for generated prep tasks,
//! enforcing the allowed transition graph, optimistic locking, and the
//! `completed_at` timestamp.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;

use prixfixe_db::models::{MealPlanTask, MealPlanTaskStatus};
use prixfixe_db::queries::meal_plan_tasks as db;

use crate::error::{EngineError, EngineResult};

/// The meal-plan task state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// unfinished  -> in_progress | finished | cancelled
/// in_progress -> finished | cancelled | unfinished
/// cancelled   -> unfinished
/// ```
pub struct MealPlanTaskStateMachine;

impl MealPlanTaskStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge
    /// in the state graph.
    pub fn is_valid_transition(from: MealPlanTaskStatus, to: MealPlanTaskStatus) -> bool {
        use MealPlanTaskStatus::*;
        matches!(
            (from, to),
            (Unfinished, InProgress)
                | (Unfinished, Finished)
                | (Unfinished, Cancelled)
                | (InProgress, Finished)
                | (InProgress, Cancelled)
                | (InProgress, Unfinished)
                | (Cancelled, Unfinished)
        )
    }

    /// `completed_at` after moving into `to`: set on entering `finished`,
    /// cleared otherwise.
    pub fn completed_at(to: MealPlanTaskStatus, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (to == MealPlanTaskStatus::Finished).then_some(now)
    }

    /// Execute a state transition with optimistic locking.
    ///
    /// Returns `conflict` if the edge is not allowed or the stored status no
    /// longer matches `from`, and `not_found` if the task does not exist.
    pub async fn transition(
        pool: &PgPool,
        task_id: &str,
        from: MealPlanTaskStatus,
        to: MealPlanTaskStatus,
        explanation: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<MealPlanTask> {
        if !Self::is_valid_transition(from, to) {
            return Err(EngineError::Conflict(format!(
                "invalid state transition: {from} -> {to} for task {task_id}"
            )));
        }

        let rows = db::transition_status(
            pool,
            task_id,
            from,
            to,
            explanation,
            Self::completed_at(to, now),
        )
        .await?;

        let task = db::get_task(pool, task_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("meal plan task {task_id}")))?;

        if rows == 0 {
            return Err(EngineError::Conflict(format!(
                "optimistic lock failed: task {task_id} has status {}, expected {from}",
                task.status
            )));
        }

        info!(task_id, %from, %to, "meal plan task transitioned");
        Ok(task)
    }
}

/// Move a task from `from` to `to`, recording `explanation`.
pub async fn change_task_status(
    pool: &PgPool,
    task_id: &str,
    from: MealPlanTaskStatus,
    to: MealPlanTaskStatus,
    explanation: &str,
) -> EngineResult<MealPlanTask> {
    MealPlanTaskStateMachine::transition(pool, task_id, from, to, explanation, Utc::now()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use MealPlanTaskStatus::*;

    const ALL: [MealPlanTaskStatus; 4] = [Unfinished, InProgress, Cancelled, Finished];

    #[test]
    fn allowed_edges() {
        let allowed = [
            (Unfinished, InProgress),
            (Unfinished, Finished),
            (Unfinished, Cancelled),
            (InProgress, Finished),
            (InProgress, Cancelled),
            (InProgress, Unfinished),
            (Cancelled, Unfinished),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    MealPlanTaskStateMachine::is_valid_transition(from, to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn finished_is_terminal() {
        for to in ALL {
            assert!(!MealPlanTaskStateMachine::is_valid_transition(Finished, to));
        }
    }

    #[test]
    fn completed_at_only_when_finished() {
        let now = Utc::now();
        assert_eq!(MealPlanTaskStateMachine::completed_at(Finished, now), Some(now));
        assert_eq!(MealPlanTaskStateMachine::completed_at(Cancelled, now), None);
        assert_eq!(MealPlanTaskStateMachine::completed_at(Unfinished, now), None);
    }
}
