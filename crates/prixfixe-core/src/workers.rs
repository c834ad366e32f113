//! Worker dispatch.
//!
//! Three workers drive the plan lifecycle: finalization of due plans, prep
//! task creation, and grocery list initialization. Every invocation runs
//! under a time budget; each plan is processed in its own transaction, so a
//! plan interrupted by the budget or by cancellation rolls back while plans
//! already completed stay committed.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use sqlx::PgPool;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use prixfixe_db::queries::meal_plans;

use crate::catalog::CatalogHandle;
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::finalize::finalize_meal_plan;
use crate::grocery::initialize_grocery_list;
use crate::retry::RetryPolicy;
use crate::schedule::create_tasks_for_plan;

/// Households processed concurrently by [`Workers::run_cycle`].
pub const HOUSEHOLD_CONCURRENCY: usize = 4;

/// Plan transactions open at once during [`Workers::run_cycle`]: both
/// builders of every household in flight.
#[allow(clippy::cast_possible_truncation)]
pub const MAX_PLANS_IN_FLIGHT: u32 = (HOUSEHOLD_CONCURRENCY * 2) as u32;

/// Limits applied to each worker invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Wall time allowed for one invocation.
    pub budget: Duration,
    /// Maximum number of due plans picked up by one finalizer run.
    pub batch_limit: i64,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(30),
            batch_limit: 100,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a `FinalizeMealPlans` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinalizeReport {
    /// Plans moved out of `awaiting_votes` by this run.
    pub count: usize,
    /// Plans left for a later run after a failure, timeout, or cancellation.
    pub skipped: Vec<String>,
    pub timed_out: bool,
}

/// Result of a per-household worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HouseholdReport {
    /// True when every eligible plan was processed.
    pub success: bool,
    pub processed: usize,
    pub skipped: Vec<String>,
    pub timed_out: bool,
}

impl HouseholdReport {
    fn finish(mut self) -> Self {
        self.success = self.skipped.is_empty();
        self
    }
}

enum PlanRun<T> {
    Done(T),
    Failed(EngineError),
    TimedOut,
    Cancelled,
}

/// Shared state the workers run against.
#[derive(Debug, Clone)]
pub struct Workers {
    pub pool: PgPool,
    pub catalog: CatalogHandle,
    pub events: EventBus,
    pub config: WorkerConfig,
}

impl Workers {
    pub fn new(pool: PgPool, catalog: CatalogHandle, events: EventBus, config: WorkerConfig) -> Self {
        Self {
            pool,
            catalog,
            events,
            config,
        }
    }

    /// Rebuild the catalog snapshot from the database.
    pub async fn reload_catalog(&self) -> EngineResult<()> {
        self.catalog.reload(&self.pool).await
    }

    /// Finalize every due plan, oldest deadline first.
    pub async fn finalize_meal_plans(&self, cancel: &CancellationToken) -> EngineResult<FinalizeReport> {
        let deadline = Instant::now() + self.config.budget;
        let now = Utc::now();
        let due = meal_plans::list_due(&self.pool, now, self.config.batch_limit).await?;

        let mut report = FinalizeReport::default();
        for plan_id in due {
            if report.timed_out || cancel.is_cancelled() {
                report.skipped.push(plan_id);
                continue;
            }
            let run = self
                .run_plan("finalize_meal_plan", deadline, cancel, || {
                    finalize_meal_plan(&self.pool, &self.events, &plan_id, now)
                })
                .await;
            match run {
                PlanRun::Done(outcome) => {
                    if outcome.transitioned() {
                        report.count += 1;
                    }
                }
                PlanRun::Failed(err) => {
                    warn!(plan_id = %plan_id, kind = err.kind(), error = %err, "skipping meal plan");
                    report.skipped.push(plan_id);
                }
                PlanRun::TimedOut => {
                    warn!(plan_id = %plan_id, "worker budget exceeded during finalization");
                    report.timed_out = true;
                    report.skipped.push(plan_id);
                }
                PlanRun::Cancelled => report.skipped.push(plan_id),
            }
        }

        info!(
            count = report.count,
            skipped = report.skipped.len(),
            timed_out = report.timed_out,
            "finalize worker finished"
        );
        Ok(report)
    }

    /// Generate prep tasks for the household's finalized plans that have none.
    pub async fn create_meal_plan_tasks(
        &self,
        household_id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<HouseholdReport> {
        let plans = meal_plans::list_finalized_without_tasks(&self.pool, household_id).await?;
        let ids = plans.into_iter().map(|p| p.id).collect();
        let catalog = self.catalog.snapshot();
        let report = self
            .per_plan("create_meal_plan_tasks", ids, cancel, |plan_id| {
                let catalog = catalog.clone();
                async move {
                    create_tasks_for_plan(&self.pool, &catalog, &self.events, &plan_id, Utc::now()).await
                }
            })
            .await;
        info!(household_id, success = report.success, processed = report.processed, "task worker finished");
        Ok(report)
    }

    /// Build grocery lists for the household's finalized plans that have none.
    pub async fn initialize_grocery_lists(
        &self,
        household_id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<HouseholdReport> {
        let plans = meal_plans::list_finalized_without_grocery_list(&self.pool, household_id).await?;
        let ids = plans.into_iter().map(|p| p.id).collect();
        let catalog = self.catalog.snapshot();
        let report = self
            .per_plan("initialize_grocery_list", ids, cancel, |plan_id| {
                let catalog = catalog.clone();
                async move {
                    initialize_grocery_list(&self.pool, &catalog, &self.events, &plan_id, Utc::now())
                        .await
                }
            })
            .await;
        info!(household_id, success = report.success, processed = report.processed, "grocery worker finished");
        Ok(report)
    }

    /// One full pass: finalize due plans, then build tasks and grocery lists
    /// for every household with pending finalized plans. Each household runs
    /// its two builders concurrently; up to [`HOUSEHOLD_CONCURRENCY`]
    /// households are in flight at once.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> EngineResult<CycleReport> {
        let finalize = self.finalize_meal_plans(cancel).await?;

        let pending = meal_plans::households_with_pending_work(&self.pool).await?;
        let households: Vec<HouseholdCycle> = stream::iter(pending)
            .map(move |household_id| async move {
                let (tasks, grocery) = tokio::join!(
                    self.create_meal_plan_tasks(&household_id, cancel),
                    self.initialize_grocery_lists(&household_id, cancel),
                );
                Ok::<_, EngineError>(HouseholdCycle {
                    tasks: tasks?,
                    grocery: grocery?,
                    household_id,
                })
            })
            .buffered(HOUSEHOLD_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(CycleReport {
            finalize,
            households,
        })
    }

    async fn per_plan<F, Fut, T>(
        &self,
        label: &str,
        plan_ids: Vec<String>,
        cancel: &CancellationToken,
        op: F,
    ) -> HouseholdReport
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let deadline = Instant::now() + self.config.budget;
        let mut report = HouseholdReport::default();
        for plan_id in plan_ids {
            if report.timed_out || cancel.is_cancelled() {
                report.skipped.push(plan_id);
                continue;
            }
            match self.run_plan(label, deadline, cancel, || op(plan_id.clone())).await {
                PlanRun::Done(_) => report.processed += 1,
                PlanRun::Failed(err) => {
                    warn!(op = label, plan_id = %plan_id, kind = err.kind(), error = %err, "skipping meal plan");
                    report.skipped.push(plan_id);
                }
                PlanRun::TimedOut => {
                    warn!(op = label, plan_id = %plan_id, "worker budget exceeded");
                    report.timed_out = true;
                    report.skipped.push(plan_id);
                }
                PlanRun::Cancelled => report.skipped.push(plan_id),
            }
        }
        report.finish()
    }

    /// Run one plan's work with retries, bounded by `deadline` and `cancel`.
    /// Dropping the losing future rolls back its open transaction.
    async fn run_plan<T, F, Fut>(
        &self,
        label: &str,
        deadline: Instant,
        cancel: &CancellationToken,
        op: F,
    ) -> PlanRun<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => PlanRun::Cancelled,
            _ = tokio::time::sleep_until(deadline) => PlanRun::TimedOut,
            result = self.config.retry.run(label, cancel, op) => match result {
                Ok(value) => PlanRun::Done(value),
                Err(err) => PlanRun::Failed(err),
            },
        }
    }
}

/// Outcome of [`Workers::run_cycle`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub finalize: FinalizeReport,
    pub households: Vec<HouseholdCycle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HouseholdCycle {
    pub household_id: String,
    pub tasks: HouseholdReport,
    pub grocery: HouseholdReport,
}
