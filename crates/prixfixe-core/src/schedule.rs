//! Prep-task scheduler.
//!
//! Turns the prep tasks of every chosen recipe into `MealPlanTask` rows.
//! Each task gets a feasible window before the event starts rather than a
//! concrete start time.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};

use prixfixe_db::ids::id_from_key;
use prixfixe_db::models::{MealPlanStatus, MealPlanTask, MealPlanTaskStatus, RecipePrepTask};
use prixfixe_db::queries::{meal_plan_tasks, meal_plans, meals};

use crate::catalog::Catalog;
use crate::error::{EngineError, EngineResult};
use crate::events::{DomainEvent, EventBus};
use crate::finalize::lock_plan;
use crate::recipe::{RecipeGraph, load_recipe_closure};

/// The recipes reachable from one chosen option.
#[derive(Debug)]
pub struct ScheduledOption<'a> {
    pub option_id: &'a str,
    /// Start of the event the option was chosen for.
    pub cook_at: DateTime<Utc>,
    pub recipes: Vec<&'a RecipeGraph>,
}

struct Planned {
    task: MealPlanTask,
    cook_at: DateTime<Utc>,
    first_step: i32,
    name: String,
}

/// Compute the task rows for a plan without touching the database.
///
/// Output is in persisted order with `sequence` assigned. A prep task that
/// appears in more than one component of the same option is emitted once.
pub fn plan_tasks(
    plan_id: &str,
    options: &[ScheduledOption<'_>],
    now: DateTime<Utc>,
) -> Vec<MealPlanTask> {
    let mut seen = HashSet::new();
    let mut planned = Vec::new();

    for option in options {
        for graph in &option.recipes {
            let subsumed = subsumed_tasks(graph);
            for task in graph.prep_tasks() {
                if subsumed.contains_key(task.id.as_str()) {
                    continue;
                }
                let id = id_from_key(&["task", plan_id, option.option_id, &task.id]);
                if !seen.insert(id.clone()) {
                    continue;
                }

                let absorbed: Vec<&str> = subsumed
                    .iter()
                    .filter(|(_, owner)| **owner == task.id)
                    .map(|(victim, _)| graph_task_name(graph, victim))
                    .collect();
                let (window_starts_at, window_ends_at) = window(task, option.cook_at);
                let steps = graph.task_step_indices(&task.id);

                planned.push(Planned {
                    first_step: steps.first().copied().unwrap_or(i32::MAX),
                    name: task.name.clone(),
                    cook_at: option.cook_at,
                    task: MealPlanTask {
                        id,
                        meal_plan_id: plan_id.to_owned(),
                        meal_plan_option_id: option.option_id.to_owned(),
                        recipe_prep_task_id: task.id.clone(),
                        sequence: 0,
                        status: MealPlanTaskStatus::Unfinished,
                        status_explanation: String::new(),
                        creation_explanation: explain(graph, task, window_starts_at, window_ends_at, &absorbed),
                        window_starts_at,
                        window_ends_at,
                        created_at: now,
                        completed_at: None,
                    },
                });
            }
        }
    }

    planned.sort_by(|a, b| {
        (a.cook_at, a.first_step, &a.name, &a.task.recipe_prep_task_id, &a.task.meal_plan_option_id).cmp(&(
            b.cook_at,
            b.first_step,
            &b.name,
            &b.task.recipe_prep_task_id,
            &b.task.meal_plan_option_id,
        ))
    });

    planned
        .into_iter()
        .enumerate()
        .map(|(i, p)| MealPlanTask {
            sequence: i32::try_from(i).unwrap_or(i32::MAX),
            ..p.task
        })
        .collect()
}

/// Map of suppressed prep task id to the id of the task that subsumes it.
///
/// A step satisfied by several tasks is owned by the one with the smallest
/// `(name, id)`. Any other task whose only step is an owned step is
/// suppressed.
fn subsumed_tasks(graph: &RecipeGraph) -> BTreeMap<&str, String> {
    let mut owners: BTreeMap<&str, &RecipePrepTask> = BTreeMap::new();
    for task in graph.prep_tasks() {
        for ts in graph.task_steps(&task.id).filter(|ts| ts.satisfies_recipe_step) {
            let owner = owners.entry(ts.step_id.as_str()).or_insert(task);
            if (&task.name, &task.id) < (&owner.name, &owner.id) {
                *owner = task;
            }
        }
    }

    let mut out = BTreeMap::new();
    for task in graph.prep_tasks() {
        let targets: HashSet<&str> = graph.task_steps(&task.id).map(|ts| ts.step_id.as_str()).collect();
        if targets.len() != 1 {
            continue;
        }
        let Some(step_id) = targets.into_iter().next() else {
            continue;
        };
        match owners.get(step_id) {
            Some(owner) if owner.id != task.id => {
                out.insert(task.id.as_str(), owner.id.clone());
            }
            _ => {}
        }
    }
    out
}

fn graph_task_name<'g>(graph: &'g RecipeGraph, task_id: &str) -> &'g str {
    graph
        .prep_tasks()
        .iter()
        .find(|t| t.id == task_id)
        .map_or("", |t| t.name.as_str())
}

/// `[cook_at - max_buffer, cook_at - min_buffer]`; max defaults to min.
fn window(task: &RecipePrepTask, cook_at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let min = i64::from(task.buffer_min_s);
    let max = task.buffer_max_s.map_or(min, i64::from).max(min);
    (
        cook_at - Duration::seconds(max),
        cook_at - Duration::seconds(min),
    )
}

fn explain(
    graph: &RecipeGraph,
    task: &RecipePrepTask,
    starts: DateTime<Utc>,
    ends: DateTime<Utc>,
    absorbed: &[&str],
) -> String {
    let min = task.buffer_min_s;
    let max = task.buffer_max_s.unwrap_or(min).max(min);
    let lead = if min == max {
        format!("{} before cook", human_secs(min))
    } else {
        format!("{}-{} before cook", human_secs(min), human_secs(max))
    };

    let mut parts = vec![format!(
        "Prep '{}' {lead} (window {} to {})",
        task.name,
        starts.format("%Y-%m-%d %H:%M UTC"),
        ends.format("%Y-%m-%d %H:%M UTC"),
    )];

    let mut satisfied: Vec<i32> = graph
        .task_steps(&task.id)
        .filter(|ts| ts.satisfies_recipe_step)
        .filter_map(|ts| graph.step_by_id(&ts.step_id))
        .map(|s| s.step_index)
        .collect();
    satisfied.sort_unstable();
    satisfied.dedup();
    match satisfied.as_slice() {
        [] => {}
        [one] => parts.push(format!("satisfies step {one}")),
        many => {
            let list: Vec<String> = many.iter().map(i32::to_string).collect();
            parts.push(format!("satisfies steps {}", list.join(", ")));
        }
    }

    match (task.storage_type, task.storage_temperature_c) {
        (Some(kind), Some(t)) => parts.push(format!("store {} at {t}°C", kind.describe())),
        (Some(kind), None) => parts.push(format!("store {}", kind.describe())),
        (None, Some(t)) => parts.push(format!("store at {t}°C")),
        (None, None) => {}
    }

    for name in absorbed {
        parts.push(format!("subsumes '{name}'"));
    }

    parts.join("; ")
}

fn human_secs(secs: i32) -> String {
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Generate and persist the prep tasks of a finalized plan.
///
/// Task ids derive from `(plan, option, prep task)`, so re-running leaves the
/// stored rows unchanged. An option whose recipe graph fails validation gets
/// its reason recorded in `prep_explanation` and contributes no tasks.
/// Returns the number of tasks the plan should have.
pub async fn create_tasks_for_plan(
    pool: &PgPool,
    catalog: &Catalog,
    events: &EventBus,
    plan_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<usize> {
    let mut tx = pool.begin().await?;
    let tasks = schedule_locked(&mut *tx, catalog, plan_id, now).await?;
    let inserted = meal_plan_tasks::create_many(&mut *tx, &tasks).await?;
    meal_plans::mark_tasks_created(&mut *tx, plan_id).await?;
    tx.commit().await?;

    info!(plan_id, count = tasks.len(), inserted, "meal plan tasks created");
    events.publish(DomainEvent::TasksCreated {
        plan_id: plan_id.to_owned(),
        count: tasks.len(),
    });
    Ok(tasks.len())
}

async fn schedule_locked(
    conn: &mut PgConnection,
    catalog: &Catalog,
    plan_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<Vec<MealPlanTask>> {
    lock_plan(&mut *conn, plan_id).await?;

    let plan = meal_plans::get_meal_plan(&mut *conn, plan_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("meal plan {plan_id}")))?;
    if plan.status != MealPlanStatus::Finalized {
        return Err(EngineError::Conflict(format!(
            "meal plan {plan_id} is {}, tasks need a finalized plan",
            plan.status
        )));
    }

    let starts: BTreeMap<String, DateTime<Utc>> = meal_plans::events_for_plan(&mut *conn, plan_id)
        .await?
        .into_iter()
        .map(|e| (e.id, e.starts_at))
        .collect();

    let mut loaded = Vec::new();
    for option in meal_plans::options_for_plan(&mut *conn, plan_id)
        .await?
        .into_iter()
        .filter(|o| o.chosen)
    {
        let Some(&cook_at) = starts.get(&option.event_id) else {
            continue;
        };
        let mut closures = Vec::new();
        let mut failure = None;
        for component in meals::components_for_meal(&mut *conn, &option.meal_id).await? {
            match load_recipe_closure(&mut *conn, &component.recipe_id, catalog).await {
                Ok(closure) => closures.push(closure),
                Err(EngineError::InvalidRecipeGraph(err)) => {
                    failure = Some(format!("recipe {}: {err}", component.recipe_id));
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        match failure {
            Some(reason) => {
                warn!(plan_id, option_id = %option.id, %reason, "skipping prep tasks for option");
                meal_plans::set_option_prep_explanation(
                    &mut *conn,
                    &option.id,
                    &format!("no prep tasks: invalid recipe graph: {reason}"),
                )
                .await?;
            }
            None => loaded.push((option.id, cook_at, closures)),
        }
    }

    let scheduled: Vec<ScheduledOption<'_>> = loaded
        .iter()
        .map(|(option_id, cook_at, closures)| ScheduledOption {
            option_id,
            cook_at: *cook_at,
            recipes: closures.iter().flat_map(|c| c.iter()).collect(),
        })
        .collect();
    Ok(plan_tasks(plan_id, &scheduled, now))
}
