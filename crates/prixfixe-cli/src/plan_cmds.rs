//! CLI handlers for `prixfixe plan` subcommands.
//!
//! Implements:
//! - `prixfixe plan create <file>` -- create a meal plan from a TOML file
//! - `prixfixe plan show <plan-id>` -- show a plan with events, options, tasks, and groceries

use anyhow::{Context, Result};
use sqlx::PgPool;

use prixfixe_core::plan::{create_meal_plan_from_toml, get_meal_plan_detail, parse_meal_plan_toml};
use prixfixe_db::queries::{grocery_list, meal_plan_tasks, meal_plans};

use crate::PlanCommands;

/// Dispatch a `PlanCommands` variant to the appropriate handler.
pub async fn run_plan_command(command: PlanCommands, pool: &PgPool) -> Result<()> {
    match command {
        PlanCommands::Create { file } => cmd_create(pool, &file).await,
        PlanCommands::Show { plan_id } => cmd_show(pool, &plan_id).await,
    }
}

// -----------------------------------------------------------------------
// prixfixe plan create <file>
// -----------------------------------------------------------------------

async fn cmd_create(pool: &PgPool, file_path: &str) -> Result<()> {
    let content = std::fs::read_to_string(file_path)
        .with_context(|| format!("failed to read meal plan file: {file_path}"))?;
    let definition = parse_meal_plan_toml(&content)
        .with_context(|| format!("failed to parse meal plan file: {file_path}"))?;

    let plan = create_meal_plan_from_toml(pool, &definition).await?;
    let options: usize = definition.events.iter().map(|e| e.options.len()).sum();

    println!("Meal plan created.");
    println!();
    println!("  Plan ID:          {}", plan.id);
    println!("  Household:        {}", plan.household_id);
    println!("  Status:           {}", plan.status);
    println!(
        "  Voting deadline:  {}",
        plan.voting_deadline.format("%Y-%m-%d %H:%M UTC")
    );
    println!("  Events:           {}", definition.events.len());
    println!("  Options:          {options}");

    Ok(())
}

// -----------------------------------------------------------------------
// prixfixe plan show <plan-id>
// -----------------------------------------------------------------------

async fn cmd_show(pool: &PgPool, plan_id: &str) -> Result<()> {
    let detail = get_meal_plan_detail(pool, plan_id).await?;
    let plan = &detail.plan;

    println!("Meal plan {}", plan.id);
    println!("  Household:        {}", plan.household_id);
    println!("  Status:           {}", plan.status);
    if !plan.status_explanation.is_empty() {
        println!("  Reason:           {}", plan.status_explanation);
    }
    println!(
        "  Voting deadline:  {}",
        plan.voting_deadline.format("%Y-%m-%d %H:%M UTC")
    );
    if !plan.notes.is_empty() {
        println!("  Notes:            {}", plan.notes);
    }

    println!();
    println!("Events:");
    for item in &detail.events {
        let event = &item.event;
        println!(
            "  {} {} ({})",
            event.starts_at.format("%Y-%m-%d %H:%M"),
            event.meal_name,
            event.id
        );
        if !event.status_explanation.is_empty() {
            println!("    {}", event.status_explanation);
        }
        for option in &item.options {
            let marker = match (option.chosen, option.tiebroken) {
                (true, true) => "* (tiebreak)",
                (true, false) => "*",
                _ => " ",
            };
            println!("    {marker} {} meal={}", option.id, option.meal_id);
            if !option.prep_explanation.is_empty() {
                println!("        {}", option.prep_explanation);
            }
        }
    }

    let missing = meal_plans::missing_votes(pool, plan_id).await?;
    if !missing.is_empty() {
        println!();
        println!("Missing votes:");
        for m in &missing {
            println!("  event {}: {}", m.event_id, m.user_id);
        }
    }

    let tasks = meal_plan_tasks::tasks_for_plan(pool, plan_id).await?;
    if !tasks.is_empty() {
        println!();
        println!("Prep tasks:");
        for task in &tasks {
            println!("  {:>3}. [{}] {}", task.sequence + 1, task.status, task.id);
            println!("       {}", task.creation_explanation);
        }
    }

    let items = grocery_list::items_for_plan(pool, plan_id).await?;
    if !items.is_empty() {
        println!();
        println!("Grocery list:");
        for item in &items {
            let qty = match item.max_qty_needed {
                Some(max) if max > item.min_qty_needed => {
                    format!("{:.2}-{max:.2}", item.min_qty_needed)
                }
                _ => format!("{:.2}", item.min_qty_needed),
            };
            println!(
                "  [{}] {} {} {}",
                item.status, item.ingredient_id, qty, item.measurement_unit_id
            );
        }
    }

    Ok(())
}
