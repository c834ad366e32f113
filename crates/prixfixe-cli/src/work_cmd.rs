//! `prixfixe work`, `prixfixe finalize`, `prixfixe tasks`, `prixfixe grocery`:
//! run the lifecycle workers from the command line.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use prixfixe_core::workers::{CycleReport, HouseholdReport, Workers};

/// Cancellation token wired to Ctrl+C: the first signal cancels, the second
/// force-exits.
pub fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_signal.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    cancel
}

/// Exit status for a worker run that hit its budget.
pub const EXIT_TIMED_OUT: u8 = 3;

/// Run `FinalizeMealPlans` once. Exits with [`EXIT_TIMED_OUT`] when the
/// budget ran out.
pub async fn run_finalize(workers: &Workers, cancel: &CancellationToken) -> Result<ExitCode> {
    let report = workers.finalize_meal_plans(cancel).await?;
    println!("Finalized {} meal plan(s).", report.count);
    if !report.skipped.is_empty() {
        println!("Skipped (will retry next run):");
        for plan_id in &report.skipped {
            println!("  - {plan_id}");
        }
    }
    if report.timed_out {
        println!("Worker budget exceeded.");
        return Ok(ExitCode::from(EXIT_TIMED_OUT));
    }
    Ok(ExitCode::SUCCESS)
}

/// Which per-household worker to run.
#[derive(Debug, Clone, Copy)]
pub enum HouseholdWorker {
    Tasks,
    Grocery,
}

/// Run `CreateMealPlanTasks` or `InitializeMealPlanGroceryList` once for a
/// household. Any skipped plan makes the exit status non-zero.
pub async fn run_household(
    workers: &Workers,
    which: HouseholdWorker,
    household_id: &str,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    workers.reload_catalog().await?;
    let report = match which {
        HouseholdWorker::Tasks => workers.create_meal_plan_tasks(household_id, cancel).await?,
        HouseholdWorker::Grocery => {
            workers.initialize_grocery_lists(household_id, cancel).await?
        }
    };
    print_household(which, household_id, &report);
    Ok(ExitCode::from(household_exit_status(&report)))
}

fn household_exit_status(report: &HouseholdReport) -> u8 {
    match (report.success, report.timed_out) {
        (true, _) => 0,
        (false, true) => EXIT_TIMED_OUT,
        (false, false) => 1,
    }
}

fn print_household(which: HouseholdWorker, household_id: &str, report: &HouseholdReport) {
    let label = match which {
        HouseholdWorker::Tasks => "prep tasks",
        HouseholdWorker::Grocery => "grocery lists",
    };
    println!(
        "Household {household_id}: {label} built for {} plan(s).",
        report.processed
    );
    for plan_id in &report.skipped {
        println!("  skipped: {plan_id}");
    }
}

/// Run worker cycles every `interval` until cancelled (or once with `once`).
///
/// A failed cycle is logged and the loop carries on; the catalog is reloaded
/// at the start of every cycle.
pub async fn run_work(
    workers: &Workers,
    interval: Duration,
    once: bool,
    cancel: CancellationToken,
) -> Result<()> {
    info!(interval_secs = interval.as_secs(), once, "prixfixe work starting");
    loop {
        match cycle(workers, &cancel).await {
            Ok(report) => log_cycle(&report),
            Err(err) if once => return Err(err),
            Err(err) => error!(error = %format!("{err:#}"), "worker cycle failed"),
        }
        if once || cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("prixfixe work stopped");
    Ok(())
}

async fn cycle(workers: &Workers, cancel: &CancellationToken) -> Result<CycleReport> {
    workers.reload_catalog().await?;
    Ok(workers.run_cycle(cancel).await?)
}

fn log_cycle(report: &CycleReport) {
    let tasks_ok = report.households.iter().filter(|h| h.tasks.success).count();
    let grocery_ok = report.households.iter().filter(|h| h.grocery.success).count();
    info!(
        finalized = report.finalize.count,
        skipped = report.finalize.skipped.len(),
        households = report.households.len(),
        tasks_ok,
        grocery_ok,
        "worker cycle complete"
    );
}
