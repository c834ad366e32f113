mod config;
mod plan_cmds;
mod serve_cmd;
mod work_cmd;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sqlx::PgPool;

use prixfixe_core::catalog::CatalogHandle;
use prixfixe_core::events::EventBus;
use prixfixe_core::workers::Workers;
use prixfixe_db::models::MealPlanStatus;
use prixfixe_db::pool;

use config::{CliOverrides, PrixfixeConfig};
use work_cmd::HouseholdWorker;

#[derive(Parser)]
#[command(name = "prixfixe", about = "Meal-plan lifecycle engine")]
struct Cli {
    /// Database URL (overrides PRIXFIXE_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a prixfixe config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/prixfixe")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the database if needed and apply migrations
    DbInit,
    /// Serve the worker and meal plan HTTP API
    Serve {
        /// Address to bind (overrides PRIXFIXE_BIND)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides PRIXFIXE_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the finalize, prep task, and grocery workers on an interval
    Work {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
        /// Seconds between cycles (overrides PRIXFIXE_WORK_INTERVAL_SECS)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Finalize every meal plan that is due
    Finalize,
    /// Create prep tasks for a household's finalized plans
    Tasks {
        /// Household ID
        household_id: String,
    },
    /// Build grocery lists for a household's finalized plans
    Grocery {
        /// Household ID
        household_id: String,
    },
    /// Meal plan management
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Create a meal plan from a TOML file
    Create {
        /// Path to the meal plan TOML file
        file: String,
    },
    /// Show a meal plan with its events, options, tasks, and grocery list
    Show {
        /// Meal plan ID
        plan_id: String,
    },
}

/// Execute the `prixfixe init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        workers: config::WorkersSection::default(),
        server: config::ServerSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  workers.interval_secs = {}", cfg.workers.interval_secs);
    println!("  server = {}:{}", cfg.server.bind, cfg.server.port);
    println!();
    println!("Next: run `prixfixe db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `prixfixe db-init` command: create database and run migrations.
async fn cmd_db_init(resolved: &PrixfixeConfig) -> anyhow::Result<()> {
    println!("Initializing prixfixe database...");

    let created = pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;
    let summary = pool::lifecycle_summary(&db_pool).await?;
    db_pool.close().await;

    if created {
        println!("Created database {}.", resolved.db_config.database_url);
    }
    println!("Database ready.");
    println!("  Households:               {}", summary.households);
    println!("  Meals:                    {}", summary.meals);
    for status in [
        MealPlanStatus::AwaitingVotes,
        MealPlanStatus::Finalized,
        MealPlanStatus::FinalizationFailed,
    ] {
        println!("  Plans {:<19} {}", format!("{status}:"), summary.plans(status));
    }
    println!("  Awaiting tasks/groceries: {}", summary.plans_pending_generation);
    println!("  Open prep tasks:          {}", summary.open_tasks);
    println!("  Groceries to buy:         {}", summary.groceries_to_buy);
    Ok(())
}

fn workers_for(db_pool: &PgPool, resolved: &PrixfixeConfig) -> Workers {
    Workers::new(
        db_pool.clone(),
        CatalogHandle::default(),
        EventBus::new(),
        resolved.worker_config.clone(),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Init { db_url, force } = &cli.command {
        cmd_init(db_url, *force)?;
        return Ok(ExitCode::SUCCESS);
    }

    let overrides = match &cli.command {
        Commands::Serve { bind, port } => CliOverrides {
            database_url: cli.database_url.as_deref(),
            bind: bind.as_deref(),
            port: *port,
            ..CliOverrides::default()
        },
        Commands::Work { interval, .. } => CliOverrides {
            database_url: cli.database_url.as_deref(),
            interval_secs: *interval,
            ..CliOverrides::default()
        },
        _ => CliOverrides {
            database_url: cli.database_url.as_deref(),
            ..CliOverrides::default()
        },
    };
    let resolved = PrixfixeConfig::resolve(&overrides)?;

    if let Commands::DbInit = cli.command {
        cmd_db_init(&resolved).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let workers = workers_for(&db_pool, &resolved);

    let result = match cli.command {
        Commands::Init { .. } | Commands::DbInit => Ok(ExitCode::SUCCESS),
        Commands::Serve { .. } => {
            serve_cmd::run_serve(
                workers,
                &resolved.bind,
                resolved.port,
                work_cmd::shutdown_token(),
            )
            .await
            .map(|()| ExitCode::SUCCESS)
        }
        Commands::Work { once, .. } => {
            work_cmd::run_work(
                &workers,
                resolved.work_interval,
                once,
                work_cmd::shutdown_token(),
            )
            .await
            .map(|()| ExitCode::SUCCESS)
        }
        Commands::Finalize => work_cmd::run_finalize(&workers, &work_cmd::shutdown_token()).await,
        Commands::Tasks { household_id } => {
            work_cmd::run_household(
                &workers,
                HouseholdWorker::Tasks,
                &household_id,
                &work_cmd::shutdown_token(),
            )
            .await
        }
        Commands::Grocery { household_id } => {
            work_cmd::run_household(
                &workers,
                HouseholdWorker::Grocery,
                &household_id,
                &work_cmd::shutdown_token(),
            )
            .await
        }
        Commands::Plan { command } => plan_cmds::run_plan_command(command, &db_pool)
            .await
            .map(|()| ExitCode::SUCCESS),
    };

    db_pool.close().await;
    result
}
