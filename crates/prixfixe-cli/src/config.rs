//! Configuration file management for prixfixe.
//!
//! Provides a TOML-based config file at `~/.config/prixfixe/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use prixfixe_core::workers::{MAX_PLANS_IN_FLIGHT, WorkerConfig};
use prixfixe_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub workers: WorkersSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersSection {
    /// Seconds between worker cycles in `prixfixe work`.
    pub interval_secs: u64,
    /// Wall-time budget of a single worker invocation.
    pub budget_secs: u64,
    /// Due plans picked up per finalizer run.
    pub batch_limit: i64,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            budget_secs: 30,
            batch_limit: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_owned(),
            port: 8080,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the prixfixe config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/prixfixe` or
/// `~/.config/prixfixe`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("prixfixe");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("prixfixe")
}

/// Return the path to the prixfixe config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file at `path`.
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents).context("failed to parse config file")
}

/// Load the config file from its default location.
pub fn load_config() -> Result<ConfigFile> {
    load_config_from(&config_path())
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config_to(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

pub fn save_config(config: &ConfigFile) -> Result<()> {
    save_config_to(&config_path(), config)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

pub const ENV_BIND: &str = "PRIXFIXE_BIND";
pub const ENV_PORT: &str = "PRIXFIXE_PORT";
pub const ENV_WORK_INTERVAL: &str = "PRIXFIXE_WORK_INTERVAL_SECS";

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides<'a> {
    pub database_url: Option<&'a str>,
    pub bind: Option<&'a str>,
    pub port: Option<u16>,
    pub interval_secs: Option<u64>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone)]
pub struct PrixfixeConfig {
    pub db_config: DbConfig,
    pub worker_config: WorkerConfig,
    pub work_interval: Duration,
    pub bind: String,
    pub port: u16,
}

impl PrixfixeConfig {
    /// Resolve against the process environment and the default config file.
    pub fn resolve(cli: &CliOverrides<'_>) -> Result<Self> {
        let file = config_path();
        let file_config = if file.exists() {
            Some(load_config_from(&file)?)
        } else {
            None
        };
        Self::resolve_from(cli, file_config.as_ref(), |key| std::env::var(key).ok())
    }

    /// Resolve using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `--database-url` > `PRIXFIXE_DATABASE_URL` > `[database] url` > `DbConfig::DEFAULT_URL`
    /// - Bind / port: `--bind` / `--port` > `PRIXFIXE_BIND` / `PRIXFIXE_PORT` > `[server]` > `127.0.0.1:8080`
    /// - Work interval: `--interval` > `PRIXFIXE_WORK_INTERVAL_SECS` > `[workers] interval_secs` > 60
    pub fn resolve_from(
        cli: &CliOverrides<'_>,
        file: Option<&ConfigFile>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let database_url = match (cli.database_url, env(DbConfig::ENV_VAR)) {
            (Some(url), _) => url.to_owned(),
            (None, Some(url)) => url,
            (None, None) => file.map_or_else(
                || DbConfig::DEFAULT_URL.to_owned(),
                |f| f.database.url.clone(),
            ),
        };

        let workers = file.map(|f| f.workers.clone()).unwrap_or_default();
        let server = file.map(|f| f.server.clone()).unwrap_or_default();

        let bind = match (cli.bind, env(ENV_BIND)) {
            (Some(b), _) => b.to_owned(),
            (None, Some(b)) => b,
            (None, None) => server.bind,
        };
        let port = match (cli.port, env(ENV_PORT)) {
            (Some(p), _) => p,
            (None, Some(p)) => p
                .parse()
                .with_context(|| format!("{ENV_PORT} is not a valid port: {p}"))?,
            (None, None) => server.port,
        };
        let interval_secs = match (cli.interval_secs, env(ENV_WORK_INTERVAL)) {
            (Some(s), _) => s,
            (None, Some(s)) => s
                .parse()
                .with_context(|| format!("{ENV_WORK_INTERVAL} is not a number of seconds: {s}"))?,
            (None, None) => workers.interval_secs,
        };

        Ok(Self {
            db_config: DbConfig::new(database_url).with_plans_in_flight(MAX_PLANS_IN_FLIGHT),
            worker_config: WorkerConfig {
                budget: Duration::from_secs(workers.budget_secs),
                batch_limit: workers.batch_limit,
                ..WorkerConfig::default()
            },
            work_interval: Duration::from_secs(interval_secs.max(1)),
            bind,
            port,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
