use std::env;
use std::time::Duration;

/// Database configuration.
///
/// Reads from the `PRIXFIXE_DATABASE_URL` environment variable, falling back
/// to `postgresql://localhost:5432/prixfixe` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
    /// Pool size. Each plan in flight holds one connection for its
    /// transaction.
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DbConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/prixfixe";

    /// Name of the environment variable consulted by [`DbConfig::from_env`].
    pub const ENV_VAR: &str = "PRIXFIXE_DATABASE_URL";

    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

    /// Build a config from the environment.
    pub fn from_env() -> Self {
        Self::new(env::var(Self::ENV_VAR).unwrap_or_else(|_| Self::DEFAULT_URL.to_owned()))
    }

    /// Build a config from an explicit URL (CLI flags, tests).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(10),
        }
    }

    /// Size the pool for `plans_in_flight` concurrent plan transactions plus
    /// one spare connection for catalog reloads and API reads.
    pub fn with_plans_in_flight(mut self, plans_in_flight: u32) -> Self {
        self.max_connections = plans_in_flight.saturating_add(1).max(2);
        self
    }

    /// The same server and pool settings pointed at database `name`.
    pub fn for_database(&self, name: &str) -> Self {
        let base = self
            .database_url
            .rfind('/')
            .map_or(self.database_url.as_str(), |pos| &self.database_url[..pos]);
        Self {
            database_url: format!("{base}/{name}"),
            ..self.clone()
        }
    }

    /// Extract the database name from the URL.
    ///
    /// Returns `None` if the URL has no path component.
    pub fn database_name(&self) -> Option<&str> {
        let without_query = self
            .database_url
            .split('?')
            .next()
            .unwrap_or(&self.database_url);
        without_query.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Return a URL pointing at the `postgres` maintenance database on the
    /// same host. Used to issue `CREATE DATABASE` when the target DB does not
    /// yet exist.
    pub fn maintenance_url(&self) -> String {
        match self.database_url.rfind('/') {
            Some(pos) => {
                let mut url = self.database_url[..pos].to_owned();
                url.push_str("/postgres");
                url
            }
            None => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
