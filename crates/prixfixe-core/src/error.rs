//! Engine error taxonomy.
//!
//! Every fallible engine operation returns [`EngineError`]. Each variant has a
//! stable kind string that the HTTP layer exposes verbatim.

use thiserror::Error;

use crate::recipe::RecipeGraphError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    NotFound(String),

    /// Mutation of a terminal plan, a late ballot, or a stale status update.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    InvalidRecipeGraph(#[from] RecipeGraphError),

    #[error("unit conversion graph is inconsistent: {0}")]
    ConversionGraphInconsistent(String),

    #[error("worker budget exceeded: {0}")]
    TimedOut(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl EngineError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    /// Stable kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidRecipeGraph(_) => "invalid_recipe_graph",
            Self::ConversionGraphInconsistent(_) => "conversion_graph_inconsistent",
            Self::TimedOut(_) => "timed_out",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Timeouts are retryable. Internal errors are transient only when they
    /// wrap a connection-level `sqlx` failure or a serialization/deadlock
    /// abort.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TimedOut(_) => true,
            Self::Internal(err) => err
                .chain()
                .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
                .any(is_transient_sqlx),
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001" | "40P01")),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(EngineError::not_found("plan p1").kind(), "not_found");
        assert_eq!(EngineError::Conflict("x".into()).kind(), "conflict");
        assert_eq!(EngineError::InvalidInput("x".into()).kind(), "invalid_input");
        assert_eq!(EngineError::TimedOut("x".into()).kind(), "timed_out");
        assert_eq!(
            EngineError::Internal(anyhow::anyhow!("boom")).kind(),
            "internal"
        );
    }

    #[test]
    fn not_found_message() {
        assert_eq!(
            EngineError::not_found("meal plan p1").to_string(),
            "meal plan p1 not found"
        );
    }

    #[test]
    fn pool_timeout_is_transient_through_context() {
        let err: anyhow::Error = Err::<(), _>(sqlx::Error::PoolTimedOut)
            .context("failed to fetch meal plan")
            .unwrap_err();
        assert!(EngineError::Internal(err).is_transient());
    }

    #[test]
    fn row_not_found_is_not_transient() {
        let err = anyhow::Error::new(sqlx::Error::RowNotFound);
        assert!(!EngineError::Internal(err).is_transient());
        assert!(!EngineError::Conflict("late".into()).is_transient());
    }
}
