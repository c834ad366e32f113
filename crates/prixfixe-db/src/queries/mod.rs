//! Query functions, one module per table group.
//!
//! Functions that run a single statement take a generic [`sqlx::PgExecutor`]
//! so callers can pass either `&PgPool` or a transaction. Functions that run
//! several statements take `&mut PgConnection`; the caller owns the
//! transaction boundary.

pub mod catalog;
pub mod grocery_list;
pub mod households;
pub mod locks;
pub mod meal_plan_tasks;
pub mod meal_plans;
pub mod meals;
pub mod recipes;
pub mod votes;
