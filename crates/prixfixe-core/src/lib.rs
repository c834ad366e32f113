pub mod catalog;
pub mod error;
pub mod events;
pub mod finalize;
pub mod grocery;
pub mod plan;
pub mod recipe;
pub mod retry;
pub mod schedule;
pub mod state;
pub mod voting;
pub mod workers;

pub use error::{EngineError, EngineResult};
