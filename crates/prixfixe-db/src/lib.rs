pub mod config;
pub mod ids;
pub mod models;
pub mod pool;
pub mod queries;
