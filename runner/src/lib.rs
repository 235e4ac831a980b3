pub mod config;
pub mod database;
pub mod executors;
pub mod sync;
