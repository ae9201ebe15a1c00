//! Tickloom trading engine library
//!
//! Trade history storage, bar aggregation, simulated and live order
//! handling, and the scheduler that drives trading agents over them.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod task_runner;
