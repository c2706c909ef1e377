pub mod cli;
pub mod commands;
pub mod delegation;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod execution;
pub mod health;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod resilience;
pub mod simulation;
pub mod strategy;
pub mod types;
