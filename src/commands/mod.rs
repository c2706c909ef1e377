//! CLI command handlers.
//!
//! This module contains the implementation for each CLI subcommand,
//! delegating to the engine, the simulator and the template catalogue.

mod run;
mod simulate;
mod templates;

pub use run::{run_engine, RunOptions};
pub use simulate::run_simulate;
pub use templates::run_templates;
