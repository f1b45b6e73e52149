//! CLI subcommands.

pub mod plan;

pub use plan::PlanCommand;
