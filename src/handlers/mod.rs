//! Command Handlers module
//!
//! CQRS command handlers and the read-side query service.
//! Handlers parse commands, run them through the executor and audit the result.

mod commands;
mod executor;
mod query;
mod sale_handler;


pub use commands::*;
pub use executor::{CommandExecutor, CommandOutcome};
pub use query::{PlanOverdue, SaleQueryService};
pub use sale_handler::SaleCommandHandler;
