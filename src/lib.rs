//! sale_ledger Library
//!
//! Event-sourced sale ledger: payments, installment plans and agent commission.
//! Re-exports modules for integration testing and the server binary.

pub mod aggregate;
pub mod api;
pub mod app;
pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
mod error;
pub mod event_store;
pub mod handlers;
pub mod reconcile;

pub use config::Config;
pub use domain::{Amount, AmountError, DomainError, OperationContext, SaleEvent};
pub use error::{AppError, AppResult, ErrorResponse};
