//! Domain module
//!
//! Core domain types and business primitives.

pub mod clock;
pub mod context;
pub mod error;
pub mod events;
pub mod model;
pub mod money;

pub use clock::{Clock, FixedClock, SystemClock};
pub use context::OperationContext;
pub use error::DomainError;
pub use events::SaleEvent;
pub use model::{
    Commission, CommissionEntryKind, CommissionPayment, CommissionStatus, Payment, PaymentMethod,
    PaymentPlan, PaymentPlanType, PaymentStatus, PlanStatus, SaleStatus,
};
pub use money::{Amount, AmountError, Percentage};
