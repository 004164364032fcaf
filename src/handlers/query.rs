//! Sale Query Service
//!
//! Read side. Every answer is a pure derivation over one loaded snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::Sale;
use crate::domain::{Clock, DomainError};
use crate::error::AppError;
use crate::event_store::{EventStore, StoredEvent};
use crate::reconcile::{plan, EnginePolicy, SaleStatement, SaleStatistics};

/// Overdue answer for one plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOverdue {
    pub sale_id: Uuid,
    pub plan_id: Uuid,
    pub as_of: DateTime<Utc>,
    pub is_overdue: bool,
}

#[derive(Clone)]
pub struct SaleQueryService {
    store: EventStore,
    clock: Arc<dyn Clock>,
    policy: EnginePolicy,
}

impl SaleQueryService {
    pub fn new(store: EventStore, clock: Arc<dyn Clock>, policy: EnginePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    async fn load(&self, sale_id: Uuid) -> Result<Sale, AppError> {
        self.store
            .load_aggregate::<Sale>(sale_id)
            .await?
            .ok_or_else(|| DomainError::SaleNotFound(sale_id).into())
    }

    pub async fn statement(
        &self,
        sale_id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<SaleStatement, AppError> {
        let sale = self.load(sale_id).await?;
        let as_of = as_of.unwrap_or_else(|| self.clock.now());
        Ok(SaleStatement::build(&sale, &self.policy, as_of))
    }

    pub async fn statistics(&self, sale_id: Uuid) -> Result<SaleStatistics, AppError> {
        let sale = self.load(sale_id).await?;
        Ok(SaleStatistics::compute(&sale))
    }

    pub async fn is_plan_overdue(
        &self,
        sale_id: Uuid,
        plan_id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<PlanOverdue, AppError> {
        let sale = self.load(sale_id).await?;
        let target = sale.plan(plan_id).ok_or(DomainError::PlanNotFound(plan_id))?;
        let as_of = as_of.unwrap_or_else(|| self.clock.now());

        Ok(PlanOverdue {
            sale_id,
            plan_id,
            as_of,
            is_overdue: plan::is_overdue(target, as_of, self.policy.overdue_after_days),
        })
    }

    /// Full event history of a sale, oldest first
    pub async fn events(&self, sale_id: Uuid) -> Result<Vec<StoredEvent>, AppError> {
        let events = self.store.get_events(sale_id).await?;
        if events.is_empty() {
            return Err(DomainError::SaleNotFound(sale_id).into());
        }
        Ok(events)
    }
}
