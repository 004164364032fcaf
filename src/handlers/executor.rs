//! Command Executor
//!
//! Runs every sale mutation as load, decide, append. A lost optimistic
//! concurrency race reloads and decides again with linear backoff; after the
//! last attempt the caller gets `ConcurrentModification`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::{Aggregate, Sale};
use crate::audit::{AuditAction, AuditLog, AuditLogBuilder};
use crate::domain::{Clock, DomainError, OperationContext, SaleEvent, SaleStatus};
use crate::error::AppError;
use crate::event_store::{AggregateOperation, AppendOutcome, EventStore, EventStoreError, StoredEvent};
use crate::reconcile::{EnginePolicy, SaleStatistics};

/// Base delay between write attempts; attempt `n` waits `n` times this
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// What a command did to its sale
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// State after the event (current state for a replayed request)
    pub sale: Sale,
    pub event: SaleEvent,
    pub event_id: Uuid,
    /// The idempotency key was seen before and nothing new was written
    pub replayed: bool,
}

/// Summary stored as before/after state of an audit entry
#[derive(Debug, Clone, Serialize)]
struct AuditSummary {
    status: SaleStatus,
    version: i64,
    paid_amount: Decimal,
    pending_amount: Decimal,
    commission_paid: Decimal,
}

impl AuditSummary {
    fn of(sale: &Sale, policy: &EnginePolicy) -> Self {
        let stats = SaleStatistics::compute(sale);
        Self {
            status: sale.status(),
            version: sale.version(),
            paid_amount: stats.paid_amount,
            pending_amount: stats.pending_amount,
            commission_paid: policy.commission_calculator().paid(sale),
        }
    }
}

/// Shared load/decide/append loop for all sale commands
#[derive(Clone)]
pub struct CommandExecutor {
    store: EventStore,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    policy: EnginePolicy,
    max_attempts: u32,
}

impl CommandExecutor {
    pub fn new(
        store: EventStore,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
        policy: EnginePolicy,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            policy,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn load(&self, sale_id: Uuid) -> Result<Sale, AppError> {
        self.store
            .load_aggregate::<Sale>(sale_id)
            .await?
            .ok_or_else(|| DomainError::SaleNotFound(sale_id).into())
    }

    // =========================================================================
    // Sale creation (expected version 0)
    // =========================================================================

    /// Append the first event of a new sale.
    ///
    /// `requested_id` is the sale id the caller chose, if any; a replayed key must
    /// point at the creation of that same sale.
    pub async fn create<F>(
        &self,
        action: AuditAction,
        requested_id: Option<Uuid>,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
        build: F,
    ) -> Result<CommandOutcome, AppError>
    where
        F: FnOnce(DateTime<Utc>) -> Result<(Sale, SaleEvent), DomainError>,
    {
        let (sale, event) = build(self.now())?;

        if let Some(outcome) = self
            .replay_creation(idempotency_key, requested_id, event.event_type())
            .await?
        {
            return Ok(outcome);
        }
        let op = Self::operation(&event, 0)?;

        match self.store.append(op, idempotency_key, context).await {
            Ok(AppendOutcome::Appended(event_id)) => {
                tracing::info!(sale_id = %sale.id(), event_type = event.event_type(), "Sale opened");
                self.record_audit(action, None, &sale, context).await;
                Ok(CommandOutcome {
                    sale,
                    event,
                    event_id,
                    replayed: false,
                })
            }
            Ok(AppendOutcome::Duplicate(event_id)) => self.replay(None, event_id).await,
            Err(EventStoreError::ConcurrencyConflict { aggregate_id, .. }) => Err(
                DomainError::validation("sale_id", format!("sale {} already exists", aggregate_id))
                    .into(),
            ),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Mutations of an existing sale
    // =========================================================================

    /// Load the sale, decide one event and append it at the loaded version
    pub async fn execute<F>(
        &self,
        sale_id: Uuid,
        action: AuditAction,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
        decide: F,
    ) -> Result<CommandOutcome, AppError>
    where
        F: Fn(&Sale, DateTime<Utc>) -> Result<SaleEvent, DomainError>,
    {
        if let Some(outcome) = self.replay_if_seen(Some(sale_id), idempotency_key).await? {
            return Ok(outcome);
        }

        let mut last_conflict = (0, 0);
        for attempt in 0..self.max_attempts {
            let sale = self.load(sale_id).await?;
            let event = decide(&sale, self.now())?;
            let op = Self::operation(&event, sale.version())?;

            match self.store.append(op, idempotency_key, context).await {
                Ok(AppendOutcome::Appended(event_id)) => {
                    let before = sale.clone();
                    let after = sale.apply(event.clone());

                    if let Err(e) = self.store.save_snapshot_if_needed(&after).await {
                        tracing::warn!(sale_id = %sale_id, error = %e, "Snapshot not saved");
                    }
                    tracing::info!(
                        sale_id = %sale_id,
                        event_type = event.event_type(),
                        version = after.version(),
                        attempt,
                        "Sale event appended"
                    );
                    self.record_audit(action, Some(&before), &after, context).await;

                    return Ok(CommandOutcome {
                        sale: after,
                        event,
                        event_id,
                        replayed: false,
                    });
                }
                Ok(AppendOutcome::Duplicate(event_id)) => {
                    return self.replay(Some(sale_id), event_id).await;
                }
                Err(EventStoreError::ConcurrencyConflict {
                    expected, actual, ..
                }) => {
                    tracing::warn!(
                        sale_id = %sale_id,
                        attempt,
                        expected,
                        actual,
                        "Version conflict, retrying"
                    );
                    last_conflict = (expected, actual);
                    tokio::time::sleep(RETRY_BACKOFF * (attempt + 1)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(DomainError::ConcurrentModification {
            sale_id,
            expected: last_conflict.0,
            found: last_conflict.1,
        }
        .into())
    }

    fn operation(event: &SaleEvent, expected_version: i64) -> Result<AggregateOperation, AppError> {
        AggregateOperation::new(
            Sale::aggregate_type(),
            event.sale_id(),
            expected_version,
            event.event_type(),
            event,
        )
        .map_err(AppError::from)
    }

    // =========================================================================
    // Idempotent replays
    // =========================================================================

    async fn replay_if_seen(
        &self,
        sale_id: Option<Uuid>,
        idempotency_key: Option<Uuid>,
    ) -> Result<Option<CommandOutcome>, AppError> {
        let Some(key) = idempotency_key else {
            return Ok(None);
        };
        match self.store.find_by_idempotency_key(key).await? {
            Some(stored) => {
                tracing::debug!(idempotency_key = %key, event_id = %stored.id, "Replaying earlier result");
                self.outcome_from_stored(sale_id, stored).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// A key replayed on the create path must name an earlier creation of the same kind
    async fn replay_creation(
        &self,
        idempotency_key: Option<Uuid>,
        requested_id: Option<Uuid>,
        event_type: &str,
    ) -> Result<Option<CommandOutcome>, AppError> {
        let Some(key) = idempotency_key else {
            return Ok(None);
        };
        let Some(stored) = self.store.find_by_idempotency_key(key).await? else {
            return Ok(None);
        };
        if stored.version != 1 || stored.event_type != event_type {
            tracing::warn!(
                idempotency_key = %key,
                stored_event_type = %stored.event_type,
                sale_id = %stored.aggregate_id,
                "Idempotency key reused for a different operation"
            );
            return Err(AppError::IdempotencyConflict);
        }
        tracing::debug!(idempotency_key = %key, event_id = %stored.id, "Replaying earlier creation");
        self.outcome_from_stored(requested_id, stored).await.map(Some)
    }

    async fn replay(&self, sale_id: Option<Uuid>, event_id: Uuid) -> Result<CommandOutcome, AppError> {
        let stored = self.store.get_event(event_id).await?.ok_or_else(|| {
            AppError::Internal(format!("idempotency key points at missing event {}", event_id))
        })?;
        self.outcome_from_stored(sale_id, stored).await
    }

    async fn outcome_from_stored(
        &self,
        sale_id: Option<Uuid>,
        stored: StoredEvent,
    ) -> Result<CommandOutcome, AppError> {
        if sale_id.is_some_and(|id| id != stored.aggregate_id) {
            return Err(AppError::IdempotencyConflict);
        }
        let event: SaleEvent = serde_json::from_value(stored.event_data)
            .map_err(|e| AppError::from(EventStoreError::from(e)))?;
        let sale = self.load(stored.aggregate_id).await?;

        Ok(CommandOutcome {
            sale,
            event,
            event_id: stored.id,
            replayed: true,
        })
    }

    // =========================================================================
    // Audit
    // =========================================================================

    /// The event is already committed; a failed audit write is logged, not returned
    async fn record_audit(
        &self,
        action: AuditAction,
        before: Option<&Sale>,
        after: &Sale,
        context: &OperationContext,
    ) {
        let mut builder = AuditLogBuilder::sale(action, after.id())
            .after_state(&AuditSummary::of(after, &self.policy));
        if let Some(before) = before {
            builder = builder.before_state(&AuditSummary::of(before, &self.policy));
        }

        if let Err(e) = self.audit.log(builder, context).await {
            tracing::error!(
                sale_id = %after.id(),
                action = %action,
                error = %e,
                "Failed to write audit log entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::NewSale;
    use crate::audit::MemoryAuditLog;
    use crate::domain::{FixedClock, PaymentPlanType};
    use crate::reconcile::fixtures::t0;
    use rust_decimal_macros::dec;

    fn executor(audit: Arc<MemoryAuditLog>) -> CommandExecutor {
        CommandExecutor::new(
            EventStore::in_memory(Duration::from_secs(1)),
            audit,
            Arc::new(FixedClock::new(t0())),
            EnginePolicy::default(),
            3,
        )
    }

    fn new_sale(sale_id: Uuid) -> NewSale {
        NewSale {
            sale_id,
            unit_reference: "PLOT-12".to_string(),
            quantity: 1,
            sale_price: dec!(100000),
            payment_plan_type: PaymentPlanType::FullPayment,
            commission_percentage: None,
            agent_id: None,
            legacy_amount_paid: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_execute() {
        let audit = Arc::new(MemoryAuditLog::new());
        let exec = executor(audit.clone());
        let ctx = OperationContext::new();
        let sale_id = Uuid::new_v4();

        let created = exec
            .create(AuditAction::SaleCreated, None, None, &ctx, |now| {
                Sale::create(new_sale(sale_id), now)
            })
            .await
            .unwrap();
        assert_eq!(created.sale.version(), 1);

        let outcome = exec
            .execute(sale_id, AuditAction::SaleStatusChanged, None, &ctx, |sale, now| {
                sale.transition_status(SaleStatus::Agreement, None, now)
            })
            .await
            .unwrap();

        assert_eq!(outcome.sale.status(), SaleStatus::Agreement);
        assert_eq!(outcome.sale.version(), 2);
        assert!(!outcome.replayed);
        assert_eq!(audit.len().await, 2);

        let entries = audit.recent(1).await.unwrap();
        assert_eq!(entries[0].action, "sale.status_changed");
        assert_eq!(entries[0].before_state.as_ref().unwrap()["status"], "reservation");
        assert_eq!(entries[0].after_state.as_ref().unwrap()["status"], "agreement");
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let exec = executor(Arc::new(MemoryAuditLog::new()));
        let ctx = OperationContext::new();
        let sale_id = Uuid::new_v4();

        exec.create(AuditAction::SaleCreated, None, None, &ctx, |now| {
            Sale::create(new_sale(sale_id), now)
        })
        .await
        .unwrap();
        let err = exec
            .create(AuditAction::SaleCreated, None, None, &ctx, |now| {
                Sale::create(new_sale(sale_id), now)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_idempotent_replay_skips_decide() {
        let audit = Arc::new(MemoryAuditLog::new());
        let exec = executor(audit.clone());
        let ctx = OperationContext::new();
        let sale_id = Uuid::new_v4();
        let key = Uuid::new_v4();

        exec.create(AuditAction::SaleCreated, None, None, &ctx, |now| {
            Sale::create(new_sale(sale_id), now)
        })
        .await
        .unwrap();

        let first = exec
            .execute(sale_id, AuditAction::SaleStatusChanged, Some(key), &ctx, |sale, now| {
                sale.transition_status(SaleStatus::Agreement, None, now)
            })
            .await
            .unwrap();
        // deciding again would fail (Agreement -> Agreement), the replay must not decide
        let second = exec
            .execute(sale_id, AuditAction::SaleStatusChanged, Some(key), &ctx, |sale, now| {
                sale.transition_status(SaleStatus::Agreement, None, now)
            })
            .await
            .unwrap();

        assert!(second.replayed);
        assert_eq!(second.event_id, first.event_id);
        assert_eq!(second.event, first.event);
        assert_eq!(second.sale.version(), 2);
        assert_eq!(audit.len().await, 2);
    }

    #[tokio::test]
    async fn test_idempotency_key_reused_on_other_sale() {
        let exec = executor(Arc::new(MemoryAuditLog::new()));
        let ctx = OperationContext::new();
        let key = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        for id in [a, b] {
            exec.create(AuditAction::SaleCreated, None, None, &ctx, |now| {
                Sale::create(new_sale(id), now)
            })
            .await
            .unwrap();
        }

        exec.execute(a, AuditAction::SaleStatusChanged, Some(key), &ctx, |sale, now| {
            sale.transition_status(SaleStatus::Agreement, None, now)
        })
        .await
        .unwrap();
        let err = exec
            .execute(b, AuditAction::SaleStatusChanged, Some(key), &ctx, |sale, now| {
                sale.transition_status(SaleStatus::Agreement, None, now)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IdempotencyConflict));
    }

    #[tokio::test]
    async fn test_create_with_key_of_other_mutation_conflicts() {
        let exec = executor(Arc::new(MemoryAuditLog::new()));
        let ctx = OperationContext::new();
        let key = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        exec.create(AuditAction::SaleCreated, Some(a), None, &ctx, |now| {
            Sale::create(new_sale(a), now)
        })
        .await
        .unwrap();
        exec.execute(a, AuditAction::SaleStatusChanged, Some(key), &ctx, |sale, now| {
            sale.transition_status(SaleStatus::Agreement, None, now)
        })
        .await
        .unwrap();

        let err = exec
            .create(AuditAction::SaleCreated, Some(b), Some(key), &ctx, |now| {
                Sale::create(new_sale(b), now)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IdempotencyConflict));

        let missing = exec.load(b).await.unwrap_err();
        assert!(matches!(missing, AppError::Domain(DomainError::SaleNotFound(_))));
    }

    #[tokio::test]
    async fn test_create_replay_is_bound_to_requested_sale() {
        let exec = executor(Arc::new(MemoryAuditLog::new()));
        let ctx = OperationContext::new();
        let key = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let first = exec
            .create(AuditAction::SaleCreated, Some(a), Some(key), &ctx, |now| {
                Sale::create(new_sale(a), now)
            })
            .await
            .unwrap();
        let again = exec
            .create(AuditAction::SaleCreated, Some(a), Some(key), &ctx, |now| {
                Sale::create(new_sale(a), now)
            })
            .await
            .unwrap();
        assert!(again.replayed);
        assert_eq!(again.event_id, first.event_id);

        // no explicit id: a retried create generates a fresh one and still replays
        let retried = exec
            .create(AuditAction::SaleCreated, None, Some(key), &ctx, |now| {
                Sale::create(new_sale(Uuid::new_v4()), now)
            })
            .await
            .unwrap();
        assert_eq!(retried.sale.id(), a);

        let err = exec
            .create(AuditAction::SaleCreated, Some(b), Some(key), &ctx, |now| {
                Sale::create(new_sale(b), now)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IdempotencyConflict));

        let err = exec
            .create(AuditAction::SaleImported, None, Some(key), &ctx, |now| {
                Sale::import(
                    crate::aggregate::ImportedSale {
                        sale: new_sale(Uuid::new_v4()),
                        status: SaleStatus::Reservation,
                        payments: Vec::new(),
                    },
                    now,
                )
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IdempotencyConflict));
    }

    #[tokio::test]
    async fn test_unknown_sale() {
        let exec = executor(Arc::new(MemoryAuditLog::new()));
        let missing = Uuid::new_v4();
        let err = exec
            .execute(
                missing,
                AuditAction::SaleCancelled,
                None,
                &OperationContext::new(),
                |sale, now| sale.cancel("gone".to_string(), None, now),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::SaleNotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn test_concurrent_writers_never_lose_updates() {
        let exec = executor(Arc::new(MemoryAuditLog::new()));
        let ctx = OperationContext::new();
        let sale_id = Uuid::new_v4();

        exec.create(AuditAction::SaleCreated, None, None, &ctx, |now| {
            Sale::create(new_sale(sale_id), now)
        })
        .await
        .unwrap();

        let writers = (0..4).map(|i| {
            let exec = exec.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                exec.execute(sale_id, AuditAction::PaymentRecorded, None, &ctx, move |sale, now| {
                    sale.record_payment(
                        None,
                        crate::aggregate::NewPayment {
                            payment_id: Uuid::from_u128(i + 1),
                            amount: crate::domain::Amount::new(dec!(1000)).unwrap(),
                            payment_date: None,
                            payment_method: Default::default(),
                            status: None,
                            transaction_reference: None,
                            notes: None,
                        },
                        None,
                        now,
                    )
                })
                .await
            })
        });

        let mut succeeded = 0;
        for handle in writers {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AppError::Domain(DomainError::ConcurrentModification { .. })) => {}
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        let sale = exec.load(sale_id).await.unwrap();
        assert_eq!(sale.payments().len(), succeeded);
        assert_eq!(sale.version(), 1 + succeeded as i64);
    }
}
