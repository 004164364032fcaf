//! Sale Command Handler
//!
//! One method per ledger operation. Parsing happens here; the rules live on
//! the aggregate and in the reconciliation engine.

use uuid::Uuid;

use crate::aggregate::Sale;
use crate::audit::AuditAction;
use crate::domain::{OperationContext, SaleStatus};
use crate::error::AppError;

use super::executor::{CommandExecutor, CommandOutcome};
use super::{
    AddPaymentPlanCommand, CancelSaleCommand, CommissionAdjustmentCommand, CreateSaleCommand,
    ImportLegacySaleCommand, RecordCommissionPaymentCommand, RecordPaymentCommand,
    RefundPaymentCommand, ScheduleNextPaymentDueCommand, TransitionStatusCommand,
};

/// Handler for every command that changes a sale
#[derive(Clone)]
pub struct SaleCommandHandler {
    executor: CommandExecutor,
}

impl SaleCommandHandler {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    // =========================================================================
    // Opening sales
    // =========================================================================

    pub async fn create_sale(
        &self,
        command: CreateSaleCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<CommandOutcome, AppError> {
        let requested_id = command.sale_id;
        let input = command.into_input()?;
        self.executor
            .create(
                AuditAction::SaleCreated,
                requested_id,
                idempotency_key,
                context,
                |now| Sale::create(input, now),
            )
            .await
    }

    pub async fn import_legacy_sale(
        &self,
        command: ImportLegacySaleCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<CommandOutcome, AppError> {
        let requested_id = command.sale_id;
        let input = command.into_input(self.executor.now())?;
        tracing::debug!(
            sale_id = %input.sale.sale_id,
            payments = input.payments.len(),
            legacy_amount = ?input.sale.legacy_amount_paid,
            "Importing legacy sale"
        );
        self.executor
            .create(
                AuditAction::SaleImported,
                requested_id,
                idempotency_key,
                context,
                |now| Sale::import(input, now),
            )
            .await
    }

    // =========================================================================
    // Plans and client payments
    // =========================================================================

    pub async fn add_payment_plan(
        &self,
        sale_id: Uuid,
        command: AddPaymentPlanCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<CommandOutcome, AppError> {
        let input = command.into_input()?;
        self.executor
            .execute(
                sale_id,
                AuditAction::PaymentPlanAdded,
                idempotency_key,
                context,
                |sale, now| sale.add_payment_plan(input.clone(), now),
            )
            .await
    }

    pub async fn schedule_next_payment_due(
        &self,
        sale_id: Uuid,
        plan_id: Uuid,
        command: ScheduleNextPaymentDueCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<CommandOutcome, AppError> {
        self.executor
            .execute(
                sale_id,
                AuditAction::NextPaymentDueScheduled,
                idempotency_key,
                context,
                |sale, now| sale.schedule_next_payment_due(plan_id, command.next_payment_due, now),
            )
            .await
    }

    /// `plan_id` from the path wins over one given in the body
    pub async fn record_payment(
        &self,
        sale_id: Uuid,
        plan_id: Option<Uuid>,
        command: RecordPaymentCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<CommandOutcome, AppError> {
        let (body_plan_id, input) = command.into_input()?;
        let plan_id = plan_id.or(body_plan_id);
        let recorded_by = context.actor_id;

        self.executor
            .execute(
                sale_id,
                AuditAction::PaymentRecorded,
                idempotency_key,
                context,
                |sale, now| sale.record_payment(plan_id, input.clone(), recorded_by, now),
            )
            .await
    }

    pub async fn confirm_payment(
        &self,
        sale_id: Uuid,
        payment_id: Uuid,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<CommandOutcome, AppError> {
        self.executor
            .execute(
                sale_id,
                AuditAction::PaymentConfirmed,
                idempotency_key,
                context,
                |sale, now| sale.confirm_payment(payment_id, now),
            )
            .await
    }

    pub async fn refund_payment(
        &self,
        sale_id: Uuid,
        payment_id: Uuid,
        command: RefundPaymentCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<CommandOutcome, AppError> {
        self.executor
            .execute(
                sale_id,
                AuditAction::PaymentRefunded,
                idempotency_key,
                context,
                |sale, now| {
                    sale.refund_payment(payment_id, command.reopen_plan, command.reason.clone(), now)
                },
            )
            .await
    }

    // =========================================================================
    // Commission
    // =========================================================================

    pub async fn record_commission_payment(
        &self,
        sale_id: Uuid,
        command: RecordCommissionPaymentCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<CommandOutcome, AppError> {
        let input = command.into_input()?;
        let calculator = self.executor.policy().commission_calculator();

        self.executor
            .execute(
                sale_id,
                AuditAction::CommissionPaid,
                idempotency_key,
                context,
                |sale, now| sale.record_commission_payment(input.clone(), &calculator, now),
            )
            .await
    }

    pub async fn record_commission_adjustment(
        &self,
        sale_id: Uuid,
        command: CommissionAdjustmentCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<CommandOutcome, AppError> {
        let amount = command.parsed_amount()?;
        let calculator = self.executor.policy().commission_calculator();
        let adjustment_id = Uuid::new_v4();

        self.executor
            .execute(
                sale_id,
                AuditAction::CommissionAdjusted,
                idempotency_key,
                context,
                |sale, now| {
                    sale.record_commission_adjustment(
                        adjustment_id,
                        amount,
                        command.reason.clone(),
                        &calculator,
                        now,
                    )
                },
            )
            .await
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub async fn transition_status(
        &self,
        sale_id: Uuid,
        command: TransitionStatusCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<CommandOutcome, AppError> {
        let action = if command.status == SaleStatus::Cancelled {
            AuditAction::SaleCancelled
        } else {
            AuditAction::SaleStatusChanged
        };
        let changed_by = context.actor_id;

        self.executor
            .execute(sale_id, action, idempotency_key, context, |sale, now| {
                sale.transition_status(command.status, changed_by, now)
            })
            .await
    }

    pub async fn cancel_sale(
        &self,
        sale_id: Uuid,
        command: CancelSaleCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<CommandOutcome, AppError> {
        let cancelled_by = context.actor_id;

        let outcome = self
            .executor
            .execute(
                sale_id,
                AuditAction::SaleCancelled,
                idempotency_key,
                context,
                |sale, now| sale.cancel(command.reason.clone(), cancelled_by, now),
            )
            .await?;

        tracing::info!(
            sale_id = %sale_id,
            reason = %command.reason,
            cancelled_by = ?cancelled_by,
            "Sale cancelled"
        );
        Ok(outcome)
    }
}
