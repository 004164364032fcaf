//! API Routes
//!
//! HTTP endpoint definitions. Amounts travel as decimal strings.

use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, ChainVerificationResult};
use crate::domain::{OperationContext, SaleEvent};
use crate::error::AppError;
use crate::handlers::{
    AddPaymentPlanCommand, CancelSaleCommand, CommandOutcome, CommissionAdjustmentCommand,
    CreateSaleCommand, ImportLegacySaleCommand, PlanOverdue, RecordCommissionPaymentCommand,
    RecordPaymentCommand, RefundPaymentCommand, ScheduleNextPaymentDueCommand,
    TransitionStatusCommand,
};
use crate::reconcile::{SaleStatement, SaleStatistics};

use super::middleware::AuthenticatedApiKey;
use super::AppState;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

const PERM_READ: &str = "sales:read";
const PERM_WRITE: &str = "sales:write";
const PERM_COMMISSION: &str = "commission:write";
const PERM_ADMIN: &str = "admin";

// =========================================================================
// Request/Response types
// =========================================================================

/// Result of any mutation
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub event_id: Uuid,
    pub event_type: &'static str,
    /// The idempotency key was already used; nothing new was written
    pub replayed: bool,
    pub event: SaleEvent,
    pub sale: SaleStatement,
}

#[derive(Debug, Default, Deserialize)]
pub struct AsOfQuery {
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub id: Uuid,
    pub event_type: String,
    pub version: i64,
    pub event_data: serde_json::Value,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EventsListResponse {
    pub sale_id: Uuid,
    pub events: Vec<EventResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/sales", post(create_sale))
        .route("/sales/import", post(import_legacy_sale))
        .route("/sales/:sale_id", get(get_sale))
        .route("/sales/:sale_id/statistics", get(get_statistics))
        .route("/sales/:sale_id/events", get(get_sale_events))
        .route("/sales/:sale_id/plans", post(add_payment_plan))
        .route("/sales/:sale_id/plans/:plan_id/payments", post(record_plan_payment))
        .route("/sales/:sale_id/plans/:plan_id/next-due", put(schedule_next_payment_due))
        .route("/sales/:sale_id/plans/:plan_id/overdue", get(is_plan_overdue))
        .route("/sales/:sale_id/payments", post(record_payment))
        .route("/sales/:sale_id/payments/:payment_id/confirm", post(confirm_payment))
        .route("/sales/:sale_id/payments/:payment_id/refund", post(refund_payment))
        .route("/sales/:sale_id/commission/payments", post(record_commission_payment))
        .route("/sales/:sale_id/commission/adjustments", post(record_commission_adjustment))
        .route("/sales/:sale_id/status", post(transition_status))
        .route("/sales/:sale_id/cancel", post(cancel_sale))
        .route("/admin/audit/verify", get(verify_audit_chain))
}

// =========================================================================
// Shared helpers
// =========================================================================

/// Deny with an audit entry when the key lacks `permission`
async fn require_permission(
    state: &AppState,
    api_key: &AuthenticatedApiKey,
    context: &OperationContext,
    permission: &str,
) -> Result<(), AppError> {
    if api_key.has_permission(permission) {
        return Ok(());
    }

    tracing::warn!(
        api_key = %api_key.name,
        permission = permission,
        "Permission denied"
    );
    let entry = AuditLogBuilder::new(AuditAction::PermissionDenied)
        .resource_type("ApiKey")
        .resource_id(api_key.id)
        .after_state(&serde_json::json!({ "required_permission": permission }));
    if let Err(e) = state.audit.log(entry, context).await {
        tracing::error!(error = %e, "Failed to audit permission denial");
    }

    Err(AppError::PermissionDenied)
}

/// A present but malformed key is rejected rather than ignored
fn idempotency_key(headers: &HeaderMap) -> Result<Option<Uuid>, AppError> {
    match headers.get(IDEMPOTENCY_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(Some)
            .ok_or_else(|| AppError::InvalidRequest("Idempotency-Key must be a UUID".to_string())),
    }
}

fn respond(
    state: &AppState,
    outcome: CommandOutcome,
    created: bool,
) -> (StatusCode, Json<CommandResponse>) {
    let executor = state.commands.executor();
    let statement = SaleStatement::build(&outcome.sale, executor.policy(), executor.now());
    let status = if created && !outcome.replayed {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(CommandResponse {
            event_id: outcome.event_id,
            event_type: outcome.event.event_type(),
            replayed: outcome.replayed,
            event: outcome.event,
            sale: statement,
        }),
    )
}

type CommandResult = Result<(StatusCode, Json<CommandResponse>), AppError>;

// =========================================================================
// POST /sales, POST /sales/import
// =========================================================================

async fn create_sale(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    headers: HeaderMap,
    Json(command): Json<CreateSaleCommand>,
) -> CommandResult {
    require_permission(&state, &api_key, &context, PERM_WRITE).await?;
    let key = idempotency_key(&headers)?;

    let outcome = state.commands.create_sale(command, key, &context).await?;
    Ok(respond(&state, outcome, true))
}

/// Ingest a record in any of the legacy payment shapes
async fn import_legacy_sale(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    headers: HeaderMap,
    Json(command): Json<ImportLegacySaleCommand>,
) -> CommandResult {
    require_permission(&state, &api_key, &context, PERM_WRITE).await?;
    let key = idempotency_key(&headers)?;

    let outcome = state.commands.import_legacy_sale(command, key, &context).await?;
    Ok(respond(&state, outcome, true))
}

// =========================================================================
// Read side
// =========================================================================

async fn get_sale(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path(sale_id): Path<Uuid>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<SaleStatement>, AppError> {
    require_permission(&state, &api_key, &context, PERM_READ).await?;
    let statement = state.queries.statement(sale_id, query.as_of).await?;
    Ok(Json(statement))
}

async fn get_statistics(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path(sale_id): Path<Uuid>,
) -> Result<Json<SaleStatistics>, AppError> {
    require_permission(&state, &api_key, &context, PERM_READ).await?;
    Ok(Json(state.queries.statistics(sale_id).await?))
}

async fn is_plan_overdue(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path((sale_id, plan_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<PlanOverdue>, AppError> {
    require_permission(&state, &api_key, &context, PERM_READ).await?;
    let answer = state
        .queries
        .is_plan_overdue(sale_id, plan_id, query.as_of)
        .await?;
    Ok(Json(answer))
}

async fn get_sale_events(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path(sale_id): Path<Uuid>,
) -> Result<Json<EventsListResponse>, AppError> {
    require_permission(&state, &api_key, &context, PERM_READ).await?;

    let events: Vec<EventResponse> = state
        .queries
        .events(sale_id)
        .await?
        .into_iter()
        .map(|e| EventResponse {
            id: e.id,
            event_type: e.event_type,
            version: e.version,
            event_data: e.event_data,
            context: e.context,
            created_at: e.created_at,
        })
        .collect();

    Ok(Json(EventsListResponse {
        sale_id,
        total: events.len(),
        events,
    }))
}

// =========================================================================
// Plans and client payments
// =========================================================================

async fn add_payment_plan(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path(sale_id): Path<Uuid>,
    headers: HeaderMap,
    Json(command): Json<AddPaymentPlanCommand>,
) -> CommandResult {
    require_permission(&state, &api_key, &context, PERM_WRITE).await?;
    let key = idempotency_key(&headers)?;

    let outcome = state
        .commands
        .add_payment_plan(sale_id, command, key, &context)
        .await?;
    Ok(respond(&state, outcome, true))
}

async fn schedule_next_payment_due(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path((sale_id, plan_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(command): Json<ScheduleNextPaymentDueCommand>,
) -> CommandResult {
    require_permission(&state, &api_key, &context, PERM_WRITE).await?;
    let key = idempotency_key(&headers)?;

    let outcome = state
        .commands
        .schedule_next_payment_due(sale_id, plan_id, command, key, &context)
        .await?;
    Ok(respond(&state, outcome, false))
}

/// Direct payment, or against `plan_id` given in the body
async fn record_payment(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path(sale_id): Path<Uuid>,
    headers: HeaderMap,
    Json(command): Json<RecordPaymentCommand>,
) -> CommandResult {
    require_permission(&state, &api_key, &context, PERM_WRITE).await?;
    let key = idempotency_key(&headers)?;

    let outcome = state
        .commands
        .record_payment(sale_id, None, command, key, &context)
        .await?;
    Ok(respond(&state, outcome, true))
}

async fn record_plan_payment(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path((sale_id, plan_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(command): Json<RecordPaymentCommand>,
) -> CommandResult {
    require_permission(&state, &api_key, &context, PERM_WRITE).await?;
    let key = idempotency_key(&headers)?;

    let outcome = state
        .commands
        .record_payment(sale_id, Some(plan_id), command, key, &context)
        .await?;
    Ok(respond(&state, outcome, true))
}

async fn confirm_payment(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path((sale_id, payment_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> CommandResult {
    require_permission(&state, &api_key, &context, PERM_WRITE).await?;
    let key = idempotency_key(&headers)?;

    let outcome = state
        .commands
        .confirm_payment(sale_id, payment_id, key, &context)
        .await?;
    Ok(respond(&state, outcome, false))
}

async fn refund_payment(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path((sale_id, payment_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    Json(command): Json<RefundPaymentCommand>,
) -> CommandResult {
    require_permission(&state, &api_key, &context, PERM_WRITE).await?;
    let key = idempotency_key(&headers)?;

    let outcome = state
        .commands
        .refund_payment(sale_id, payment_id, command, key, &context)
        .await?;
    Ok(respond(&state, outcome, false))
}

// =========================================================================
// Commission
// =========================================================================

async fn record_commission_payment(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path(sale_id): Path<Uuid>,
    headers: HeaderMap,
    Json(command): Json<RecordCommissionPaymentCommand>,
) -> CommandResult {
    require_permission(&state, &api_key, &context, PERM_COMMISSION).await?;
    let key = idempotency_key(&headers)?;

    let outcome = state
        .commands
        .record_commission_payment(sale_id, command, key, &context)
        .await?;
    Ok(respond(&state, outcome, true))
}

async fn record_commission_adjustment(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path(sale_id): Path<Uuid>,
    headers: HeaderMap,
    Json(command): Json<CommissionAdjustmentCommand>,
) -> CommandResult {
    require_permission(&state, &api_key, &context, PERM_COMMISSION).await?;
    let key = idempotency_key(&headers)?;

    let outcome = state
        .commands
        .record_commission_adjustment(sale_id, command, key, &context)
        .await?;
    Ok(respond(&state, outcome, true))
}

// =========================================================================
// Status
// =========================================================================

async fn transition_status(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path(sale_id): Path<Uuid>,
    headers: HeaderMap,
    Json(command): Json<TransitionStatusCommand>,
) -> CommandResult {
    require_permission(&state, &api_key, &context, PERM_WRITE).await?;
    let key = idempotency_key(&headers)?;

    let outcome = state
        .commands
        .transition_status(sale_id, command, key, &context)
        .await?;
    Ok(respond(&state, outcome, false))
}

async fn cancel_sale(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Path(sale_id): Path<Uuid>,
    headers: HeaderMap,
    Json(command): Json<CancelSaleCommand>,
) -> CommandResult {
    require_permission(&state, &api_key, &context, PERM_WRITE).await?;
    let key = idempotency_key(&headers)?;

    let outcome = state
        .commands
        .cancel_sale(sale_id, command, key, &context)
        .await?;
    Ok(respond(&state, outcome, false))
}

// =========================================================================
// GET /admin/audit/verify
// =========================================================================

async fn verify_audit_chain(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Extension(api_key): Extension<AuthenticatedApiKey>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<ChainVerificationResult>, AppError> {
    require_permission(&state, &api_key, &context, PERM_ADMIN).await?;

    let result = state.audit.verify_hash_chain(query.limit).await?;
    if !result.is_valid {
        tracing::error!(
            first_invalid_entry = ?result.first_invalid_entry,
            entries_checked = result.entries_checked,
            "Audit hash chain is broken"
        );
    }
    Ok(Json(result))
}
