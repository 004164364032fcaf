//! API Middleware
//!
//! API key authentication, operation context and request logging.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::audit::sha256_hex;
use crate::config::Config;
use crate::domain::OperationContext;

use super::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const REQUEST_USER_HEADER: &str = "x-request-user-id";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// API Key authentication result
#[derive(Debug, Clone)]
pub struct AuthenticatedApiKey {
    pub id: Uuid,
    pub name: String,
    pub permissions: Vec<String>,
}

impl AuthenticatedApiKey {
    /// Stand-in used when no keys are configured outside production
    pub fn anonymous() -> Self {
        Self {
            id: Uuid::nil(),
            name: "anonymous".to_string(),
            permissions: vec!["admin".to_string()],
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_nil()
    }

    /// Check if this API key has a specific permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission || p == "admin")
    }
}

fn reject(status: StatusCode, error: &str, error_code: &str) -> Response {
    (
        status,
        Json(json!({
            "error": error,
            "error_code": error_code
        })),
    )
        .into_response()
}

/// Match the SHA-256 of the presented secret against the configured keys
pub fn authenticate(config: &Config, presented: &str) -> Option<AuthenticatedApiKey> {
    let hash = sha256_hex(presented);
    config
        .api_keys
        .iter()
        .find(|key| key.key_hash == hash)
        .map(|key| AuthenticatedApiKey {
            id: key.id,
            name: key.name.clone(),
            permissions: key.permissions.clone(),
        })
}

// =========================================================================
// API Key Authentication Middleware
// =========================================================================

/// Validate X-API-Key and build the operation context for the request
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let api_key = if state.config.auth_enabled() {
        let presented = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                reject(
                    StatusCode::UNAUTHORIZED,
                    "Missing X-API-Key header",
                    "missing_api_key",
                )
            })?;

        match authenticate(&state.config, presented) {
            Some(key) => key,
            None => {
                tracing::warn!("Rejected request with unknown API key");
                return Err(reject(
                    StatusCode::UNAUTHORIZED,
                    "Invalid API key",
                    "invalid_api_key",
                ));
            }
        }
    } else {
        AuthenticatedApiKey::anonymous()
    };

    let mut context = OperationContext::new();
    if !api_key.is_anonymous() {
        context = context.with_api_key(api_key.id);
    }

    if let Some(raw) = headers.get(REQUEST_USER_HEADER) {
        let actor_id = raw
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                reject(
                    StatusCode::BAD_REQUEST,
                    "Invalid X-Request-User-Id header format",
                    "invalid_user_id",
                )
            })?;
        context = context.with_actor(actor_id);
    }

    // Extract correlation ID or generate new one
    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    context = context.with_correlation_id(correlation_id);

    request.extensions_mut().insert(api_key);
    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;
    if let Ok(value) = correlation_id.to_string().parse() {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    Ok(response)
}

// =========================================================================
// Header masking
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["x-api-key", "authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Runs inside auth, so the correlation id is already in the extensions
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());
    let correlation_id = request
        .extensions()
        .get::<OperationContext>()
        .and_then(|ctx| ctx.correlation_id);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKeyConfig;

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("x-api-key", "secret-key-12345".parse().unwrap());
        headers.insert("x-request-user-id", "user-123".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);

        let api_key = masked.iter().find(|(k, _)| k == "x-api-key");
        let content_type = masked.iter().find(|(k, _)| k == "content-type");
        let user_id = masked.iter().find(|(k, _)| k == "x-request-user-id");

        assert_eq!(api_key.unwrap().1, "[REDACTED]");
        assert_eq!(content_type.unwrap().1, "application/json");
        assert_eq!(user_id.unwrap().1, "user-123");
    }

    #[test]
    fn test_authenticate_by_hash() {
        let config = Config {
            api_keys: vec![ApiKeyConfig::new(
                "backoffice",
                &sha256_hex("s3cret"),
                vec!["sales:read".to_string()],
            )],
            ..Config::default()
        };

        let key = authenticate(&config, "s3cret").unwrap();
        assert_eq!(key.name, "backoffice");
        assert!(key.has_permission("sales:read"));
        assert!(!key.has_permission("sales:write"));
        assert!(authenticate(&config, "wrong").is_none());
    }

    #[test]
    fn test_anonymous_key_is_admin() {
        let key = AuthenticatedApiKey::anonymous();
        assert!(key.is_anonymous());
        assert!(key.has_permission("commission:write"));
    }
}
