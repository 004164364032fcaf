//! Common test utilities
//!
//! An in-memory application with a pinned clock and two API keys.

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use tower::util::ServiceExt;

use sale_ledger::api::AppState;
use sale_ledger::app;
use sale_ledger::audit::sha256_hex;
use sale_ledger::config::{ApiKeyConfig, StoreBackend};
use sale_ledger::domain::FixedClock;
use sale_ledger::Config;

pub const ADMIN_KEY: &str = "test_key_123";
pub const READ_ONLY_KEY: &str = "test_key_readonly";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: FixedClock,
}

/// Fresh in-memory application; every test gets its own store
pub fn setup_test_app() -> TestApp {
    let config = Config {
        store_backend: StoreBackend::Memory,
        api_keys: vec![
            ApiKeyConfig::new("Test Key", &sha256_hex(ADMIN_KEY), vec!["admin".to_string()]),
            ApiKeyConfig::new(
                "Read Only",
                &sha256_hex(READ_ONLY_KEY),
                vec!["sales:read".to_string()],
            ),
        ],
        ..Config::default()
    };

    let clock = FixedClock::new(t0());
    let state = app::memory_state(config, Arc::new(clock.clone()));
    TestApp {
        router: app::build_router(state.clone()),
        state,
        clock,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request("POST", uri, ADMIN_KEY, body)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("X-API-Key", ADMIN_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

pub fn json_request(method: &str, uri: &str, api_key: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("X-API-Key", api_key)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Decimal fields travel as strings; compare by value, not by scale
pub fn dec(value: &Value) -> Decimal {
    let raw = value
        .as_str()
        .unwrap_or_else(|| panic!("expected decimal string, got {}", value));
    Decimal::from_str(raw).unwrap()
}
