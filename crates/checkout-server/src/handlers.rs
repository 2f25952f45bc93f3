//! HTTP Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};

use checkout_core::error::CheckoutError;
use checkout_core::model::{LineItem, PaymentReference, Platform};
use checkout_core::pricing::{PriceAggregator, SkippedItem};
use checkout_core::reconciliation::{
    EntryState, ReconcileReport, ReconciliationEntry, ReconciliationQueue, ReconciliationSink, ReconciliationTicket,
};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub webhook_configured: bool,
    pub pending: usize,
    pub escalated: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Deserialize)]
pub struct PriceSummaryRequest {
    pub items: Vec<LineItem>,
    /// Defaults to the server's configured platform
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Serialize)]
pub struct PriceLine {
    pub item_id: String,
    pub quantity: u32,
    pub unit_cost: String,
    pub line_total: String,
}

#[derive(Debug, Serialize)]
pub struct PriceSummaryResponse {
    pub platform: Platform,
    pub lines: Vec<PriceLine>,
    pub subtotal: String,
    pub fee: String,
    pub total: String,
    pub fee_applied: bool,
    pub skipped: Vec<SkippedItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueFilter {
    #[serde(default)]
    pub cart_id: Option<String>,
    #[serde(default)]
    pub state: Option<EntryState>,
}

// ============================================================================
// Error mapping
// ============================================================================

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

fn checkout_error(e: &CheckoutError) -> ApiError {
    match e {
        CheckoutError::InvalidAmount { .. } | CheckoutError::EmptyPurchase(_) => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_AMOUNT", e.to_string())
        }
        CheckoutError::Config(_) => api_error(StatusCode::BAD_REQUEST, "INVALID_REQUEST", e.to_string()),
        _ => {
            tracing::error!(error = %e, "Request failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Request failed")
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let entries = state.queue.list().await.unwrap_or_default();
    let escalated = entries.iter().filter(|e| e.state == EntryState::Escalated).count();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        webhook_configured: state.webhook_secret.is_some(),
        pending: entries.iter().filter(|e| e.state == EntryState::Pending).count(),
        escalated,
    })
}

/// Price a set of line items as checkout would
pub async fn price_summary(
    State(state): State<AppState>,
    Json(payload): Json<PriceSummaryRequest>,
) -> Result<Json<PriceSummaryResponse>, ApiError> {
    let platform = payload.platform.unwrap_or(state.checkout.platform);
    let fee_applied = platform.applies_fee();

    let summary = PriceAggregator::compute_summary(&payload.items, state.checkout.fee_rate, fee_applied)
        .map_err(|e| checkout_error(&e))?;

    Ok(Json(PriceSummaryResponse {
        platform,
        lines: summary
            .lines
            .iter()
            .map(|l| PriceLine {
                item_id: l.item.id().to_string(),
                quantity: l.quantity,
                unit_cost: checkout_core::pricing::format_money(l.unit_cost),
                line_total: checkout_core::pricing::format_money(l.line_total),
            })
            .collect(),
        subtotal: summary.subtotal_display(),
        fee: summary.fee_display(),
        total: summary.total_display(),
        fee_applied,
        skipped: summary.skipped,
    }))
}

/// List queued reconciliation entries
pub async fn list_reconciliation(
    State(state): State<AppState>,
    Query(filter): Query<QueueFilter>,
) -> Result<Json<Vec<ReconciliationEntry>>, ApiError> {
    let entries = state.queue.list().await.map_err(|e| checkout_error(&e))?;

    Ok(Json(
        entries
            .into_iter()
            .filter(|e| {
                filter
                    .cart_id
                    .as_deref()
                    .is_none_or(|id| e.ticket.cart.as_ref().is_some_and(|c| c.cart_id == id))
            })
            .filter(|e| filter.state.is_none_or(|s| e.state == s))
            .collect(),
    ))
}

/// Accept a captured-but-unrecorded payment from a client
pub async fn enqueue_reconciliation(
    State(state): State<AppState>,
    Json(ticket): Json<ReconciliationTicket>,
) -> Result<StatusCode, ApiError> {
    if ticket.record.stripe_payment_intent.as_ref() != Some(&ticket.payment_ref) {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "TICKET_MISMATCH",
            "payment reference does not match the transaction record",
        ));
    }

    tracing::warn!(
        payment_ref = %ticket.payment_ref,
        buyer_id = %ticket.buyer_id,
        amount = %ticket.record.total_amount_paid,
        "Queued payment for reconciliation"
    );
    state.queue.enqueue(ticket).await.map_err(|e| checkout_error(&e))?;
    Ok(StatusCode::ACCEPTED)
}

/// Drop an entry once it has been recorded out of band
pub async fn resolve_reconciliation(
    State(state): State<AppState>,
    Path(payment_ref): Path<String>,
) -> Result<StatusCode, ApiError> {
    let payment_ref = PaymentReference::new(payment_ref);
    state.queue.resolve(&payment_ref).await.map_err(|e| checkout_error(&e))?;
    tracing::info!(payment_ref = %payment_ref, "Reconciliation entry resolved");
    Ok(StatusCode::NO_CONTENT)
}

/// Run one reconciliation pass now
pub async fn retry_reconciliation(State(state): State<AppState>) -> Result<Json<ReconcileReport>, ApiError> {
    let report = state
        .reconciler
        .run_once(chrono::Utc::now())
        .await
        .map_err(|e| checkout_error(&e))?;
    Ok(Json(report))
}

/// Stripe webhook handler
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let secret = state.webhook_secret.as_ref().ok_or_else(|| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "WEBHOOK_DISABLED",
            "Webhook secret not configured",
        )
    })?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "MISSING_SIGNATURE", "Missing Stripe signature"))?;

    let event = state.webhook.parse_event(&body, signature, secret).map_err(|e| {
        tracing::warn!(error = %e, "Webhook signature failed");
        api_error(StatusCode::BAD_REQUEST, "INVALID_SIGNATURE", "Invalid signature")
    })?;

    state.webhook.handle(event).await.map_err(|e| {
        tracing::error!(error = %e, "Webhook processing error");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "WEBHOOK_ERROR",
            "Webhook processing failed",
        )
    })?;

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use checkout_core::ledger::{Transaction, TransactionRecord, TransactionRecorder};
    use checkout_core::model::CartBinding;
    use checkout_core::{CheckoutConfig, MemoryReconciliationQueue, Reconciler, RetryPolicy};
    use checkout_payments::WebhookHandler;
    use tower::ServiceExt;

    struct OkRecorder;

    #[async_trait]
    impl TransactionRecorder for OkRecorder {
        async fn record(&self, record: &TransactionRecord) -> checkout_core::Result<Transaction> {
            Ok(Transaction {
                transaction_id: Some("tx-1".into()),
                record: record.clone(),
                recorded_at: chrono::Utc::now(),
            })
        }
    }

    fn state(webhook_secret: Option<&str>) -> AppState {
        let queue = Arc::new(MemoryReconciliationQueue::default());
        AppState {
            checkout: Arc::new(CheckoutConfig::default()),
            reconciler: Arc::new(Reconciler::new(queue.clone(), Arc::new(OkRecorder), RetryPolicy::default())),
            webhook: Arc::new(WebhookHandler::new(queue.clone())),
            queue,
            webhook_secret: webhook_secret.map(Arc::from),
        }
    }

    fn ticket() -> serde_json::Value {
        let ticket = ReconciliationTicket {
            payment_ref: PaymentReference::new("pi_5"),
            buyer_id: "buyer-1".into(),
            session_id: "s-1".into(),
            record: TransactionRecord {
                profile_id: "buyer-1".into(),
                business_id: "biz-1".into(),
                stripe_payment_intent: Some(PaymentReference::new("pi_5")),
                total_amount_paid: "20.00".into(),
                total_costs: "20.00".into(),
                total_taxes: "0.00".into(),
                items: Vec::new(),
            },
            cart: Some(CartBinding {
                cart_id: "buyer-1".into(),
                business_ids: vec!["biz-1".into()],
            }),
            // Already due
            failed_at: chrono::Utc::now() - chrono::Duration::minutes(5),
            outcome_unknown: false,
        };
        serde_json::to_value(ticket).unwrap()
    }

    async fn send(state: AppState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = crate::router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_price_summary_web_fee() {
        let body = serde_json::json!({
            "platform": "web",
            "items": [
                { "service_uid": "bs-1", "unit_cost": "10.00", "quantity": 1, "owner_id": "biz-1" },
                { "service_uid": "bs-1", "unit_cost": "10.00", "quantity": 1, "owner_id": "biz-1" }
            ]
        });
        let (status, json) = send(state(None), json_request("POST", "/api/price-summary", &body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["lines"][0]["quantity"], 2);
        assert_eq!(json["subtotal"], "20.00");
        assert_eq!(json["fee"], "0.60");
        assert_eq!(json["total"], "20.60");
    }

    #[tokio::test]
    async fn test_all_invalid_items_is_unprocessable() {
        let body = serde_json::json!({
            "items": [{ "service_uid": "bs-1", "unit_cost": "-1", "quantity": 1, "owner_id": "biz-1" }]
        });
        let (status, json) = send(state(None), json_request("POST", "/api/price-summary", &body)).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["code"], "INVALID_AMOUNT");
    }

    #[tokio::test]
    async fn test_queue_intake_filter_and_retry() {
        let state = state(None);

        let (status, _) = send(state.clone(), json_request("POST", "/api/reconciliation", &ticket())).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let get = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (_, listed) = send(state.clone(), get("/api/reconciliation?cart_id=buyer-1")).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        let (_, other) = send(state.clone(), get("/api/reconciliation?cart_id=buyer-2")).await;
        assert!(other.as_array().unwrap().is_empty());

        let retry = Request::builder()
            .method("POST")
            .uri("/api/reconciliation/retry")
            .body(Body::empty())
            .unwrap();
        let (status, report) = send(state.clone(), retry).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["recorded"][0], "pi_5");
        assert!(state.queue.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_removes_entry() {
        let state = state(None);
        send(state.clone(), json_request("POST", "/api/reconciliation", &ticket())).await;

        let delete = Request::builder()
            .method("DELETE")
            .uri("/api/reconciliation/pi_5")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(state.clone(), delete).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.queue.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_requires_configuration_and_signature() {
        let request = || {
            Request::builder()
                .method("POST")
                .uri("/webhook/stripe")
                .body(Body::from("{}"))
                .unwrap()
        };

        let (status, _) = send(state(None), request()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, json) = send(state(Some("whsec_test")), request()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "MISSING_SIGNATURE");
    }
}
