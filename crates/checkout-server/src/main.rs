//! Checkout Operator Server
//!
//! Axum-based server that owns the reconciliation queue: clients hand over
//! payments that were captured but not recorded, a background loop retries
//! recording them, and Stripe webhooks mark them gateway-confirmed.

mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checkout_core::{CheckoutConfig, MemoryReconciliationQueue, ReconciliationQueue, Reconciler};
use checkout_payments::WebhookHandler;
use checkout_runtime::{BackendConfig, HttpTransactionRecorder};

use crate::handlers::{
    enqueue_reconciliation, health_check, list_reconciliation, price_summary, resolve_reconciliation,
    retry_reconciliation, stripe_webhook,
};
use crate::state::AppState;

fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))
        // Pricing
        .route("/api/price-summary", post(price_summary))
        // Reconciliation
        .route(
            "/api/reconciliation",
            get(list_reconciliation).post(enqueue_reconciliation),
        )
        .route("/api/reconciliation/retry", post(retry_reconciliation))
        .route("/api/reconciliation/{payment_ref}", delete(resolve_reconciliation))
        // Gateway
        .route("/webhook/stripe", post(stripe_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let checkout = CheckoutConfig::from_env()?;
    let backend = BackendConfig::from_env();
    tracing::info!(
        platform = checkout.platform.as_str(),
        fee_rate = %checkout.fee_rate,
        backend = %backend.base_url,
        "Loaded configuration"
    );

    // Reconciliation
    let queue: Arc<dyn ReconciliationQueue> =
        Arc::new(MemoryReconciliationQueue::new(checkout.retry_policy.clone()));
    let recorder = Arc::new(HttpTransactionRecorder::new(&backend)?);
    let reconciler = Arc::new(Reconciler::new(
        queue.clone(),
        recorder,
        checkout.retry_policy.clone(),
    ));

    let poll_secs = std::env::var("RECONCILER_POLL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(15);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let reconciler_task = tokio::spawn(
        reconciler
            .clone()
            .run(Duration::from_secs(poll_secs), shutdown_rx),
    );

    // Webhooks
    let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
        .ok()
        .filter(|s| !s.trim().is_empty());
    if webhook_secret.is_some() {
        tracing::info!("✓ Stripe webhook configured");
    } else {
        tracing::warn!("⚠ Stripe webhook not configured - /webhook/stripe disabled");
        tracing::warn!("  Set STRIPE_WEBHOOK_SECRET in .env");
    }

    // Build application state
    let state = AppState {
        checkout: Arc::new(checkout),
        webhook: Arc::new(WebhookHandler::new(queue.clone())),
        queue,
        reconciler,
        webhook_secret: webhook_secret.map(Arc::from),
    };

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("checkout-server running on http://{}", addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health                           - Health and queue depth");
    tracing::info!("  POST   /api/price-summary                - Price line items");
    tracing::info!("  GET    /api/reconciliation               - List queued payments");
    tracing::info!("  POST   /api/reconciliation               - Queue a captured payment");
    tracing::info!("  DELETE /api/reconciliation/{{payment_ref}} - Resolve an entry");
    tracing::info!("  POST   /api/reconciliation/retry         - Run a reconciliation pass");
    tracing::info!("  POST   /webhook/stripe                   - Stripe events");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
        })
        .await?;

    // Stop the reconciler after in-flight requests finish
    let _ = shutdown_tx.send(true);
    reconciler_task.await?;

    Ok(())
}
