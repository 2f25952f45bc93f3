//! Reconciliation Sink over HTTP
//!
//! Client side of the operator server's queue: captured-but-unrecorded
//! payments are handed over so they survive the client going away.

use async_trait::async_trait;
use reqwest::Client;

use checkout_core::error::{CheckoutError, Result};
use checkout_core::model::PaymentReference;
use checkout_core::reconciliation::{ReconciliationEntry, ReconciliationSink, ReconciliationTicket};

use crate::backend::{backend_client, describe_failure, transport};
use crate::config::{BackendConfig, join};

pub struct HttpReconciliationSink {
    client: Client,
    base_url: String,
}

impl HttpReconciliationSink {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            client: backend_client(config)?,
            base_url: config.reconciliation_url.clone(),
        })
    }

    fn queue_url(&self) -> String {
        join(&self.base_url, "/api/reconciliation")
    }
}

#[async_trait]
impl ReconciliationSink for HttpReconciliationSink {
    async fn enqueue(&self, ticket: ReconciliationTicket) -> Result<()> {
        let response = self
            .client
            .post(self.queue_url())
            .json(&ticket)
            .send()
            .await
            .map_err(|e| transport(&e))?;

        if !response.status().is_success() {
            return Err(CheckoutError::Storage(describe_failure(response).await));
        }
        tracing::info!(payment_ref = %ticket.payment_ref, "Handed payment to reconciliation queue");
        Ok(())
    }

    async fn resolve(&self, payment_ref: &PaymentReference) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{}", self.queue_url(), payment_ref.as_str()))
            .send()
            .await
            .map_err(|e| transport(&e))?;

        // Already gone is as good as removed
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(CheckoutError::Storage(describe_failure(response).await));
        }
        Ok(())
    }

    async fn pending_for_cart(&self, cart_id: &str) -> Result<bool> {
        let response = self
            .client
            .get(self.queue_url())
            .query(&[("cart_id", cart_id)])
            .send()
            .await
            .map_err(|e| transport(&e))?;

        if !response.status().is_success() {
            return Err(CheckoutError::Storage(describe_failure(response).await));
        }

        let body = response.text().await.map_err(|e| transport(&e))?;
        let entries: Vec<ReconciliationEntry> = serde_json::from_str(&body)?;
        Ok(!entries.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_url() {
        let config = BackendConfig {
            reconciliation_url: "http://ops.internal:3000/".into(),
            ..BackendConfig::default()
        };
        let sink = HttpReconciliationSink::new(&config).unwrap();
        assert_eq!(sink.queue_url(), "http://ops.internal:3000/api/reconciliation");
    }
}
