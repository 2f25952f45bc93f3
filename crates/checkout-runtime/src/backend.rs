//! Marketplace Backend over HTTP
//!
//! Payment-intent and publishable-key endpoints, plus the transactions ledger.

use async_trait::async_trait;
use reqwest::{Client, Response};

use checkout_core::error::{CheckoutError, Result};
use checkout_core::gateway::{IntentRequest, PaymentBackend};
use checkout_core::ledger::{LedgerAck, Transaction, TransactionRecord, TransactionRecorder};

use crate::config::BackendConfig;

/// Shared HTTP client for backend calls
pub fn backend_client(config: &BackendConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| CheckoutError::Config(format!("HTTP client: {e}")))
}

/// `"<status>: <body>"` for a non-success response
pub(crate) async fn describe_failure(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    }
}

pub(crate) fn transport(e: &reqwest::Error) -> CheckoutError {
    CheckoutError::Network(e.to_string())
}

/// Payment-intent and publishable-key endpoints
pub struct HttpPaymentBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpPaymentBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        Ok(Self {
            client: backend_client(&config)?,
            config,
        })
    }

    pub fn with_client(client: Client, config: BackendConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl PaymentBackend for HttpPaymentBackend {
    async fn post_payment_intent(&self, request: &IntentRequest) -> Result<String> {
        let response = self
            .client
            .post(self.config.intent_url())
            .json(request)
            .send()
            .await
            .map_err(|e| transport(&e))?;

        if !response.status().is_success() {
            return Err(CheckoutError::IntentCreationFailed(describe_failure(response).await));
        }

        response.text().await.map_err(|e| transport(&e))
    }

    async fn fetch_publishable_key(&self, environment_code: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(self.config.key_url(environment_code))
            .send()
            .await
            .map_err(|e| transport(&e))?;

        if !response.status().is_success() {
            return Err(CheckoutError::KeyResolutionFailed(describe_failure(response).await));
        }

        let body = response.text().await.map_err(|e| transport(&e))?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Transactions endpoint
pub struct HttpTransactionRecorder {
    client: Client,
    url: String,
}

impl HttpTransactionRecorder {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            client: backend_client(config)?,
            url: config.transactions_url(),
        })
    }

    pub fn with_client(client: Client, config: &BackendConfig) -> Self {
        Self {
            client,
            url: config.transactions_url(),
        }
    }
}

/// Read a transactions reply; a body that is not an ack is a failure
pub fn parse_ack(body: &str) -> Result<LedgerAck> {
    serde_json::from_str(body)
        .map_err(|e| CheckoutError::RecordingFailed(format!("unreadable transactions reply: {e}")))
}

#[async_trait]
impl TransactionRecorder for HttpTransactionRecorder {
    async fn record(&self, record: &TransactionRecord) -> Result<Transaction> {
        // Every failure here is a recording failure: the caller decides whether money moved
        let response = self
            .client
            .post(&self.url)
            .json(record)
            .send()
            .await
            .map_err(|e| CheckoutError::RecordingFailed(format!("transport: {e}")))?;

        if !response.status().is_success() {
            return Err(CheckoutError::RecordingFailed(describe_failure(response).await));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CheckoutError::RecordingFailed(format!("transport: {e}")))?;

        let transaction = parse_ack(&body)?.into_transaction(record.clone())?;
        tracing::info!(
            business_id = %record.business_id,
            payment_ref = ?record.stripe_payment_intent,
            transaction_id = ?transaction.transaction_id,
            "Transaction recorded"
        );
        Ok(transaction)
    }
}
