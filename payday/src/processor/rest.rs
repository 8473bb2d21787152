//! HTTPS client for the card/bank processor
//!
//! Thin JSON client over the processor's REST API. Every call has a
//! bounded timeout and no automatic retry: a retried charge risks a
//! double charge, and recovering from an unknown outcome is
//! reconciliation's job, not the transport's.

use async_trait::async_trait;
use patron_types::Cents;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ProcessorError, ProcessorResult};
use super::{Hold, Processor, ProcessorTransaction, TransactionOutcome};
use crate::config::PaydayConfig;

pub struct RestProcessor {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: std::time::Duration,
}

#[derive(Debug, Serialize)]
struct HoldRequest<'a> {
    card_ref: &'a str,
    participant_id: &'a str,
    amount_cents: i64,
    marker: &'a str,
}

#[derive(Debug, Deserialize)]
struct HoldResponse {
    id: String,
    amount_cents: i64,
}

#[derive(Debug, Serialize)]
struct CaptureRequest<'a> {
    amount_cents: i64,
    reference: &'a str,
}

#[derive(Debug, Serialize)]
struct CreditRequest<'a> {
    bank_ref: &'a str,
    participant_id: &'a str,
    amount_cents: i64,
    reference: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreditResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct HoldListResponse {
    holds: Vec<HoldListItem>,
}

#[derive(Debug, Deserialize)]
struct HoldListItem {
    id: String,
    participant_id: String,
    amount_cents: i64,
}

#[derive(Debug, Deserialize)]
struct TransactionListResponse {
    transactions: Vec<TransactionItem>,
}

#[derive(Debug, Deserialize)]
struct TransactionItem {
    reference: String,
    status: String,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl RestProcessor {
    pub fn new(config: &PaydayConfig) -> ProcessorResult<Self> {
        let client = Client::builder()
            .timeout(config.processor_timeout)
            .user_agent("patron-payday/0.3")
            .build()
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.processor_base_url.trim_end_matches('/').to_string(),
            api_key: config.processor_api_key.clone(),
            timeout: config.processor_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProcessorError {
        if e.is_timeout() {
            ProcessorError::Timeout(self.timeout)
        } else {
            ProcessorError::Transport(e.to_string())
        }
    }

    /// Turn a non-success HTTP response into the right error class.
    /// 402 is the processor's decline status; everything else non-2xx is
    /// a rejected request.
    async fn map_error_response(&self, response: reqwest::Response) -> ProcessorError {
        let status = response.status();
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| format!("HTTP {}", status));
        if status == StatusCode::PAYMENT_REQUIRED {
            ProcessorError::Declined(message)
        } else if status == StatusCode::NOT_FOUND {
            ProcessorError::HoldNotFound(message)
        } else {
            ProcessorError::Rejected(message)
        }
    }

    fn parse_outcome(status: &str) -> TransactionOutcome {
        match status {
            "succeeded" => TransactionOutcome::Succeeded,
            "failed" => TransactionOutcome::Failed,
            _ => TransactionOutcome::Pending,
        }
    }
}

#[async_trait]
impl Processor for RestProcessor {
    async fn create_hold(
        &self,
        card_ref: &str,
        participant_id: &str,
        amount: Cents,
        marker: &str,
    ) -> ProcessorResult<Hold> {
        debug!(participant_id, %amount, "Creating card hold");
        let response = self
            .client
            .post(self.url("/v1/holds"))
            .bearer_auth(&self.api_key)
            .json(&HoldRequest {
                card_ref,
                participant_id,
                amount_cents: amount.cents(),
                marker,
            })
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }

        let body: HoldResponse = response
            .json()
            .await
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        Ok(Hold {
            id: body.id,
            participant_id: participant_id.to_string(),
            amount: Cents(body.amount_cents),
            marker: marker.to_string(),
        })
    }

    async fn capture_hold(
        &self,
        hold: &Hold,
        amount: Cents,
        reference: &str,
    ) -> ProcessorResult<()> {
        debug!(hold_id = %hold.id, %amount, "Capturing card hold");
        let response = self
            .client
            .post(self.url(&format!("/v1/holds/{}/capture", hold.id)))
            .bearer_auth(&self.api_key)
            .json(&CaptureRequest {
                amount_cents: amount.cents(),
                reference,
            })
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }
        Ok(())
    }

    async fn void_hold(&self, hold: &Hold) -> ProcessorResult<()> {
        debug!(hold_id = %hold.id, "Voiding card hold");
        let response = self
            .client
            .post(self.url(&format!("/v1/holds/{}/void", hold.id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }
        Ok(())
    }

    async fn credit(
        &self,
        bank_ref: &str,
        participant_id: &str,
        amount: Cents,
        reference: &str,
    ) -> ProcessorResult<TransactionOutcome> {
        debug!(participant_id, %amount, "Issuing bank credit");
        let response = self
            .client
            .post(self.url("/v1/credits"))
            .bearer_auth(&self.api_key)
            .json(&CreditRequest {
                bank_ref,
                participant_id,
                amount_cents: amount.cents(),
                reference,
            })
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }

        let body: CreditResponse = response
            .json()
            .await
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;
        Ok(Self::parse_outcome(&body.status))
    }

    async fn find_holds(&self, marker: &str) -> ProcessorResult<Vec<Hold>> {
        let response = self
            .client
            .get(self.url("/v1/holds"))
            .bearer_auth(&self.api_key)
            .query(&[("marker", marker), ("state", "held")])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }

        let body: HoldListResponse = response
            .json()
            .await
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        Ok(body
            .holds
            .into_iter()
            .map(|h| Hold {
                id: h.id,
                participant_id: h.participant_id,
                amount: Cents(h.amount_cents),
                marker: marker.to_string(),
            })
            .collect())
    }

    async fn find_transaction(
        &self,
        reference: &str,
    ) -> ProcessorResult<Option<ProcessorTransaction>> {
        let response = self
            .client
            .get(self.url("/v1/transactions"))
            .bearer_auth(&self.api_key)
            .query(&[("reference", reference)])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }

        let body: TransactionListResponse = response
            .json()
            .await
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        Ok(body
            .transactions
            .into_iter()
            .find(|t| t.reference == reference)
            .map(|t| ProcessorTransaction {
                reference: t.reference,
                outcome: Self::parse_outcome(&t.status),
                error: t.error,
            }))
    }
}
