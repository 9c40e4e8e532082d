use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::FactorySettings;

#[derive(Debug, Serialize)]
pub struct FactoryDiner {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryItem {
    pub menu_id: Uuid,
    pub description: String,
    pub price: BigDecimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryOrder {
    pub id: Uuid,
    pub franchise_id: Uuid,
    pub store_id: Uuid,
    pub items: Vec<FactoryItem>,
}

#[derive(Debug, Serialize)]
pub struct FulfillmentRequest {
    pub diner: FactoryDiner,
    pub order: FactoryOrder,
}

/// What the factory hands back on success: a credential the diner can use
/// to verify the pizza, plus a diagnostic report link.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryReceipt {
    pub jwt: String,
    #[serde(default)]
    pub report_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FactoryFailureBody {
    #[serde(default)]
    report_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("factory rejected the order")]
    Rejected { report_url: Option<String> },
    #[error("factory unreachable: {0}")]
    Unreachable(String),
}

#[async_trait]
pub trait PizzaFactory: Send + Sync {
    async fn fulfill(&self, request: &FulfillmentRequest) -> Result<FactoryReceipt, FactoryError>;
}

/// Production client. One synchronous POST per order with a bounded
/// timeout and no retry.
pub struct HttpFactory {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpFactory {
    pub fn new(settings: &FactorySettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl PizzaFactory for HttpFactory {
    async fn fulfill(&self, request: &FulfillmentRequest) -> Result<FactoryReceipt, FactoryError> {
        let mut builder = self
            .client
            .post(format!("{}/api/order", self.base_url))
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| FactoryError::Unreachable(err.to_string()))?;

        if response.status().is_success() {
            response
                .json::<FactoryReceipt>()
                .await
                .map_err(|err| FactoryError::Unreachable(err.to_string()))
        } else {
            let report_url = response
                .json::<FactoryFailureBody>()
                .await
                .ok()
                .and_then(|body| body.report_url);
            Err(FactoryError::Rejected { report_url })
        }
    }
}

/// In-process stand-in with a fixed outcome; lets suites exercise both
/// fulfillment paths without a live factory.
pub struct StubFactory {
    outcome: StubOutcome,
}

#[derive(Clone)]
pub enum StubOutcome {
    Succeed(FactoryReceipt),
    Reject { report_url: Option<String> },
}

impl StubFactory {
    pub fn succeeding(jwt: impl Into<String>, report_url: impl Into<String>) -> Self {
        Self {
            outcome: StubOutcome::Succeed(FactoryReceipt {
                jwt: jwt.into(),
                report_url: Some(report_url.into()),
            }),
        }
    }

    pub fn rejecting(report_url: impl Into<String>) -> Self {
        Self {
            outcome: StubOutcome::Reject {
                report_url: Some(report_url.into()),
            },
        }
    }
}

#[async_trait]
impl PizzaFactory for StubFactory {
    async fn fulfill(&self, _request: &FulfillmentRequest) -> Result<FactoryReceipt, FactoryError> {
        match &self.outcome {
            StubOutcome::Succeed(receipt) => Ok(receipt.clone()),
            StubOutcome::Reject { report_url } => Err(FactoryError::Rejected {
                report_url: report_url.clone(),
            }),
        }
    }
}
