use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::server::{CreatedOrder, ErrorBody};
use crate::error::Error;
use crate::models::{ConditionalOrder, OrderDraft, OrderPatch};
use crate::Result;

/// Client for a running daemon's control API
///
/// Method signatures mirror `TriggerStore`, so callers can switch between
/// the two without caring which one owns the orders file.
#[derive(Debug, Clone)]
pub struct ControlClient {
    client: Client,
    base_url: String,
}

impl ControlClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<()> {
        let response = self.client.get(self.url("/health")).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Control(format!("health check returned {}", response.status())))
        }
    }

    pub async fn list(&self, active: bool) -> Result<Vec<ConditionalOrder>> {
        let response = self
            .client
            .get(self.url("/v1/orders"))
            .query(&[("active", active)])
            .send()
            .await?;
        decode(response).await
    }

    pub async fn get(&self, id: u64) -> Result<Option<ConditionalOrder>> {
        let response = self
            .client
            .get(self.url(&format!("/v1/orders/{}", id)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    pub async fn create(&self, draft: OrderDraft) -> Result<u64> {
        let response = self
            .client
            .post(self.url("/v1/orders"))
            .json(&draft)
            .send()
            .await?;
        let created: CreatedOrder = decode(response).await?;
        Ok(created.id)
    }

    /// `Ok(false)` when `id` is unknown
    pub async fn update_fields(&self, id: u64, patch: OrderPatch) -> Result<bool> {
        let response = self
            .client
            .patch(self.url(&format!("/v1/orders/{}", id)))
            .json(&patch)
            .send()
            .await?;
        exists(response).await
    }

    pub async fn cancel(&self, id: u64) -> Result<bool> {
        let response = self
            .client
            .post(self.url(&format!("/v1/orders/{}/cancel", id)))
            .send()
            .await?;
        exists(response).await
    }

    pub async fn delete(&self, id: u64) -> Result<bool> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/orders/{}", id)))
            .send()
            .await?;
        exists(response).await
    }
}

async fn exists(response: Response) -> Result<bool> {
    match response.status() {
        StatusCode::NOT_FOUND => Ok(false),
        status if status.is_success() => Ok(true),
        _ => Err(rejection(response).await),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(rejection(response).await);
    }
    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| Error::Control(format!("unexpected response: {}", e)))
}

/// Map an error response back onto the crate's error kinds
async fn rejection(response: Response) -> Error {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return e.into(),
    };
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) => err.message,
        Err(_) => format!("HTTP {}: {}", status, body),
    };

    if status == StatusCode::BAD_REQUEST {
        Error::Validation(message)
    } else {
        Error::Control(message)
    }
}
