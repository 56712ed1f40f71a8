//! Outbound HTTP calls to the coordinator.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use swarmlearn_core::{
    ApiResponse, ApiStatus, CoordinatorClient, ParameterSet, RegisterRequest, SubmitUpdateRequest,
};

pub struct HttpCoordinatorClient {
    client: reqwest::Client,
    base: String,
}

impl HttpCoordinatorClient {
    pub fn new(coordinator_endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building coordinator http client")?;
        Ok(Self { client, base: coordinator_endpoint.trim_end_matches('/').to_string() })
    }

    async fn post_checked<T: serde::Serialize>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{path}", self.base);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("calling {url}"))?;
        let status = resp.status();
        let api: ApiResponse = resp
            .json()
            .await
            .with_context(|| format!("decoding response from {url} (http {status})"))?;
        if api.status != ApiStatus::Success {
            bail!("coordinator rejected request to {url}: {}", api.message);
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinatorClient for HttpCoordinatorClient {
    async fn register(&self, node_id: &str, endpoint: &str) -> Result<()> {
        let req = RegisterRequest { node_id: node_id.to_string(), endpoint: endpoint.to_string() };
        self.post_checked("/register", &req).await
    }

    async fn submit_update(
        &self,
        node_id: &str,
        round_number: u64,
        parameters: &ParameterSet,
    ) -> Result<()> {
        let req = SubmitUpdateRequest {
            node_id: node_id.to_string(),
            round_number,
            parameters: parameters.clone(),
        };
        self.post_checked("/submit_model_update", &req).await
    }
}
