//! HTTP push delivery to node endpoints.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use swarmlearn_core::{ModelPush, ModelTransport};

pub struct HttpModelTransport {
    client: reqwest::Client,
}

impl HttpModelTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building push http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ModelTransport for HttpModelTransport {
    async fn push_model(&self, endpoint: &str, push: &ModelPush) -> Result<()> {
        let url = format!("{}/model_update", endpoint.trim_end_matches('/'));
        self.client
            .post(&url)
            .json(push)
            .send()
            .await
            .with_context(|| format!("pushing model to {url}"))?
            .error_for_status()
            .with_context(|| format!("push rejected by {url}"))?;
        Ok(())
    }
}
