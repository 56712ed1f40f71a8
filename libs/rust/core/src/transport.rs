//! Push-delivery seam between the round driver and the wire.
//!
//! The coordinator never owns an HTTP client directly; the service
//! supplies an implementation with per-call timeouts.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::ModelPush;

#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Delivers one round's model push to a node endpoint. A failure
    /// here costs that node its participation in the round, nothing more.
    async fn push_model(&self, endpoint: &str, push: &ModelPush) -> Result<()>;
}
