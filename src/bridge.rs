// ABOUTME: Interface seams for the out-of-scope collaborators.
// ABOUTME: Outbound chat rendering and the message-id to resume-token index.

use anyhow::Result;
use async_trait::async_trait;
use takopi_runner::{ActionEvent, CompletedEvent, ResumeToken, StartedEvent};

/// Outbound presentation layer: renders run progress and the final answer
/// into whatever chat surface hosts the bridge.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn started(&self, event: &StartedEvent) -> Result<()>;
    async fn action(&self, event: &ActionEvent) -> Result<()>;
    async fn completed(&self, event: &CompletedEvent) -> Result<()>;
}

/// Persistence seam mapping outbound message ids to the session that
/// produced them, so replies can resume the right conversation.
#[async_trait]
pub trait SessionIndex: Send + Sync {
    async fn token_for(&self, message_id: &str) -> Result<Option<ResumeToken>>;
    async fn record(&self, message_id: &str, token: &ResumeToken) -> Result<()>;
}
