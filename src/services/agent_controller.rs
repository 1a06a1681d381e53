use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::core::validation::normalize_non_empty_str;
use crate::error::{RelayError, Result};
use crate::models::agent::{bot_user_id, AgentStatus, BOT_DISPLAY_NAME, DEFAULT_CHANNEL_TYPE};
use crate::models::chat::{ChannelRef, ChatUser};
use crate::services::agent::AgentFactory;
use crate::services::agent_registry::AgentRegistry;
use crate::services::chat_client::ChatBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// An agent was already cached or being started for the channel.
    AlreadyRunning,
    /// Another start populated the cache while this one was initializing.
    Discarded,
}

/// Start/stop/status over the agent registry.
#[derive(Clone)]
pub struct AgentController {
    registry: AgentRegistry,
    chat: Arc<dyn ChatBackend>,
    factory: Arc<dyn AgentFactory>,
}

fn required_channel_id(channel_id: &str) -> Result<String> {
    normalize_non_empty_str(channel_id)
        .ok_or_else(|| RelayError::Validation("Missing required fields".to_string()))
}

impl AgentController {
    pub fn new(
        registry: AgentRegistry,
        chat: Arc<dyn ChatBackend>,
        factory: Arc<dyn AgentFactory>,
    ) -> Self {
        Self {
            registry,
            chat,
            factory,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn status(&self, channel_id: &str) -> AgentStatus {
        let user_id = bot_user_id(channel_id);
        if self.registry.has(&user_id) {
            AgentStatus::Connected
        } else if self.registry.is_pending(&user_id) {
            AgentStatus::Connecting
        } else {
            AgentStatus::Disconnected
        }
    }

    pub async fn start(&self, channel_id: &str, channel_type: Option<&str>) -> Result<StartOutcome> {
        let channel_id = required_channel_id(channel_id)?;
        let channel_type = channel_type
            .and_then(normalize_non_empty_str)
            .unwrap_or_else(|| DEFAULT_CHANNEL_TYPE.to_string());
        let user_id = bot_user_id(&channel_id);

        let Some(_pending) = self.registry.try_reserve(&user_id) else {
            info!("[AGENT] start skipped, agent exists or is starting: user={}", user_id);
            return Ok(StartOutcome::AlreadyRunning);
        };

        let channel = ChannelRef::new(channel_type, channel_id);
        self.chat
            .upsert_user(&ChatUser {
                id: user_id.clone(),
                name: Some(BOT_DISPLAY_NAME.to_string()),
            })
            .await?;
        self.chat
            .add_members(&channel, std::slice::from_ref(&user_id))
            .await?;

        let agent = self.factory.create(&user_id, channel.clone()).await?;
        if let Err(err) = agent.init().await {
            warn!("[AGENT] init failed: user={}, error={}", user_id, err);
            agent.dispose().await;
            return Err(err);
        }

        if self.registry.has(&user_id) {
            warn!("[AGENT] concurrent start won for {}, discarding new agent", user_id);
            agent.dispose().await;
            return Ok(StartOutcome::Discarded);
        }
        self.registry.set(&user_id, agent);
        info!("[AGENT] started: user={}, cid={}", user_id, channel.cid());
        Ok(StartOutcome::Started)
    }

    /// Returns whether an agent was found and stopped.
    pub async fn stop(&self, channel_id: &str) -> Result<bool> {
        let channel_id = required_channel_id(channel_id)?;
        let user_id = bot_user_id(&channel_id);

        let Some(agent) = self.registry.delete(&user_id) else {
            info!("[AGENT] stop: no agent for user={}", user_id);
            return Ok(false);
        };
        agent.dispose().await;
        self.chat.delete_user(&user_id, true).await?;
        info!("[AGENT] stopped: user={}", user_id);
        Ok(true)
    }

    /// Disposes agents idle for longer than `threshold`; returns their ids.
    pub async fn sweep_idle(&self, now_ms: i64, threshold: Duration) -> Vec<String> {
        let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
        let mut removed = Vec::new();
        for (user_id, agent) in self.registry.snapshot() {
            let idle_ms = now_ms.saturating_sub(agent.last_interaction());
            if idle_ms <= threshold_ms {
                continue;
            }
            if !self.registry.delete_if(&user_id, &agent) {
                continue;
            }
            info!(
                "[AGENT] disposing idle agent: user={}, idle_secs={}",
                user_id,
                idle_ms / 1000
            );
            agent.dispose().await;
            if let Err(err) = self.chat.delete_user(&user_id, true).await {
                warn!("[AGENT] idle bot user delete failed: user={}, error={}", user_id, err);
            }
            removed.push(user_id);
        }
        removed
    }

    pub async fn dispose_all(&self) {
        let agents = self.registry.drain();
        if agents.is_empty() {
            return;
        }
        info!("[AGENT] disposing {} agents on shutdown", agents.len());
        for agent in agents {
            agent.dispose().await;
        }
    }
}
