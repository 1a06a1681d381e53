use serde::{Deserialize, Serialize};

use crate::utils::events::Events;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub channel_type: String,
    pub channel_id: String,
}

impl ChannelRef {
    pub fn new(channel_type: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            channel_type: channel_type.into(),
            channel_id: channel_id.into(),
        }
    }

    pub fn cid(&self) -> String {
        format!("{}:{}", self.channel_type, self.channel_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiState {
    #[serde(rename = "AI_STATE_THINKING")]
    Thinking,
    #[serde(rename = "AI_STATE_GENERATING")]
    Generating,
    #[serde(rename = "AI_STATE_CHECKING_SOURCES")]
    CheckingSources,
    #[serde(rename = "AI_STATE_ERROR")]
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user: Option<ChatUser>,
    #[serde(default)]
    pub ai_generated: bool,
}

/// Message created by the relay on behalf of a bot user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub id: String,
    pub text: String,
    pub user_id: String,
    pub ai_generated: bool,
}

/// Event pushed by the chat backend (webhook delivery).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub user: Option<ChatUser>,
}

impl ChatEvent {
    pub fn cid(&self) -> Option<String> {
        if let Some(cid) = self.cid.as_ref().filter(|c| !c.is_empty()) {
            return Some(cid.clone());
        }
        match (self.channel_type.as_deref(), self.channel_id.as_deref()) {
            (Some(kind), Some(id)) => Some(format!("{}:{}", kind, id)),
            _ => self.message.as_ref().and_then(|m| m.cid.clone()),
        }
    }

    pub fn target_message_id(&self) -> Option<&str> {
        self.message_id
            .as_deref()
            .or_else(|| self.message.as_ref().map(|m| m.id.as_str()))
    }
}

/// Channel-level "AI is typing/searching/erroring" signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_state: Option<AiState>,
    pub cid: String,
    pub message_id: String,
}

impl IndicatorEvent {
    pub fn update(state: AiState, cid: &str, message_id: &str) -> Self {
        Self {
            kind: Events::AI_INDICATOR_UPDATE,
            ai_state: Some(state),
            cid: cid.to_string(),
            message_id: message_id.to_string(),
        }
    }

    pub fn clear(cid: &str, message_id: &str) -> Self {
        Self {
            kind: Events::AI_INDICATOR_CLEAR,
            ai_state: None,
            cid: cid.to_string(),
            message_id: message_id.to_string(),
        }
    }
}
