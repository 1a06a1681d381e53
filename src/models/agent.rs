use serde::Serialize;

pub const BOT_USER_PREFIX: &str = "ai-bot-";
pub const BOT_DISPLAY_NAME: &str = "AI Writing Assistant";
pub const DEFAULT_CHANNEL_TYPE: &str = "messaging";

/// Bot user id for the agent bound to `channel_id`. Channel ids may carry
/// `!` (distinct-member channels) which user ids do not accept.
pub fn bot_user_id(channel_id: &str) -> String {
    format!("{}{}", BOT_USER_PREFIX, channel_id.replace('!', ""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Connected,
    Connecting,
    Disconnected,
}
