// Canonical chat event type names
pub struct Events;

impl Events {
    pub const MESSAGE_NEW: &'static str = "message.new";
    pub const AI_INDICATOR_UPDATE: &'static str = "ai_indicator.update";
    pub const AI_INDICATOR_CLEAR: &'static str = "ai_indicator.clear";
    pub const AI_INDICATOR_STOP: &'static str = "ai_indicator.stop";
}
