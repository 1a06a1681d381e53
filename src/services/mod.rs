use std::sync::Arc;

use crate::utils::event_bus::EventBus;

pub mod agent;
pub mod agent_controller;
pub mod agent_registry;
pub mod assistant;
pub mod chat_client;
pub mod response_handler;
pub mod web_search;

#[cfg(test)]
pub mod testing;

use self::assistant::AssistantApi;
use self::chat_client::ChatBackend;
use self::web_search::WebSearch;

/// External collaborators shared by agents and their response handlers.
#[derive(Clone)]
pub struct RelayClients {
    pub chat: Arc<dyn ChatBackend>,
    pub assistant: Arc<dyn AssistantApi>,
    pub search: Arc<dyn WebSearch>,
    pub events: EventBus,
}
