use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::time::now_millis;
use crate::error::{RelayError, Result};
use crate::models::chat::{AiState, ChannelRef, ChatEvent, IndicatorEvent, NewMessage};
use crate::services::assistant::AssistantSpec;
use crate::services::response_handler::ResponseHandler;
use crate::services::RelayClients;
use crate::utils::events::Events;

/// A bot participant attached to one channel.
#[async_trait]
pub trait AiAgent: Send + Sync {
    fn user_id(&self) -> &str;
    fn channel(&self) -> &ChannelRef;
    async fn init(&self) -> Result<()>;
    async fn dispose(&self);
    /// Millisecond timestamp of the last user message handled (creation time before that).
    fn last_interaction(&self) -> i64;
}

#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(&self, user_id: &str, channel: ChannelRef) -> Result<Arc<dyn AiAgent>>;
}

pub struct OpenAiAgentFactory {
    clients: RelayClients,
    model: String,
}

impl OpenAiAgentFactory {
    pub fn new(clients: RelayClients, model: String) -> Self {
        Self { clients, model }
    }
}

#[async_trait]
impl AgentFactory for OpenAiAgentFactory {
    async fn create(&self, user_id: &str, channel: ChannelRef) -> Result<Arc<dyn AiAgent>> {
        Ok(Arc::new(OpenAiAgent::new(
            self.clients.clone(),
            user_id.to_string(),
            channel,
            self.model.clone(),
        )))
    }
}

#[derive(Debug, Clone)]
struct Session {
    assistant_id: String,
    thread_id: String,
}

struct AgentInner {
    clients: RelayClients,
    user_id: String,
    channel: ChannelRef,
    model: String,
    session: Mutex<Option<Session>>,
    last_interaction: AtomicI64,
    handlers: Mutex<HashMap<String, Arc<ResponseHandler>>>,
    listener: CancellationToken,
    disposed: AtomicBool,
}

/// Agent backed by an assistant session and one conversation thread.
pub struct OpenAiAgent {
    inner: Arc<AgentInner>,
}

impl OpenAiAgent {
    pub fn new(clients: RelayClients, user_id: String, channel: ChannelRef, model: String) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                clients,
                user_id,
                channel,
                model,
                session: Mutex::new(None),
                last_interaction: AtomicI64::new(now_millis()),
                handlers: Mutex::new(HashMap::new()),
                listener: CancellationToken::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn active_handlers(&self) -> usize {
        self.inner.handlers.lock().len()
    }
}

#[async_trait]
impl AiAgent for OpenAiAgent {
    fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    fn channel(&self) -> &ChannelRef {
        &self.inner.channel
    }

    async fn init(&self) -> Result<()> {
        let inner = &self.inner;
        let assistant_id = inner
            .clients
            .assistant
            .create_assistant(&AssistantSpec::writing_assistant(&inner.model))
            .await?;
        let thread_id = match inner.clients.assistant.create_thread().await {
            Ok(id) => id,
            Err(err) => {
                if let Err(cleanup) = inner.clients.assistant.delete_assistant(&assistant_id).await {
                    warn!("[AGENT] cleanup of assistant {} failed: {}", assistant_id, cleanup);
                }
                return Err(err);
            }
        };
        *inner.session.lock() = Some(Session {
            assistant_id,
            thread_id,
        });

        let weak: Weak<AgentInner> = Arc::downgrade(inner);
        inner.clients.events.listen(
            Events::MESSAGE_NEW,
            inner.listener.clone(),
            move |event| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_message(event).await;
                    }
                }
            },
        );
        info!(
            "[AGENT] initialized: user={}, cid={}",
            inner.user_id,
            inner.channel.cid()
        );
        Ok(())
    }

    async fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.listener.cancel();

        let handlers: Vec<Arc<ResponseHandler>> =
            inner.handlers.lock().drain().map(|(_, h)| h).collect();
        for handler in handlers {
            handler.dispose();
        }

        let session = inner.session.lock().take();
        if let Some(session) = session {
            if let Err(err) = inner
                .clients
                .assistant
                .delete_assistant(&session.assistant_id)
                .await
            {
                warn!(
                    "[AGENT] delete assistant {} failed: {}",
                    session.assistant_id, err
                );
            }
        }
        info!("[AGENT] disposed: user={}", inner.user_id);
    }

    fn last_interaction(&self) -> i64 {
        self.inner.last_interaction.load(Ordering::Acquire)
    }
}

impl AgentInner {
    fn accepts(&self, event: &ChatEvent) -> Option<String> {
        if self.disposed.load(Ordering::Acquire) {
            return None;
        }
        if event.cid().as_deref() != Some(self.channel.cid().as_str()) {
            return None;
        }
        let message = event.message.as_ref()?;
        if message.ai_generated {
            return None;
        }
        let author = message
            .user
            .as_ref()
            .or(event.user.as_ref())
            .map(|u| u.id.as_str());
        if author == Some(self.user_id.as_str()) {
            return None;
        }
        let text = message.text.trim();
        if text.is_empty() {
            return None;
        }
        Some(text.to_string())
    }

    async fn handle_message(self: Arc<Self>, event: ChatEvent) {
        let Some(text) = self.accepts(&event) else {
            return;
        };
        let Some(session) = self.session.lock().clone() else {
            return;
        };
        self.last_interaction.store(now_millis(), Ordering::Release);
        if let Err(err) = self.respond(&session, &text).await {
            error!("[AGENT] failed to respond in {}: {}", self.channel.cid(), err);
        }
    }

    async fn respond(self: &Arc<Self>, session: &Session, text: &str) -> Result<()> {
        let assistant = &self.clients.assistant;
        let chat = &self.clients.chat;

        assistant.add_user_message(&session.thread_id, text).await?;

        let placeholder = chat
            .send_message(
                &self.channel,
                NewMessage {
                    id: Uuid::new_v4().to_string(),
                    text: String::new(),
                    user_id: self.user_id.clone(),
                    ai_generated: true,
                },
            )
            .await?;
        let cid = placeholder.cid.clone().unwrap_or_else(|| self.channel.cid());
        let message_id = placeholder.id.clone();
        self.indicate(IndicatorEvent::update(AiState::Thinking, &cid, &message_id))
            .await;

        let stream = match assistant
            .stream_run(&session.thread_id, &session.assistant_id)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                self.indicate(IndicatorEvent::update(AiState::Error, &cid, &message_id))
                    .await;
                chat.partial_update_message(&message_id, &err.to_string(), &self.user_id)
                    .await?;
                return Err(err);
            }
        };

        let weak = Arc::downgrade(self);
        let key = message_id.clone();
        let handler = ResponseHandler::new(
            self.clients.clone(),
            session.thread_id.clone(),
            self.channel.clone(),
            self.user_id.clone(),
            placeholder,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handlers.lock().remove(&key);
                }
            }),
        );
        {
            let mut handlers = self.handlers.lock();
            if self.disposed.load(Ordering::Acquire) {
                drop(handlers);
                handler.dispose();
                return Err(RelayError::Assistant("agent disposed during run start".to_string()));
            }
            handlers.insert(message_id.clone(), Arc::clone(&handler));
        }
        debug!("[AGENT] run started: message={}", message_id);
        handler.spawn(stream);
        Ok(())
    }

    async fn indicate(&self, event: IndicatorEvent) {
        if let Err(err) = self
            .clients
            .chat
            .send_event(&self.channel, &event, &self.user_id)
            .await
        {
            warn!("[AGENT] indicator {} failed: {}", event.kind, err);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::{stream, StreamExt};

    use crate::models::assistant::AssistantStreamEvent;
    use crate::models::chat::{ChatMessage, ChatUser};
    use crate::services::testing::{ChatCall, Harness};

    fn agent(harness: &Harness) -> OpenAiAgent {
        OpenAiAgent::new(
            harness.clients(),
            "ai-bot-abc".to_string(),
            ChannelRef::new("messaging", "abc"),
            "gpt-4o".to_string(),
        )
    }

    fn new_message(cid: &str, user: &str, text: &str, ai_generated: bool) -> ChatEvent {
        ChatEvent {
            kind: Events::MESSAGE_NEW.to_string(),
            cid: Some(cid.to_string()),
            message: Some(ChatMessage {
                id: format!("user-msg-{}", text.len()),
                cid: Some(cid.to_string()),
                text: text.to_string(),
                user: Some(ChatUser {
                    id: user.to_string(),
                    name: None,
                }),
                ai_generated,
            }),
            ..Default::default()
        }
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn user_message_is_answered_in_a_placeholder() {
        let harness = Harness::new();
        harness.assistant.push_run(vec![
            AssistantStreamEvent::RunCreated {
                run_id: "run_1".to_string(),
            },
            AssistantStreamEvent::MessageDelta {
                text: Some("Hi".to_string()),
            },
            AssistantStreamEvent::MessageCompleted {
                text: Some("Hi there".to_string()),
            },
            AssistantStreamEvent::RunCompleted,
        ]);
        let agent = agent(&harness);
        agent.init().await.unwrap();

        harness
            .events
            .publish(new_message("messaging:abc", "user-1", "  hello  ", false));

        let chat = harness.chat.clone();
        wait_until(|| {
            chat.calls()
                .iter()
                .any(|c| matches!(c, ChatCall::PartialUpdate(_, text) if text == "Hi there"))
        })
        .await;
        wait_until(|| agent.active_handlers() == 0).await;

        assert_eq!(
            harness.assistant.user_messages(),
            vec![("thread_1".to_string(), "hello".to_string())]
        );
        assert_eq!(
            harness.chat.sent_messages(),
            vec![("messaging:abc".to_string(), "ai-bot-abc".to_string())]
        );
        assert_eq!(
            harness.chat.indicator_states().first(),
            Some(&Some(AiState::Thinking))
        );
    }

    #[tokio::test]
    async fn ignores_bot_ai_and_foreign_channel_messages() {
        let harness = Harness::new();
        let agent = agent(&harness);
        agent.init().await.unwrap();
        let before = agent.last_interaction();

        harness
            .events
            .publish(new_message("messaging:other", "user-1", "hi", false));
        harness
            .events
            .publish(new_message("messaging:abc", "ai-bot-abc", "hi", false));
        harness
            .events
            .publish(new_message("messaging:abc", "user-1", "hi", true));
        harness
            .events
            .publish(new_message("messaging:abc", "user-1", "   ", false));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(harness.assistant.user_messages().is_empty());
        assert!(harness.chat.calls().is_empty());
        assert_eq!(agent.last_interaction(), before);
    }

    #[tokio::test]
    async fn failed_run_start_is_reported_in_placeholder() {
        let harness = Harness::new();
        harness.assistant.fail_stream_run();
        let agent = agent(&harness);
        agent.init().await.unwrap();

        harness
            .events
            .publish(new_message("messaging:abc", "user-1", "hello", false));

        let chat = harness.chat.clone();
        wait_until(|| chat.indicator_states().contains(&Some(AiState::Error))).await;
        wait_until(|| {
            chat.calls()
                .iter()
                .any(|c| matches!(c, ChatCall::PartialUpdate(_, text) if text.contains("run rejected")))
        })
        .await;
        assert_eq!(agent.active_handlers(), 0);
    }

    #[tokio::test]
    async fn dispose_tears_down_handlers_and_assistant() {
        let harness = Harness::new();
        harness
            .assistant
            .push_run_stream(stream::pending().boxed());
        let agent = agent(&harness);
        agent.init().await.unwrap();

        harness
            .events
            .publish(new_message("messaging:abc", "user-1", "hello", false));
        wait_until(|| agent.active_handlers() == 1).await;

        agent.dispose().await;
        agent.dispose().await;

        assert_eq!(agent.active_handlers(), 0);
        assert_eq!(harness.assistant.deleted(), vec!["asst_1".to_string()]);

        harness
            .events
            .publish(new_message("messaging:abc", "user-1", "again", false));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(harness.assistant.user_messages().len(), 1);
    }
}
