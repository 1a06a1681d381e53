//! In-memory stand-ins for the chat backend, assistant provider and search
//! used across unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use serde_json::json;

use crate::core::time::now_millis;
use crate::error::{RelayError, Result};
use crate::models::assistant::{AssistantStreamEvent, ToolOutput};
use crate::models::chat::{AiState, ChannelRef, ChatMessage, ChatUser, IndicatorEvent, NewMessage};
use crate::services::agent::{AgentFactory, AiAgent};
use crate::services::assistant::{AssistantApi, AssistantSpec, RunEventStream};
use crate::services::chat_client::{sign_user_token, ChatBackend};
use crate::services::web_search::WebSearch;
use crate::services::RelayClients;
use crate::utils::event_bus::EventBus;

pub const TEST_SECRET: &str = "test-secret";

#[derive(Debug, Clone, PartialEq)]
pub enum ChatCall {
    UpsertUser(String),
    DeleteUser(String, bool),
    AddMembers(String, Vec<String>),
    SendMessage(String, String),
    PartialUpdate(String, String),
    Event(String, Option<AiState>, String),
}

#[derive(Default)]
pub struct FakeChat {
    calls: Mutex<Vec<ChatCall>>,
    fail_upsert: AtomicBool,
    fail_delete: AtomicBool,
}

impl FakeChat {
    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().clone()
    }

    pub fn partial_updates(&self, message_id: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ChatCall::PartialUpdate(id, text) if id == message_id => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn indicator_states(&self) -> Vec<Option<AiState>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ChatCall::Event(_, state, _) => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ChatCall::SendMessage(cid, user) => Some((cid.clone(), user.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn fail_upsert(&self) {
        self.fail_upsert.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: ChatCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ChatBackend for FakeChat {
    async fn upsert_user(&self, user: &ChatUser) -> Result<()> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(RelayError::Chat("upsert rejected".to_string()));
        }
        self.record(ChatCall::UpsertUser(user.id.clone()));
        Ok(())
    }

    async fn delete_user(&self, user_id: &str, hard_delete: bool) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(RelayError::Chat("delete rejected".to_string()));
        }
        self.record(ChatCall::DeleteUser(user_id.to_string(), hard_delete));
        Ok(())
    }

    async fn add_members(&self, channel: &ChannelRef, user_ids: &[String]) -> Result<()> {
        self.record(ChatCall::AddMembers(channel.cid(), user_ids.to_vec()));
        Ok(())
    }

    async fn send_message(&self, channel: &ChannelRef, message: NewMessage) -> Result<ChatMessage> {
        self.record(ChatCall::SendMessage(channel.cid(), message.user_id.clone()));
        Ok(ChatMessage {
            id: message.id,
            cid: Some(channel.cid()),
            text: message.text,
            user: Some(ChatUser {
                id: message.user_id,
                name: None,
            }),
            ai_generated: message.ai_generated,
        })
    }

    async fn partial_update_message(
        &self,
        message_id: &str,
        text: &str,
        _user_id: &str,
    ) -> Result<()> {
        self.record(ChatCall::PartialUpdate(message_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_event(
        &self,
        _channel: &ChannelRef,
        event: &IndicatorEvent,
        _user_id: &str,
    ) -> Result<()> {
        self.record(ChatCall::Event(
            event.kind.to_string(),
            event.ai_state,
            event.message_id.clone(),
        ));
        Ok(())
    }

    fn create_token(&self, user_id: &str, expiration: i64, issued_at: i64) -> Result<String> {
        sign_user_token(TEST_SECRET, user_id, expiration, issued_at)
    }
}

#[derive(Default)]
pub struct FakeAssistant {
    runs: Mutex<VecDeque<RunEventStream>>,
    continuations: Mutex<VecDeque<RunEventStream>>,
    created: AtomicUsize,
    fail_cancel: AtomicBool,
    fail_stream_run: AtomicBool,
    cancelled: Mutex<Vec<(String, String)>>,
    submitted: Mutex<Vec<(String, Vec<ToolOutput>)>>,
    user_messages: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<String>>,
}

fn scripted(events: Vec<AssistantStreamEvent>) -> RunEventStream {
    stream::iter(events.into_iter().map(Ok)).boxed()
}

impl FakeAssistant {
    pub fn push_run(&self, events: Vec<AssistantStreamEvent>) {
        self.runs.lock().push_back(scripted(events));
    }

    pub fn push_run_stream(&self, stream: RunEventStream) {
        self.runs.lock().push_back(stream);
    }

    pub fn push_continuation(&self, events: Vec<AssistantStreamEvent>) {
        self.continuations.lock().push_back(scripted(events));
    }

    pub fn fail_cancel(&self) {
        self.fail_cancel.store(true, Ordering::SeqCst);
    }

    pub fn fail_stream_run(&self) {
        self.fail_stream_run.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> Vec<(String, String)> {
        self.cancelled.lock().clone()
    }

    pub fn submitted(&self) -> Vec<(String, Vec<ToolOutput>)> {
        self.submitted.lock().clone()
    }

    pub fn user_messages(&self) -> Vec<(String, String)> {
        self.user_messages.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl AssistantApi for FakeAssistant {
    async fn create_assistant(&self, _spec: &AssistantSpec) -> Result<String> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("asst_{}", n))
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()> {
        self.deleted.lock().push(assistant_id.to_string());
        Ok(())
    }

    async fn create_thread(&self) -> Result<String> {
        Ok("thread_1".to_string())
    }

    async fn add_user_message(&self, thread_id: &str, text: &str) -> Result<()> {
        self.user_messages
            .lock()
            .push((thread_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn stream_run(&self, _thread_id: &str, _assistant_id: &str) -> Result<RunEventStream> {
        if self.fail_stream_run.load(Ordering::SeqCst) {
            return Err(RelayError::Assistant("run rejected".to_string()));
        }
        let next = self.runs.lock().pop_front();
        Ok(next.unwrap_or_else(|| scripted(vec![AssistantStreamEvent::RunCompleted])))
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunEventStream> {
        self.submitted
            .lock()
            .push((run_id.to_string(), outputs.to_vec()));
        let next = self.continuations.lock().pop_front();
        Ok(next.unwrap_or_else(|| scripted(Vec::new())))
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        self.cancelled
            .lock()
            .push((thread_id.to_string(), run_id.to_string()));
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(RelayError::Assistant("cancel rejected".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSearch {
    queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl WebSearch for FakeSearch {
    async fn search(&self, query: &str) -> String {
        self.queries.lock().push(query.to_string());
        json!({ "results": [{ "title": query, "url": "https://example.test" }] }).to_string()
    }
}

/// Bundles the fakes together with the bus they share.
pub struct Harness {
    pub chat: Arc<FakeChat>,
    pub assistant: Arc<FakeAssistant>,
    pub search: Arc<FakeSearch>,
    pub events: EventBus,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            chat: Arc::new(FakeChat::default()),
            assistant: Arc::new(FakeAssistant::default()),
            search: Arc::new(FakeSearch::default()),
            events: EventBus::default(),
        }
    }

    pub fn clients(&self) -> RelayClients {
        RelayClients {
            chat: self.chat.clone(),
            assistant: self.assistant.clone(),
            search: self.search.clone(),
            events: self.events.clone(),
        }
    }
}

pub struct FakeAgent {
    user_id: String,
    channel: ChannelRef,
    init_delay: Duration,
    dispose_delay: Duration,
    fail_init: bool,
    last_interaction: AtomicI64,
    pub disposed: AtomicUsize,
}

impl FakeAgent {
    pub fn set_last_interaction(&self, ts: i64) {
        self.last_interaction.store(ts, Ordering::SeqCst);
    }

    pub fn dispose_count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiAgent for FakeAgent {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn channel(&self) -> &ChannelRef {
        &self.channel
    }

    async fn init(&self) -> Result<()> {
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        if self.fail_init {
            return Err(RelayError::Assistant("init failed".to_string()));
        }
        Ok(())
    }

    async fn dispose(&self) {
        if !self.dispose_delay.is_zero() {
            tokio::time::sleep(self.dispose_delay).await;
        }
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }

    fn last_interaction(&self) -> i64 {
        self.last_interaction.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeFactory {
    init_delay: Duration,
    dispose_delay: Duration,
    fail_init: bool,
    created: Mutex<Vec<Arc<FakeAgent>>>,
}

impl FakeFactory {
    pub fn with_init_delay(delay: Duration) -> Self {
        Self {
            init_delay: delay,
            ..Default::default()
        }
    }

    pub fn with_dispose_delay(delay: Duration) -> Self {
        Self {
            dispose_delay: delay,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_init: true,
            ..Default::default()
        }
    }

    pub fn created(&self) -> Vec<Arc<FakeAgent>> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl AgentFactory for FakeFactory {
    async fn create(&self, user_id: &str, channel: ChannelRef) -> Result<Arc<dyn AiAgent>> {
        let agent = Arc::new(FakeAgent {
            user_id: user_id.to_string(),
            channel,
            init_delay: self.init_delay,
            dispose_delay: self.dispose_delay,
            fail_init: self.fail_init,
            last_interaction: AtomicI64::new(now_millis()),
            disposed: AtomicUsize::new(0),
        });
        self.created.lock().push(Arc::clone(&agent));
        Ok(agent)
    }
}
