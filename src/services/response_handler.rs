use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::models::assistant::{AssistantStreamEvent, ToolCall, ToolOutput, WEB_SEARCH_TOOL};
use crate::models::chat::{AiState, ChannelRef, ChatEvent, ChatMessage, IndicatorEvent};
use crate::services::assistant::RunEventStream;
use crate::services::RelayClients;
use crate::utils::events::Events;
use crate::utils::log_helpers::{log_run_begin, log_run_cancelled, log_run_error};

/// Minimum spacing between partial message updates while text streams in.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

pub type DisposalCallback = Box<dyn FnOnce() + Send>;

/// Per-message state for one response generation.
#[derive(Debug)]
struct StreamingRun {
    message: ChatMessage,
    buffer: String,
    run_id: Option<String>,
    last_flush: Option<Instant>,
    chunk_count: usize,
}

enum RunFlow {
    Continue,
    SubmitToolOutputs {
        run_id: String,
        outputs: Vec<ToolOutput>,
    },
    Finished,
}

#[derive(Debug, Deserialize)]
struct WebSearchArgs {
    query: String,
}

/// Mirrors one assistant run into a chat message.
pub struct ResponseHandler {
    clients: RelayClients,
    thread_id: String,
    channel: ChannelRef,
    bot_user_id: String,
    message_id: String,
    cid: String,
    state: Mutex<StreamingRun>,
    done: AtomicBool,
    cancel_requested: AtomicBool,
    teardown: CancellationToken,
    on_disposal: Mutex<Option<DisposalCallback>>,
}

impl ResponseHandler {
    /// Creates the handler and starts listening for stop requests on its message.
    pub fn new(
        clients: RelayClients,
        thread_id: String,
        channel: ChannelRef,
        bot_user_id: String,
        message: ChatMessage,
        on_disposal: DisposalCallback,
    ) -> Arc<Self> {
        let cid = message.cid.clone().unwrap_or_else(|| channel.cid());
        let teardown = CancellationToken::new();

        Arc::new_cyclic(|weak: &std::sync::Weak<ResponseHandler>| {
            let weak = weak.clone();
            clients
                .events
                .listen(Events::AI_INDICATOR_STOP, teardown.clone(), move |event| {
                    let weak = weak.clone();
                    async move {
                        if let Some(handler) = weak.upgrade() {
                            handler.handle_stop_generating(&event).await;
                        }
                    }
                });

            ResponseHandler {
                clients: clients.clone(),
                thread_id,
                channel,
                bot_user_id,
                message_id: message.id.clone(),
                cid,
                state: Mutex::new(StreamingRun {
                    message,
                    buffer: String::new(),
                    run_id: None,
                    last_flush: None,
                    chunk_count: 0,
                }),
                done: AtomicBool::new(false),
                cancel_requested: AtomicBool::new(false),
                teardown: teardown.clone(),
                on_disposal: Mutex::new(Some(on_disposal)),
            }
        })
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn run_id(&self) -> Option<String> {
        self.state.lock().run_id.clone()
    }

    /// Current text of the message object, including unflushed deltas.
    pub fn text(&self) -> String {
        self.state.lock().message.text.clone()
    }

    pub fn spawn(self: &Arc<Self>, stream: RunEventStream) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(stream))
    }

    /// Consumes the run (and any tool-output continuations) to the end,
    /// then disposes the handler.
    pub async fn run(self: Arc<Self>, stream: RunEventStream) {
        log_run_begin(&self.cid, &self.message_id, &self.thread_id);
        if let Err(err) = self.consume(stream).await {
            log_run_error(&self.message_id, &err.to_string());
            self.handle_error(&err.to_string()).await;
        }
        let chunks = self.state.lock().chunk_count;
        debug!("[RUN] finished: message={}, chunks={}", self.message_id, chunks);
        self.dispose();
    }

    async fn consume(&self, stream: RunEventStream) -> Result<()> {
        let mut current = stream;
        loop {
            let mut continuation = None;
            loop {
                let item = tokio::select! {
                    _ = self.teardown.cancelled() => return Ok(()),
                    item = current.next() => item,
                };
                let Some(item) = item else { break };
                if self.should_stop() {
                    return Ok(());
                }
                match self.dispatch(item?).await {
                    RunFlow::Continue => {}
                    RunFlow::Finished => return Ok(()),
                    RunFlow::SubmitToolOutputs { run_id, outputs } => {
                        continuation = Some(
                            self.clients
                                .assistant
                                .submit_tool_outputs(&self.thread_id, &run_id, &outputs)
                                .await?,
                        );
                        break;
                    }
                }
            }
            match continuation {
                Some(next) if !self.should_stop() => current = next,
                _ => return Ok(()),
            }
        }
    }

    async fn dispatch(&self, event: AssistantStreamEvent) -> RunFlow {
        match event {
            AssistantStreamEvent::RunCreated { run_id } => {
                debug!("[RUN] created: message={}, run={}", self.message_id, run_id);
                self.state.lock().run_id = Some(run_id);
                RunFlow::Continue
            }
            AssistantStreamEvent::RunStepCreated { step_type } => {
                if step_type == "message_creation" {
                    self.send_indicator(IndicatorEvent::update(
                        AiState::Generating,
                        &self.cid,
                        &self.message_id,
                    ))
                    .await;
                }
                RunFlow::Continue
            }
            AssistantStreamEvent::MessageDelta { text } => {
                if let Some(delta) = text {
                    self.handle_delta(&delta).await;
                }
                RunFlow::Continue
            }
            AssistantStreamEvent::MessageCompleted { text } => {
                self.handle_completed(text).await;
                RunFlow::Continue
            }
            AssistantStreamEvent::RequiresAction { run_id, tool_calls } => {
                self.state.lock().run_id = Some(run_id.clone());
                if tool_calls.is_empty() {
                    warn!("[RUN] requires_action without tool calls: run={}", run_id);
                    return RunFlow::Finished;
                }
                self.send_indicator(IndicatorEvent::update(
                    AiState::CheckingSources,
                    &self.cid,
                    &self.message_id,
                ))
                .await;
                let mut outputs = Vec::with_capacity(tool_calls.len());
                for call in &tool_calls {
                    outputs.push(self.execute_tool_call(call).await);
                }
                RunFlow::SubmitToolOutputs { run_id, outputs }
            }
            AssistantStreamEvent::RunCompleted => RunFlow::Finished,
            AssistantStreamEvent::RunFailed { message } => {
                let message = message.unwrap_or_else(|| "Run failed".to_string());
                log_run_error(&self.message_id, &message);
                self.handle_error(&message).await;
                RunFlow::Finished
            }
            AssistantStreamEvent::Other { event } => {
                debug!("[RUN] ignored event {}", event);
                RunFlow::Continue
            }
        }
    }

    async fn handle_delta(&self, delta: &str) {
        let flush = {
            let mut state = self.state.lock();
            state.buffer.push_str(delta);
            state.message.text.push_str(delta);
            state.chunk_count += 1;

            let now = Instant::now();
            let due = state
                .last_flush
                .map_or(true, |last| now.duration_since(last) > FLUSH_INTERVAL);
            if due {
                state.last_flush = Some(now);
                Some(state.buffer.clone())
            } else {
                None
            }
        };

        if let Some(text) = flush {
            if let Err(err) = self
                .clients
                .chat
                .partial_update_message(&self.message_id, &text, &self.bot_user_id)
                .await
            {
                warn!("[RUN] partial update failed: message={}, error={}", self.message_id, err);
            }
        }
    }

    /// The completion's text is authoritative over the accumulated buffer.
    async fn handle_completed(&self, text: Option<String>) {
        let final_text = {
            let mut state = self.state.lock();
            let final_text = text.unwrap_or_else(|| state.buffer.clone());
            state.message.text = final_text.clone();
            final_text
        };

        if let Err(err) = self
            .clients
            .chat
            .partial_update_message(&self.message_id, &final_text, &self.bot_user_id)
            .await
        {
            error!("[RUN] final update failed: message={}, error={}", self.message_id, err);
        }
        self.send_indicator(IndicatorEvent::clear(&self.cid, &self.message_id))
            .await;
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> ToolOutput {
        let output = match call.function.name.as_str() {
            WEB_SEARCH_TOOL => match serde_json::from_str::<WebSearchArgs>(&call.function.arguments) {
                Ok(args) => {
                    info!("[RUN] web search: message={}, query={:?}", self.message_id, args.query);
                    self.clients.search.search(&args.query).await
                }
                Err(err) => {
                    error!("[RUN] invalid tool arguments for call {}: {}", call.id, err);
                    json!({ "error": "failed to call tool" }).to_string()
                }
            },
            other => {
                warn!("[RUN] unknown tool requested: {}", other);
                json!({ "error": format!("unknown tool: {}", other) }).to_string()
            }
        };
        ToolOutput {
            tool_call_id: call.id.clone(),
            output,
        }
    }

    /// Cancels the in-flight run when a stop request targets this message.
    pub async fn handle_stop_generating(&self, event: &ChatEvent) {
        if self.is_done() || event.target_message_id() != Some(self.message_id.as_str()) {
            return;
        }
        let Some(run_id) = self.run_id() else {
            debug!("[RUN] stop requested before run id is known: message={}", self.message_id);
            return;
        };

        info!("[RUN] stop generating for message {}", self.message_id);
        self.cancel_requested.store(true, Ordering::Release);
        if let Err(err) = self
            .clients
            .assistant
            .cancel_run(&self.thread_id, &run_id)
            .await
        {
            error!("[RUN] cancel failed: run={}, error={}", run_id, err);
        }
        log_run_cancelled(&self.message_id, &run_id);

        self.send_indicator(IndicatorEvent::clear(&self.cid, &self.message_id))
            .await;
        self.dispose();
    }

    async fn handle_error(&self, message: &str) {
        if self.is_done() {
            return;
        }
        self.send_indicator(IndicatorEvent::update(
            AiState::Error,
            &self.cid,
            &self.message_id,
        ))
        .await;

        let text = if message.is_empty() {
            "Error generating the message"
        } else {
            message
        };
        self.state.lock().message.text = text.to_string();
        if let Err(err) = self
            .clients
            .chat
            .partial_update_message(&self.message_id, text, &self.bot_user_id)
            .await
        {
            error!("[RUN] error update failed: message={}, error={}", self.message_id, err);
        }
        self.dispose();
    }

    async fn send_indicator(&self, event: IndicatorEvent) {
        if let Err(err) = self
            .clients
            .chat
            .send_event(&self.channel, &event, &self.bot_user_id)
            .await
        {
            warn!("[RUN] indicator {} failed: message={}, error={}", event.kind, self.message_id, err);
        }
    }

    fn should_stop(&self) -> bool {
        self.is_done() || self.cancel_requested.load(Ordering::Acquire)
    }

    /// Idempotent: stops the stop-listener and fires the cleanup callback once.
    pub fn dispose(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.teardown.cancel();
        let callback = self.on_disposal.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}
