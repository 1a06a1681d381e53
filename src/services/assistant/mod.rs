use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::{RelayError, Result};
use crate::models::assistant::{AssistantStreamEvent, ToolOutput, WEB_SEARCH_TOOL};
use crate::utils::log_helpers::truncate_log;

mod parser;

pub type RunEventStream = BoxStream<'static, Result<AssistantStreamEvent>>;

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantSpec {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub temperature: f64,
}

impl AssistantSpec {
    pub fn writing_assistant(model: &str) -> Self {
        Self {
            name: "Stream AI Assistant".to_string(),
            instructions: "You are an AI writing assistant. Help users with their questions and \
                use the web_search tool when a question needs current information."
                .to_string(),
            model: model.to_string(),
            temperature: 0.7,
        }
    }

    fn tools() -> Value {
        json!([
            { "type": "code_interpreter" },
            {
                "type": "function",
                "function": {
                    "name": WEB_SEARCH_TOOL,
                    "description": "Search the web for current information, news and facts.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "query": {
                                "type": "string",
                                "description": "The search query"
                            }
                        },
                        "required": ["query"]
                    }
                }
            }
        ])
    }

    fn to_payload(&self) -> Value {
        json!({
            "name": self.name,
            "instructions": self.instructions,
            "model": self.model,
            "temperature": self.temperature,
            "tools": Self::tools(),
        })
    }
}

/// Assistant-session operations of the AI provider.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String>;
    async fn delete_assistant(&self, assistant_id: &str) -> Result<()>;
    async fn create_thread(&self) -> Result<String>;
    async fn add_user_message(&self, thread_id: &str, text: &str) -> Result<()>;
    async fn stream_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunEventStream>;
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunEventStream>;
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()>;
}

/// OpenAI Assistants v2 over plain HTTP.
#[derive(Clone)]
pub struct OpenAiAssistantClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiAssistantClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        self.client
            .request(method, url)
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send_json(&self, req: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let resp = req.send().await?;
        let status = resp.status();
        let raw = resp.text().await?;
        if !status.is_success() {
            let err_text = truncate_log(&raw, 2000);
            error!("[ASSISTANT] {} failed: status={}, error={}", what, status, err_text);
            return Err(RelayError::Assistant(format!("{} failed with status {}: {}", what, status, err_text)));
        }
        Ok(serde_json::from_str(&raw)?)
    }

    async fn send_stream(&self, req: reqwest::RequestBuilder, what: &str) -> Result<RunEventStream> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let err_text = truncate_log(&text, 2000);
            error!("[ASSISTANT] {} failed: status={}, error={}", what, status, err_text);
            return Err(RelayError::Assistant(format!("{} failed with status {}: {}", what, status, err_text)));
        }
        Ok(parser::event_stream(Box::pin(resp.bytes_stream())))
    }
}

fn id_of(value: &Value, what: &str) -> Result<String> {
    value
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| RelayError::Assistant(format!("{} response is missing an id", what)))
}

#[async_trait]
impl AssistantApi for OpenAiAssistantClient {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String> {
        let req = self
            .request(reqwest::Method::POST, "assistants")
            .json(&spec.to_payload());
        let val = self.send_json(req, "create assistant").await?;
        let id = id_of(&val, "create assistant")?;
        info!("[ASSISTANT] created assistant {} (model={})", id, spec.model);
        Ok(id)
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()> {
        let req = self.request(reqwest::Method::DELETE, &format!("assistants/{}", assistant_id));
        self.send_json(req, "delete assistant").await.map(|_| ())
    }

    async fn create_thread(&self) -> Result<String> {
        let req = self
            .request(reqwest::Method::POST, "threads")
            .json(&json!({}));
        let val = self.send_json(req, "create thread").await?;
        id_of(&val, "create thread")
    }

    async fn add_user_message(&self, thread_id: &str, text: &str) -> Result<()> {
        let req = self
            .request(reqwest::Method::POST, &format!("threads/{}/messages", thread_id))
            .json(&json!({ "role": "user", "content": text }));
        self.send_json(req, "add message").await.map(|_| ())
    }

    async fn stream_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunEventStream> {
        let req = self
            .request(reqwest::Method::POST, &format!("threads/{}/runs", thread_id))
            .json(&json!({ "assistant_id": assistant_id, "stream": true }));
        self.send_stream(req, "create run").await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunEventStream> {
        let req = self
            .request(
                reqwest::Method::POST,
                &format!("threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id),
            )
            .json(&json!({ "tool_outputs": outputs, "stream": true }));
        self.send_stream(req, "submit tool outputs").await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        let req = self.request(
            reqwest::Method::POST,
            &format!("threads/{}/runs/{}/cancel", thread_id, run_id),
        );
        self.send_json(req, "cancel run").await.map(|_| ())
    }
}
