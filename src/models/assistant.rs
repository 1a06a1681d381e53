use serde::{Deserialize, Serialize};

pub const WEB_SEARCH_TOOL: &str = "web_search";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Typed view of the events an assistant run streams back.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantStreamEvent {
    RunCreated { run_id: String },
    RunStepCreated { step_type: String },
    MessageDelta { text: Option<String> },
    MessageCompleted { text: Option<String> },
    RequiresAction { run_id: String, tool_calls: Vec<ToolCall> },
    RunCompleted,
    RunFailed { message: Option<String> },
    Other { event: String },
}
