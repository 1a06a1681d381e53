use std::collections::VecDeque;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use crate::error::RelayError;
use crate::models::assistant::{AssistantStreamEvent, ToolCall};

use super::RunEventStream;

#[derive(Debug, Clone, PartialEq)]
pub(super) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    last_error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RequiredAction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Debug, Deserialize)]
struct SubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunStepObject {
    step_details: StepDetails,
}

#[derive(Debug, Deserialize)]
struct StepDetails {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaObject {
    delta: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    #[serde(default)]
    value: Option<String>,
}

/// Text of the first content part, when that part is text.
fn first_text(content: &[ContentPart]) -> Option<String> {
    content
        .first()
        .filter(|part| part.kind == "text")
        .and_then(|part| part.text.as_ref())
        .and_then(|text| text.value.clone())
}

pub(super) fn decode_event(event: &str, data: Value) -> Result<AssistantStreamEvent, serde_json::Error> {
    let decoded = match event {
        "thread.run.created" => {
            let run: RunObject = serde_json::from_value(data)?;
            AssistantStreamEvent::RunCreated { run_id: run.id }
        }
        "thread.run.step.created" => {
            let step: RunStepObject = serde_json::from_value(data)?;
            AssistantStreamEvent::RunStepCreated {
                step_type: step.step_details.kind,
            }
        }
        "thread.message.delta" => {
            let delta: MessageDeltaObject = serde_json::from_value(data)?;
            AssistantStreamEvent::MessageDelta {
                text: first_text(&delta.delta.content),
            }
        }
        "thread.message.completed" => {
            let message: MessageContent = serde_json::from_value(data)?;
            AssistantStreamEvent::MessageCompleted {
                text: first_text(&message.content),
            }
        }
        "thread.run.requires_action" => {
            let run: RunObject = serde_json::from_value(data)?;
            match run.required_action {
                Some(action) if action.kind == "submit_tool_outputs" => {
                    AssistantStreamEvent::RequiresAction {
                        run_id: run.id,
                        tool_calls: action
                            .submit_tool_outputs
                            .map(|outputs| outputs.tool_calls)
                            .unwrap_or_default(),
                    }
                }
                _ => AssistantStreamEvent::Other {
                    event: event.to_string(),
                },
            }
        }
        "thread.run.completed" => AssistantStreamEvent::RunCompleted,
        "thread.run.failed" => {
            let run: RunObject = serde_json::from_value(data)?;
            AssistantStreamEvent::RunFailed {
                message: run.last_error.and_then(|err| err.message),
            }
        }
        "error" => {
            let message = data
                .get("error")
                .and_then(|err| err.get("message"))
                .or_else(|| data.get("message"))
                .and_then(|value| value.as_str())
                .map(|s| s.to_string());
            AssistantStreamEvent::RunFailed { message }
        }
        other => AssistantStreamEvent::Other {
            event: other.to_string(),
        },
    };
    Ok(decoded)
}

/// Splits complete `\n\n`-terminated packets off the front of `buffer`.
pub(super) fn drain_sse_frames(buffer: &mut Vec<u8>) -> Vec<SseFrame> {
    let mut frames = Vec::new();

    while let Some(idx) = buffer.windows(2).position(|w| w == b"\n\n") {
        let packet: Vec<u8> = buffer.drain(..idx + 2).collect();
        let packet = String::from_utf8_lossy(&packet[..idx]);

        let mut event = None;
        let mut data_lines = Vec::new();
        for line in packet.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                event = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.trim_start().to_string());
            }
        }

        if event.is_none() && data_lines.is_empty() {
            continue;
        }
        frames.push(SseFrame {
            event,
            data: data_lines.join("\n"),
        });
    }

    frames
}

/// `None` for stream terminators (`[DONE]` / `event: done`).
pub(super) fn decode_frame(frame: &SseFrame) -> Option<Result<AssistantStreamEvent, RelayError>> {
    let name = frame.event.as_deref().unwrap_or("message");
    if name == "done" || frame.data.trim() == "[DONE]" {
        return None;
    }
    let data: Value = if frame.data.trim().is_empty() {
        Value::Null
    } else {
        match serde_json::from_str(&frame.data) {
            Ok(value) => value,
            Err(err) => return Some(Err(err.into())),
        }
    };
    Some(decode_event(name, data).map_err(RelayError::from))
}

struct SseDecoder<S> {
    inner: S,
    buffer: Vec<u8>,
    pending: VecDeque<Result<AssistantStreamEvent, RelayError>>,
    finished: bool,
}

impl<S> SseDecoder<S> {
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.buffer
            .extend(bytes.iter().copied().filter(|b| *b != b'\r'));
        for frame in drain_sse_frames(&mut self.buffer) {
            if let Some(event) = decode_frame(&frame) {
                self.pending.push_back(event);
            }
        }
    }
}

/// Turns a raw server-sent-events byte stream into typed run events.
pub(super) fn event_stream<S, E>(bytes: S) -> RunEventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: ToString + Send + 'static,
{
    let decoder = SseDecoder {
        inner: bytes,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(decoder, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(bytes)) => state.push_bytes(&bytes),
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(RelayError::Assistant(err.to_string())), state));
                }
                None => {
                    state.finished = true;
                    if !state.buffer.is_empty() {
                        state.push_bytes(b"\n\n");
                    }
                }
            }
        }
    })
    .boxed()
}
