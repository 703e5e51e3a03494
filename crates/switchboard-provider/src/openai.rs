//! Adapter for OpenAI-compatible `/chat/completions` endpoints (OpenAI,
//! Ollama, vLLM, ...).
//!
//! Hand-off targets are advertised to the model as synthetic
//! `transfer_to_<agent>` functions; a call to one of them folds back into
//! [`ModelAction::Handoff`]. Whether the named agent actually exists and is
//! reachable is the orchestration loop's decision, not this adapter's.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use switchboard_core::{Result, Role, SwitchboardError};
use tracing::{debug, info, warn};

use crate::{CompletionRequest, ModelAction, ModelProvider, ToolCallRequest};

const HANDOFF_PREFIX: &str = "transfer_to_";

/// Connection settings for one endpoint. `base_url` is the API root
/// (e.g. `http://localhost:11434/v1`), without the `/chat/completions`
/// suffix.
#[derive(Debug, Clone)]
pub struct OpenAiOptions {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl OpenAiOptions {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Chat-completion client for one configured endpoint. Cheap to share:
/// the underlying `reqwest::Client` pools connections internally.
pub struct OpenAiChatProvider {
    http: reqwest::Client,
    options: OpenAiOptions,
    endpoint: String,
}

impl OpenAiChatProvider {
    pub fn new(options: OpenAiOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|err| {
                SwitchboardError::ProviderUnavailable(format!(
                    "HTTP client construction failed: {err}"
                ))
            })?;
        let endpoint = format!(
            "{}/chat/completions",
            options.base_url.trim_end_matches('/')
        );
        info!(
            "Chat-completion provider configured: {} (model {})",
            endpoint, options.model
        );
        Ok(Self {
            http,
            options,
            endpoint,
        })
    }

    fn build_body<'a>(&'a self, request: &'a CompletionRequest) -> WireRequest<'a> {
        let messages = request
            .messages
            .iter()
            .map(|message| WireMessage {
                role: message.role,
                content: &message.content,
                tool_call_id: message.tool_call_id.as_deref(),
                tool_calls: message.tool_calls.iter().map(wire_call).collect(),
            })
            .collect();

        let mut tools: Vec<WireTool> = request
            .tools
            .iter()
            .map(|descriptor| {
                debug!(
                    "Advertising tool '{}' from '{}'",
                    descriptor.name, descriptor.server
                );
                WireTool {
                    kind: "function",
                    function: WireFunctionDef {
                        name: descriptor.name.clone(),
                        description: descriptor.description.clone(),
                        parameters: descriptor.input_schema.clone(),
                    },
                }
            })
            .collect();

        for target in &request.handoff_targets {
            tools.push(WireTool {
                kind: "function",
                function: WireFunctionDef {
                    name: format!("{HANDOFF_PREFIX}{target}"),
                    description: format!(
                        "Transfer the conversation to the '{target}' agent for the rest of the session."
                    ),
                    parameters: json!({"type": "object", "properties": {}}),
                },
            });
        }

        WireRequest {
            model: &self.options.model,
            messages,
            tools,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            stream: false,
        }
    }
}

#[async_trait::async_trait]
impl ModelProvider for OpenAiChatProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<ModelAction> {
        let body = self.build_body(&request);
        debug!(
            "Requesting completion from '{}': {} messages, {} tools",
            self.options.model,
            body.messages.len(),
            body.tools.len()
        );

        let mut http_request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.options.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().await.map_err(|err| {
            SwitchboardError::ProviderUnavailable(format!(
                "request to {} failed: {err}",
                self.endpoint
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SwitchboardError::ProviderUnavailable(format!(
                "provider returned {status}: {}",
                snippet(&detail)
            )));
        }

        let decoded: WireResponse = response.json().await.map_err(|err| {
            SwitchboardError::ProviderUnavailable(format!("undecodable provider reply: {err}"))
        })?;

        let choice = decoded.choices.into_iter().next().ok_or_else(|| {
            SwitchboardError::ProviderUnavailable("provider reply carried no choices".into())
        })?;

        decode_reply(choice.message)
    }
}

/// Decode one reply message into the single action it represents. Tool
/// calls take precedence over inline commentary, matching how the
/// chat-completions contract treats a `tool_calls` finish.
fn decode_reply(reply: WireReplyMessage) -> Result<ModelAction> {
    if let Some(calls) = reply.tool_calls.filter(|calls| !calls.is_empty()) {
        if reply.content.as_deref().is_some_and(|text| !text.is_empty()) {
            debug!("dropping assistant commentary alongside tool calls");
        }
        return fold_tool_calls(calls);
    }
    match reply.content {
        Some(text) => Ok(ModelAction::Final { text }),
        None => Err(SwitchboardError::ProviderUnavailable(
            "model reply carried neither content nor tool calls".into(),
        )),
    }
}

/// A `transfer_to_*` call anywhere in the batch turns the whole reply into
/// a hand-off; any other calls issued alongside it are logged and dropped.
fn fold_tool_calls(calls: Vec<WireToolCall>) -> Result<ModelAction> {
    if let Some(position) = calls
        .iter()
        .position(|call| call.function.name.starts_with(HANDOFF_PREFIX))
    {
        let target = calls[position].function.name[HANDOFF_PREFIX.len()..].to_string();
        if calls.len() > 1 {
            warn!(
                "Model issued {} extra calls alongside a transfer to '{}'; dropping them",
                calls.len() - 1,
                target
            );
        }
        return Ok(ModelAction::Handoff { target });
    }

    let mut requests = Vec::with_capacity(calls.len());
    for call in calls {
        let arguments = match serde_json::from_str(&call.function.arguments) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    "Arguments for tool '{}' are not valid JSON ({}); substituting an empty object",
                    call.function.name, err
                );
                Value::Object(Default::default())
            }
        };
        requests.push(ToolCallRequest {
            id: call.id,
            name: call.function.name,
            arguments,
        });
    }
    Ok(ModelAction::ToolCalls(requests))
}

fn wire_call(call: &ToolCallRequest) -> WireToolCall {
    WireToolCall {
        id: call.id.clone(),
        kind: "function".into(),
        function: WireCallFunction {
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        },
    }
}

/// Error bodies can be arbitrarily large HTML pages; keep logs bounded.
fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireCallFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireCallFunction {
    name: String,
    /// JSON-encoded per the chat-completions contract.
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireReplyMessage,
}

#[derive(Debug, Deserialize)]
struct WireReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}
