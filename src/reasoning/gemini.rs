//! Gemini function-calling reasoner
//!
//! Maps session history onto Gemini `contents`:
//! - human messages are `user` text parts
//! - assistant messages are `model` parts (text and/or `functionCall`)
//! - tool results are `user` parts of `functionResponse`
//!
//! Adjacent `user` parts share one content so the request alternates
//! strictly between `user` and `model`.

use super::ReasoningClient;
use crate::error::AssistantError;
use crate::gemini::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GeminiClient,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part, ToolDeclarations,
};
use crate::memory::ContextWindow;
use crate::models::{AssistantTurn, Message, Role, ToolCall};
use crate::tools::ToolRegistry;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const SYSTEM_PROMPT: &str = r#"You are a helpful financial assistant that can:
1. Create expense records
2. Create notes
3. Fetch expense data
4. Fetch notes
5. Analyze financial data and provide insights

When users ask to create, fetch, or analyze data, use the appropriate tools.
Each user message starts with "[User ID: <id>]". Tools act on that user by default; do not pass a different user_id.
Be helpful and provide clear responses. For analysis requests, fetch the relevant data first, then analyze it."#;

pub struct GeminiReasoner {
    client: Arc<GeminiClient>,
    window: ContextWindow,
    system_prompt: String,
    generation: GenerationConfig,
}

impl GeminiReasoner {
    pub fn new(client: Arc<GeminiClient>) -> Self {
        Self {
            client,
            window: ContextWindow::new(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            generation: GenerationConfig::default(),
        }
    }

    pub fn with_window(mut self, window: ContextWindow) -> Self {
        self.window = window;
        self
    }

    fn build_request(&self, history: &[Message], tools: &ToolRegistry) -> GenerateContentRequest {
        let declarations: Vec<FunctionDeclaration> = tools
            .specs()
            .map(|spec| FunctionDeclaration {
                name: spec.name.to_string(),
                description: spec.description.to_string(),
                parameters: spec.parameters_schema(),
            })
            .collect();

        GenerateContentRequest {
            contents: to_contents(self.window.select(history)),
            system_instruction: Some(Content::system(&self.system_prompt)),
            tools: if declarations.is_empty() {
                Vec::new()
            } else {
                vec![ToolDeclarations {
                    function_declarations: declarations,
                }]
            },
            generation_config: self.generation.clone(),
        }
    }
}

#[async_trait]
impl ReasoningClient for GeminiReasoner {
    async fn step(&self, history: &[Message], tools: &ToolRegistry) -> Result<AssistantTurn> {
        let request = self.build_request(history, tools);
        let response = self.client.generate_content(&request).await?;

        if let Some(usage) = &response.usage_metadata {
            debug!(
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "Gemini usage"
            );
        }

        let turn = parse_turn(&response)?;
        match &turn {
            AssistantTurn::ToolRequest(calls) => {
                info!(tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), "model requested tools")
            }
            AssistantTurn::FinalReply(text) => info!(chars = text.len(), "model replied"),
        }
        Ok(turn)
    }
}

fn to_contents(history: &[Message]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::with_capacity(history.len());

    for message in history {
        match message.role {
            Role::Human => push_user(&mut contents, Part::text(&message.content)),
            Role::Assistant => {
                let mut parts = Vec::new();
                if !message.content.is_empty() {
                    parts.push(Part::text(&message.content));
                }
                parts.extend(message.tool_calls.iter().map(|call| {
                    Part::function_call(FunctionCall {
                        id: Some(call.call_id.clone()),
                        name: call.name.clone(),
                        args: call.arguments.clone(),
                    })
                }));

                // empty final replies carry nothing worth resending
                if !parts.is_empty() {
                    contents.push(Content::model(parts));
                }
            }
            Role::ToolResult => {
                let part = Part::function_response(FunctionResponse {
                    id: message.call_id.clone(),
                    name: message.tool_name.clone().unwrap_or_default(),
                    response: json!({ "result": message.content }),
                });
                push_user(&mut contents, part);
            }
        }
    }

    contents
}

fn push_user(contents: &mut Vec<Content>, part: Part) {
    match contents.last_mut() {
        Some(last) if last.role.as_deref() == Some("user") => last.parts.push(part),
        _ => contents.push(Content::user(vec![part])),
    }
}

fn parse_turn(response: &GenerateContentResponse) -> Result<AssistantTurn> {
    let candidate = response.candidates.first().ok_or_else(|| {
        AssistantError::ReasoningService("No candidates in Gemini response".to_string())
    })?;

    let parts = candidate
        .content
        .as_ref()
        .map(|c| c.parts.as_slice())
        .unwrap_or(&[]);

    let mut calls = Vec::new();
    let mut text = String::new();

    for part in parts {
        if let Some(call) = &part.function_call {
            calls.push(decode_call(call)?);
        } else if let Some(t) = &part.text {
            text.push_str(t);
        }
    }

    if calls.is_empty() {
        Ok(AssistantTurn::FinalReply(text.trim().to_string()))
    } else {
        Ok(AssistantTurn::ToolRequest(calls))
    }
}

fn decode_call(call: &FunctionCall) -> Result<ToolCall> {
    if call.name.trim().is_empty() {
        return Err(AssistantError::ReasoningService(
            "function call without a name".to_string(),
        ));
    }

    let arguments = match &call.args {
        Value::Null => Value::Object(Map::new()),
        Value::Object(_) => call.args.clone(),
        other => {
            return Err(AssistantError::ReasoningService(format!(
                "arguments for '{}' are not an object: {}",
                call.name, other
            )))
        }
    };

    Ok(match call.id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => ToolCall::with_id(id, &call.name, arguments),
        None => ToolCall::new(&call.name, arguments),
    })
}
