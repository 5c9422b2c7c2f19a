//! Core agent loop implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::conversation::History;
use crate::llm::{ChatMessage, ChatResponse, LlmClient, OpenAiClient, Role, ToolCall};
use crate::tools::{TavilyClient, ToolRegistry};

use super::prompt::build_system_prompt;
use super::{AgentError, AgentInvoker, AgentReply, RetryPolicy};

/// One executed tool call, reported in [`AgentReply::raw`].
#[derive(Debug, Clone, Serialize)]
pub struct ToolStep {
    pub tool: String,
    pub arguments: Value,
    pub observation: String,
}

/// How a single model turn was understood.
enum Attempt {
    Final(String),
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
    ParseFailure {
        reason: String,
        calls: Option<Vec<ToolCall>>,
    },
}

/// Tool-calling agent over an OpenAI-compatible model.
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    model: String,
    temperature: f32,
    max_iterations: usize,
    retry: RetryPolicy,
}

impl Agent {
    /// Create an agent with an explicit client and tool set.
    pub fn new(config: &Config, llm: Arc<dyn LlmClient>, tools: ToolRegistry) -> Self {
        Self {
            llm,
            tools,
            model: config.default_model.clone(),
            temperature: config.temperature,
            max_iterations: config.max_iterations.max(1),
            retry: config.retry.clone(),
        }
    }

    /// Production wiring: OpenAI-compatible client plus Tavily web search.
    pub fn from_config(config: &Config) -> Self {
        let llm = Arc::new(OpenAiClient::new(&config.base_url, &config.api_key));
        let search = Arc::new(TavilyClient::new(
            &config.search_api_key,
            config.search_max_results,
        ));
        Self::new(config, llm, ToolRegistry::with_search(search))
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    fn classify(&self, response: ChatResponse) -> Attempt {
        if let Some(calls) = response.tool_calls.filter(|c| !c.is_empty()) {
            for call in &calls {
                if !self.tools.contains(&call.function.name) {
                    return Attempt::ParseFailure {
                        reason: format!("unknown tool `{}`", call.function.name),
                        calls: Some(calls.clone()),
                    };
                }
                if let Err(reason) = parse_arguments(&call.function.arguments) {
                    return Attempt::ParseFailure {
                        reason: format!(
                            "invalid arguments for `{}`: {}",
                            call.function.name, reason
                        ),
                        calls: Some(calls.clone()),
                    };
                }
            }
            return Attempt::ToolCalls {
                content: response.content,
                calls,
            };
        }

        match response.content.filter(|c| !c.trim().is_empty()) {
            Some(text) => Attempt::Final(text),
            None => Attempt::ParseFailure {
                reason: "response had neither text nor tool calls".to_string(),
                calls: None,
            },
        }
    }

    /// Run the tool calls of one model turn, appending results to `messages`.
    async fn execute_tool_calls(
        &self,
        content: Option<String>,
        calls: Vec<ToolCall>,
        messages: &mut Vec<ChatMessage>,
        steps: &mut Vec<ToolStep>,
    ) -> Result<(), AgentError> {
        messages.push(ChatMessage {
            role: Role::Assistant,
            content,
            tool_calls: Some(calls.clone()),
            tool_call_id: None,
        });

        for call in calls {
            // Validated by classify().
            let args = parse_arguments(&call.function.arguments).unwrap_or(Value::Null);
            tracing::debug!(tool = %call.function.name, %args, "Calling tool");

            let observation = self
                .tools
                .execute(&call.function.name, args.clone())
                .await
                .map_err(|e| AgentError::Tool {
                    name: call.function.name.clone(),
                    message: e.to_string(),
                })?;

            messages.push(ChatMessage::tool_result(&call.id, observation.clone()));
            steps.push(ToolStep {
                tool: call.function.name,
                arguments: args,
                observation: truncate_for_log(&observation, 2000),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AgentInvoker for Agent {
    async fn invoke(
        &self,
        history: &History,
        instruction: &str,
    ) -> Result<AgentReply, AgentError> {
        if instruction.trim().is_empty() {
            return Err(AgentError::EmptyInstruction);
        }

        let mut messages = vec![ChatMessage::system(build_system_prompt(&self.tools))];
        messages.extend(history.to_messages(instruction));

        let tool_schemas = self.tools.get_tool_schemas();
        let mut steps: Vec<ToolStep> = Vec::new();
        let mut parse_failures = 0u32;

        for iteration in 0..self.max_iterations {
            tracing::debug!("Agent iteration {}", iteration + 1);

            let response = self
                .llm
                .chat_completion(
                    &self.model,
                    self.temperature,
                    &messages,
                    Some(&tool_schemas),
                )
                .await?;

            match self.classify(response) {
                Attempt::Final(output) => {
                    tracing::info!(
                        iterations = iteration + 1,
                        tool_calls = steps.len(),
                        output_len = output.len(),
                        "Agent produced final answer"
                    );
                    return Ok(AgentReply {
                        output,
                        raw: json!({
                            "intermediate_steps": steps,
                            "model_calls": iteration + 1,
                            "parse_failures": parse_failures,
                        }),
                    });
                }
                Attempt::ToolCalls { content, calls } => {
                    self.execute_tool_calls(content, calls, &mut messages, &mut steps)
                        .await?;
                }
                Attempt::ParseFailure { reason, calls } => {
                    parse_failures += 1;
                    if !self.retry.allows(parse_failures) {
                        return Err(AgentError::ParseRetriesExhausted {
                            attempts: parse_failures,
                            last: reason,
                        });
                    }
                    tracing::warn!(
                        attempt = parse_failures,
                        %reason,
                        "Could not parse model output; re-prompting"
                    );
                    push_correction(&mut messages, &reason, calls);
                    tokio::time::sleep(self.retry.delay_for(parse_failures - 1)).await;
                }
            }
        }

        Err(AgentError::MaxIterations(self.max_iterations))
    }
}

fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v) if v.is_object() => Ok(v),
        Ok(_) => Err("arguments must be a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Tell the model its last turn was unusable. Tool calls must each get a reply.
fn push_correction(messages: &mut Vec<ChatMessage>, reason: &str, calls: Option<Vec<ToolCall>>) {
    let note = format!(
        "Invalid or incomplete response ({}). Please try again, either calling an available tool with valid JSON arguments or answering in plain text.",
        reason
    );
    match calls {
        Some(calls) => {
            let ids: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();
            messages.push(ChatMessage {
                role: Role::Assistant,
                content: None,
                tool_calls: Some(calls),
                tool_call_id: None,
            });
            for id in ids {
                messages.push(ChatMessage::tool_result(id, note.clone()));
            }
        }
        None => messages.push(ChatMessage::user(note)),
    }
}

/// Truncate a string for logging purposes.
fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}
