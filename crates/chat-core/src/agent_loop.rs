use crate::checkpoint::Checkpointer;
use crate::config::{AgentConfig, ProviderConfig};
use crate::error::{ChatError, Result};
use crate::model::ModelHandle;
use crate::tool_registry::ToolRegistry;
use crate::types::{Message, Role, ToolCall, ToolOutput};

use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs, ChatCompletionTool,
    ChatCompletionToolArgs, ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall,
    FunctionObjectArgs,
};
use tracing::{debug, warn};

/// The reasoning loop: alternates model calls and tool calls until the model
/// answers without requesting a tool. Every message it produces is
/// checkpointed as soon as it exists.
pub struct AgentLoop {
    config: AgentConfig,
    temperature: f32,
    max_tokens: u32,
}

impl AgentLoop {
    pub fn new(config: AgentConfig, provider: &ProviderConfig) -> Self {
        Self {
            config,
            temperature: provider.temperature,
            max_tokens: provider.max_tokens,
        }
    }

    /// Run one user turn on `thread_id` and return the final AI message.
    pub async fn run(
        &self,
        model: &ModelHandle,
        tools: &ToolRegistry,
        checkpoint: &Checkpointer,
        thread_id: &str,
        prompt: &str,
    ) -> Result<Message> {
        let mut history = checkpoint.history(thread_id)?;
        let human = Message::human(prompt);
        checkpoint.append(thread_id, &human)?;
        history.push(human);

        let openai_tools = build_openai_tools(tools)?;
        let mut running_messages = self.build_openai_messages(&history)?;

        for iteration in 1..=self.config.max_iterations {
            debug!(thread = thread_id, model = model.model_id(), "Agent loop iteration {}", iteration);

            let mut request_builder = CreateChatCompletionRequestArgs::default();
            request_builder
                .model(model.model_id())
                .messages(running_messages.clone())
                .temperature(self.temperature)
                .max_completion_tokens(self.max_tokens);
            if !openai_tools.is_empty() {
                request_builder.tools(openai_tools.clone());
            }
            let request = request_builder.build().map_err(upstream)?;

            let response = model
                .client()
                .chat()
                .create(request)
                .await
                .map_err(upstream)?;

            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ChatError::UpstreamAgent("No choices in response".into()))?;
            let content = choice.message.content.unwrap_or_default();

            let tool_calls: Vec<ToolCall> = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                })
                .collect();

            if tool_calls.is_empty() {
                let final_message = Message::ai(content);
                checkpoint.append(thread_id, &final_message)?;
                return Ok(final_message);
            }

            let request_msg = Message::ai_with_tool_calls(content, tool_calls.clone());
            checkpoint.append(thread_id, &request_msg)?;
            running_messages.push(to_openai_message(&request_msg)?);

            for tc in &tool_calls {
                let output = self.invoke(tools, tc).await;
                let result_msg = Message::tool_result(&output.tool_call_id, output.content);
                checkpoint.append(thread_id, &result_msg)?;
                running_messages.push(to_openai_message(&result_msg)?);
            }
        }

        warn!(thread = thread_id, "Hit max agent iterations ({})", self.config.max_iterations);
        Err(ChatError::UpstreamAgent(format!(
            "no final answer after {} iterations",
            self.config.max_iterations
        )))
    }

    /// Execute one requested tool call. Failures are reported to the model,
    /// not raised.
    async fn invoke(&self, tools: &ToolRegistry, tc: &ToolCall) -> ToolOutput {
        debug!(tool = %tc.name, "Invoking tool");
        let args: serde_json::Value = if tc.arguments.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(&tc.arguments) {
                Ok(v) => v,
                Err(e) => {
                    return ToolOutput {
                        tool_call_id: tc.id.clone(),
                        content: format!("Invalid JSON arguments: {}", e),
                        is_error: true,
                    }
                }
            }
        };
        let output = tools.execute(&tc.name, &tc.id, args).await;
        if output.is_error {
            warn!(tool = %tc.name, "Tool call failed: {}", output.content);
        }
        output
    }

    fn build_openai_messages(&self, messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut result = Vec::with_capacity(messages.len() + 1);
        if let Some(sys_prompt) = &self.config.system_prompt {
            let sys_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_prompt.as_str())
                .build()
                .map_err(upstream)?;
            result.push(ChatCompletionRequestMessage::System(sys_msg));
        }
        for msg in messages {
            result.push(to_openai_message(msg)?);
        }
        Ok(result)
    }
}

fn upstream(e: OpenAIError) -> ChatError {
    ChatError::UpstreamAgent(e.to_string())
}

fn build_openai_tools(tools: &ToolRegistry) -> Result<Vec<ChatCompletionTool>> {
    tools
        .schemas()
        .iter()
        .map(|s| {
            let func = FunctionObjectArgs::default()
                .name(&s.name)
                .description(&s.description)
                .parameters(s.parameters.clone())
                .build()
                .map_err(|e| ChatError::Schema(format!("function '{}': {}", s.name, e)))?;
            ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(func)
                .build()
                .map_err(|e| ChatError::Schema(format!("tool '{}': {}", s.name, e)))
        })
        .collect()
}

/// Convert a checkpointed message to an async-openai request message.
fn to_openai_message(msg: &Message) -> Result<ChatCompletionRequestMessage> {
    let converted = match msg.role {
        Role::Human => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.as_str())
                .build()
                .map_err(upstream)?,
        ),
        Role::Ai => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            builder.content(msg.content.as_str());
            if let Some(tool_calls) = &msg.tool_calls {
                let tc_openai: Vec<ChatCompletionMessageToolCall> = tool_calls
                    .iter()
                    .map(|tc| ChatCompletionMessageToolCall {
                        id: tc.id.clone(),
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect();
                builder.tool_calls(tc_openai);
            }
            ChatCompletionRequestMessage::Assistant(builder.build().map_err(upstream)?)
        }
        Role::Tool => ChatCompletionRequestMessage::Tool(
            ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(msg.tool_call_id.as_deref().unwrap_or(""))
                .content(msg.content.as_str())
                .build()
                .map_err(upstream)?,
        ),
    };
    Ok(converted)
}
