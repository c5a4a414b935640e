//! Translate Anthropic Messages API requests into `OpenAI` Chat Completions requests.
//!
//! A single Anthropic message can expand into several `OpenAI` messages: a user
//! message carrying `tool_result` blocks becomes one `tool`-role message per result.

use super::anthropic_types::{
    ContentBlock, Message, MessageContent, MessagesRequest, Role, Tool, ToolChoice,
};
use super::openai_types::{
    ChatCompletionRequest, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
};

/// Translate an Anthropic Messages API request into an `OpenAI` Chat Completions request.
/// `backend_model` is the resolved backend id that replaces the caller's alias.
pub fn anthropic_to_openai(req: &MessagesRequest, backend_model: &str) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(ChatMessage::text("system", text));
        }
    }

    messages.extend(map_messages(&req.messages));

    let tools = map_tools(req.tools.as_deref());
    let tool_choice = if tools.is_some() {
        req.tool_choice.as_ref().map(map_tool_choice)
    } else {
        None
    };

    ChatCompletionRequest {
        model: backend_model.to_string(),
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        tools,
        tool_choice,
        stop: req.stop_sequences.clone(),
    }
}

/// Map the conversation, preserving message order.
pub fn map_messages(messages: &[Message]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        match (&msg.content, msg.role) {
            (MessageContent::Text(text), role) => {
                out.push(ChatMessage::text(role_name(role), text.clone()));
            }
            (MessageContent::Blocks(blocks), Role::Assistant) => {
                out.push(map_assistant_blocks(blocks));
            }
            (MessageContent::Blocks(blocks), Role::User) => {
                out.extend(map_user_blocks(blocks));
            }
        }
    }

    out
}

/// `None` for absent or empty tool lists, so no `tools` field is sent.
pub fn map_tools(tools: Option<&[Tool]>) -> Option<Vec<ChatTool>> {
    let tools = tools.filter(|t| !t.is_empty())?;

    Some(
        tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect(),
    )
}

pub fn map_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match (tc.choice_type.as_str(), tc.name.as_ref()) {
        ("any", _) => ChatToolChoice::String("required".to_string()),
        ("tool", Some(name)) => ChatToolChoice::Specific(ChatToolChoiceSpecific {
            choice_type: "function".to_string(),
            function: ChatToolChoiceFunction { name: name.clone() },
        }),
        (other, _) => ChatToolChoice::String(other.to_string()),
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn joined_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::ToolUse { .. }
            | ContentBlock::ToolResult { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::Unsupported => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn map_assistant_blocks(blocks: &[ContentBlock]) -> ChatMessage {
    let text = joined_text(blocks);

    let tool_calls: Vec<ChatToolCall> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => Some(ChatToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            ContentBlock::Text { .. }
            | ContentBlock::ToolResult { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::Unsupported => None,
        })
        .collect();

    ChatMessage {
        role: "assistant".to_string(),
        content: if text.is_empty() { None } else { Some(text) },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
    }
}

fn map_user_blocks(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    let text = joined_text(blocks);
    if !text.is_empty() {
        messages.push(ChatMessage::text("user", text));
    }

    for block in blocks {
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                let result = content.as_ref().map(|c| c.as_text()).unwrap_or_default();
                messages.push(ChatMessage::tool_result(tool_use_id.clone(), result));
            }
            ContentBlock::Text { .. }
            | ContentBlock::ToolUse { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::Unsupported => {}
        }
    }

    messages
}
