use super::anthropic_types::{MessagesResponse, ResponseContentBlock, StopReason, Usage};
use super::openai_types::ChatCompletionResponse;
use crate::error::{GatewayError, Result};

/// Translate an `OpenAI` Chat Completion response into an Anthropic Messages response.
/// `requested_model` is the alias the caller asked for, echoed back unchanged.
///
/// # Errors
/// Returns `GatewayError::MalformedToolArguments` if a tool call's argument
/// string is not valid JSON.
pub fn openai_to_anthropic(
    resp: &ChatCompletionResponse,
    requested_model: &str,
) -> Result<MessagesResponse> {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        if let Some(ref text) = c.message.content {
            if !text.is_empty() {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
        }

        for tc in c.message.tool_calls.iter().flatten() {
            let input: serde_json::Value =
                serde_json::from_str(&tc.function.arguments).map_err(|source| {
                    GatewayError::MalformedToolArguments {
                        call_id: tc.id.clone(),
                        source,
                    }
                })?;

            content.push(ResponseContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input,
            });
        }
    }

    let stop_reason = map_finish_reason(choice.and_then(|c| c.finish_reason.as_deref()));

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });

    Ok(MessagesResponse {
        id: format!("msg_{}", resp.id),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: requested_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage,
    })
}

/// Map an `OpenAI` `finish_reason` to an Anthropic `stop_reason`.
/// Only tool calls are distinguished; everything else ends the turn.
pub fn map_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("tool_calls") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::*;

    fn make_response(
        content: Option<&str>,
        tool_calls: Option<Vec<ChatToolCall>>,
        finish_reason: Option<&str>,
    ) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-abc123".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "backend-m".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content: content.map(String::from),
                    tool_calls,
                },
                finish_reason: finish_reason.map(String::from),
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
        }
    }

    fn call(id: &str, name: &str, arguments: &str) -> ChatToolCall {
        ChatToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: ChatToolCallFunction {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    #[test]
    fn test_simple_text_response() {
        let resp = make_response(Some("Hello!"), None, Some("stop"));
        let result = openai_to_anthropic(&resp, "m").unwrap();

        assert_eq!(result.id, "msg_chatcmpl-abc123");
        assert_eq!(result.role, "assistant");
        assert_eq!(result.model, "m");
        assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(result.stop_sequence, None);
        assert_eq!(
            result.content,
            vec![ResponseContentBlock::Text {
                text: "Hello!".to_string()
            }]
        );
        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.usage.output_tokens, 20);
    }

    #[test]
    fn test_tool_call_response() {
        let resp = make_response(
            Some("Let me check."),
            Some(vec![call("call_abc", "get_weather", "{\"city\":\"London\"}")]),
            Some("tool_calls"),
        );

        let result = openai_to_anthropic(&resp, "m").unwrap();

        assert_eq!(result.content.len(), 2);
        assert_eq!(result.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(
            result.content[1],
            ResponseContentBlock::ToolUse {
                id: "call_abc".to_string(),
                name: "get_weather".to_string(),
                input: serde_json::json!({"city": "London"}),
            }
        );
    }

    #[test]
    fn test_malformed_tool_arguments_fail() {
        let resp = make_response(
            None,
            Some(vec![call("call_bad", "f", "{\"city\":")]),
            Some("tool_calls"),
        );

        let err = openai_to_anthropic(&resp, "m").unwrap_err();
        assert!(matches!(
            err,
            GatewayError::MalformedToolArguments { ref call_id, .. } if call_id == "call_bad"
        ));
    }

    #[test]
    fn test_empty_text_and_missing_usage() {
        let mut resp = make_response(Some(""), None, Some("length"));
        resp.usage = None;

        let result = openai_to_anthropic(&resp, "m").unwrap();
        assert!(result.content.is_empty());
        assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(result.usage, Usage::default());
    }

    #[test]
    fn test_no_choices() {
        let mut resp = make_response(None, None, None);
        resp.choices.clear();

        let result = openai_to_anthropic(&resp, "m").unwrap();
        assert!(result.content.is_empty());
        assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason(Some("tool_calls")), StopReason::ToolUse);
        assert_eq!(map_finish_reason(Some("stop")), StopReason::EndTurn);
        assert_eq!(map_finish_reason(Some("length")), StopReason::EndTurn);
        assert_eq!(map_finish_reason(Some("content_filter")), StopReason::EndTurn);
        assert_eq!(map_finish_reason(None), StopReason::EndTurn);
    }
}
