//! Rough input-token estimate for `/v1/messages/count_tokens`.
//!
//! Not a tokenizer: every string costs `ceil(chars / 4)` tokens and each message
//! adds a fixed overhead.

use super::anthropic_types::{
    ContentBlock, CountTokensRequest, MessageContent, Tool, ToolResultContent, ToolResultFragment,
};

const CHARS_PER_TOKEN: u64 = 4;
const MESSAGE_OVERHEAD: u64 = 4;

pub fn estimate_input_tokens(req: &CountTokensRequest) -> u64 {
    let mut count = 0;

    if let Some(ref system) = req.system {
        count += approx_tokens(&system.as_text());
    }

    for msg in &req.messages {
        match &msg.content {
            MessageContent::Text(text) => count += approx_tokens(text),
            MessageContent::Blocks(blocks) => {
                count += blocks.iter().map(block_tokens).sum::<u64>();
            }
        }
        count += MESSAGE_OVERHEAD;
    }

    for tool in req.tools.iter().flatten() {
        count += tool_tokens(tool);
    }

    count
}

fn block_tokens(block: &ContentBlock) -> u64 {
    match block {
        ContentBlock::Text { text } => approx_tokens(text),
        ContentBlock::ToolUse { name, input, .. } => {
            approx_tokens(name) + approx_tokens(&input.to_string())
        }
        ContentBlock::ToolResult { content, .. } => match content {
            Some(ToolResultContent::Text(t)) => approx_tokens(t),
            // Fragments are costed one by one, not as a joined string.
            Some(ToolResultContent::Fragments(fragments)) => fragments
                .iter()
                .map(|f| match f {
                    ToolResultFragment::Text { text } => approx_tokens(text),
                    ToolResultFragment::Unsupported => 0,
                })
                .sum(),
            None => 0,
        },
        ContentBlock::Image { .. } | ContentBlock::Unsupported => 0,
    }
}

fn tool_tokens(tool: &Tool) -> u64 {
    approx_tokens(&tool.name)
        + tool.description.as_deref().map_or(0, approx_tokens)
        + approx_tokens(&tool.input_schema.to_string())
}

fn approx_tokens(s: &str) -> u64 {
    (s.chars().count() as u64).div_ceil(CHARS_PER_TOKEN)
}
