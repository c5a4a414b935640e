//! State machine for re-framing `OpenAI` streaming chunks into Anthropic SSE events.
//!
//! The backend streams a flat sequence of deltas (text fragments and partial
//! tool calls) with no block boundaries. Anthropic clients expect explicit
//! `content_block_start` / `content_block_delta` / `content_block_stop` triples
//! keyed by a zero-based index, where a block is a maximal run of same-kind
//! content. [`StreamReframer`] tracks the open block in a [`BlockState`] and
//! emits a bounded number of events per chunk.
//!
//! ```text
//! let mut reframer = StreamReframer::new("requested-model");
//! send(reframer.start());
//! for chunk in backend_chunks {
//!     send(reframer.process_chunk(&chunk));
//! }
//! send(reframer.finish());
//! ```

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessageStartBody, ResponseContentBlock, StopReason,
    StreamEvent, Usage,
};
use super::openai_types::{ChatCompletionChunk, ChunkToolCall};
use super::response::map_finish_reason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockKind {
    #[default]
    None,
    Text,
    ToolUse,
}

/// Identity and kind of the content block currently open.
///
/// `index` is the last index handed out; it only moves forward, so indices are
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockState {
    index: Option<usize>,
    kind: BlockKind,
}

impl BlockState {
    #[must_use]
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Index of the open block, if any.
    fn open_index(&self) -> Option<usize> {
        match self.kind {
            BlockKind::None => None,
            BlockKind::Text | BlockKind::ToolUse => self.index,
        }
    }

    fn close(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(index) = self.open_index() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
        self.kind = BlockKind::None;
    }

    /// Close whatever is open and start a new block at the next index.
    fn open(
        &mut self,
        kind: BlockKind,
        content_block: ResponseContentBlock,
        events: &mut Vec<StreamEvent>,
    ) -> usize {
        self.close(events);
        let index = self.index.map_or(0, |i| i + 1);
        self.index = Some(index);
        self.kind = kind;
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block,
        });
        index
    }
}

#[derive(Debug)]
pub struct StreamReframer {
    model: String,
    msg_id: String,
    blocks: BlockState,
    started: bool,
    terminated: bool,
    stopped: bool,
}

impl StreamReframer {
    pub fn new(model: &str) -> Self {
        Self::with_id(
            model,
            format!("msg_{}", uuid::Uuid::new_v4().simple()),
        )
    }

    pub fn with_id(model: &str, msg_id: impl Into<String>) -> Self {
        Self {
            model: model.to_string(),
            msg_id: msg_id.into(),
            blocks: BlockState::default(),
            started: false,
            terminated: false,
            stopped: false,
        }
    }

    #[must_use]
    pub fn block_state(&self) -> BlockState {
        self.blocks
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.msg_id
    }

    /// Emit `message_start`. Called once the backend stream is open.
    pub fn start(&mut self) -> Vec<StreamEvent> {
        if self.started {
            return Vec::new();
        }
        self.started = true;

        vec![StreamEvent::MessageStart {
            message: MessageStartBody {
                id: self.msg_id.clone(),
                message_type: "message".to_string(),
                role: "assistant".to_string(),
                model: self.model.clone(),
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        }]
    }

    /// Process one backend chunk, returning zero or more Anthropic events.
    /// Chunks arriving after the terminal one are ignored.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut events = self.start();

        if self.terminated || self.stopped {
            return events;
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        if let Some(text) = choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
            self.push_text(text, &mut events);
        }

        for tc in choice.delta.tool_calls.iter().flatten() {
            self.push_tool_call(tc, &mut events);
        }

        if let Some(ref reason) = choice.finish_reason {
            self.terminate(map_finish_reason(Some(reason)), &mut events);
        }

        events
    }

    /// Call when the backend stream ends (on `[DONE]` or end of body).
    /// Emits `message_stop` exactly once; later calls return nothing.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.stopped {
            return Vec::new();
        }

        let mut events = self.start();
        if !self.terminated {
            self.terminate(StopReason::EndTurn, &mut events);
        }
        events.push(StreamEvent::MessageStop);
        self.stopped = true;

        events
    }

    fn push_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        let index = match self.blocks.open_index() {
            Some(index) if self.blocks.kind == BlockKind::Text => index,
            _ => self.blocks.open(
                BlockKind::Text,
                ResponseContentBlock::Text {
                    text: String::new(),
                },
                events,
            ),
        };

        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn push_tool_call(&mut self, tc: &ChunkToolCall, events: &mut Vec<StreamEvent>) {
        let function = tc.function.as_ref();

        // A non-empty call id always starts a new block, even right after
        // another tool call. Some backends repeat `"id": ""` on continuations.
        if let Some(id) = tc.id.as_deref().filter(|id| !id.is_empty()) {
            let name = function
                .and_then(|f| f.name.as_deref())
                .filter(|n| !n.is_empty())
                .unwrap_or_default();
            self.blocks.open(
                BlockKind::ToolUse,
                ResponseContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: serde_json::Value::Object(serde_json::Map::new()),
                },
                events,
            );
        }

        let Some(args) = function
            .and_then(|f| f.arguments.as_deref())
            .filter(|a| !a.is_empty())
        else {
            return;
        };

        match self.blocks.open_index() {
            Some(index) if self.blocks.kind == BlockKind::ToolUse => {
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJsonDelta {
                        partial_json: args.to_string(),
                    },
                });
            }
            _ => {
                tracing::debug!(
                    call_index = tc.index,
                    "Dropping tool-call arguments with no open tool_use block"
                );
            }
        }
    }

    fn terminate(&mut self, stop_reason: StopReason, events: &mut Vec<StreamEvent>) {
        self.blocks.close(events);
        self.terminated = true;

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason,
                stop_sequence: None,
            },
            usage: DeltaUsage { output_tokens: 0 },
        });
    }
}
