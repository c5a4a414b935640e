//! Protocol adaptation between the Anthropic Messages API and `OpenAI` Chat Completions.
//!
//! Requests, responses, streaming events and token estimates. Everything in
//! here is pure: no I/O, no shared state.

pub mod anthropic_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
pub mod tokens;
