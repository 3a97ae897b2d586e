//! # engram-llm — chat-completion collaborator for engram
//!
//! One unified client over the backends the memory engine can talk to:
//!   - **Ollama** (local, recommended default)
//!   - **OpenAI-compatible API** (also works with Anthropic, Together, etc.)
//!   - **None** — every call fails, triggering the rule-based fallback
//!
//! The engine uses this crate for exactly two things: compaction summary
//! generation and optional answer polishing. Both callers treat a failure
//! here as "skip the enrichment", never as a reason to abort.

pub mod client;
pub mod error;
pub mod prompt;
pub mod types;

pub use client::{ChatClient, ChatProvider};
pub use error::LlmError;
pub use types::{ChatRequest, ChatResponse};
