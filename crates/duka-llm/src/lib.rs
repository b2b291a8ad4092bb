//! LLM access for the pipeline: a provider trait with one HTTP
//! implementation, a credential-keyed client registry, and the three
//! single-purpose classifiers (intent, language, governor) whose JSON output
//! is validated before anything downstream may act on it.

pub mod classify;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod slots;

pub use provider::{ChatMessage, CompletionRequest, LlmProvider, ProviderError};
pub use registry::ProviderRegistry;
