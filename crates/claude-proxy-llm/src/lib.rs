//! Anthropic Messages API gateway over non-Anthropic model providers
//!
//! Requests arrive in the canonical (Anthropic) format, are routed to one
//! configured provider and transcoded to its wire protocol. Responses and
//! streams are transcoded back, and upstream failures are normalized into a
//! single error taxonomy.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod convert;
pub mod error;
#[cfg(feature = "http")]
mod handler;
mod metrics;
pub mod normalize;
pub mod protocol;
pub mod provider;
pub mod registry;
mod state;
pub mod stream;
pub mod tokens;
pub mod types;

pub use error::{ErrorKind, LlmError, NormalizedError};
#[cfg(feature = "http")]
pub use handler::llm_router;
pub use provider::{ProviderAdapter, ProviderCapabilities};
pub use registry::{ProviderRegistry, RegisteredProvider, Selection};
pub use state::LlmState;
pub use types::{MessagesRequest, MessagesResponse, StreamEvent};
