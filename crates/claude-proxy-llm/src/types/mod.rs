//! Canonical request, response and event types
//!
//! These follow the Anthropic Messages API, which is the only protocol
//! clients speak to the gateway. Provider wire formats convert to and from
//! them.

pub mod message;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use message::{Content, ContentBlock, ImageSource, Message, Role, SystemPrompt, ToolResultContent};
pub use request::{MessagesRequest, Metadata};
pub use response::{MessagesResponse, ResponseBlock, StopReason, Usage, message_id, tool_use_id};
pub use stream::{BlockDelta, ErrorDetail, MessageDelta, StreamContentBlock, StreamEvent, StreamMessage};
pub use tool::{Tool, ToolChoice};
