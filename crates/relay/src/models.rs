//! These models represent the objects passed around during a turn
//!
//! There are several different related formats we need to interact with:
//! - chat history sent from the browser to the relay
//! - anthropic messages/tools, sent from the relay to the LLM
//! - openai messages/tools, sent from the relay to the LLM
//! - tool invocations assembled from the upstream stream
//!
//! We always immediately convert those data models into the internal structs using to/from
//! helpers, so the internal models are not an exact match to any of these formats.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
