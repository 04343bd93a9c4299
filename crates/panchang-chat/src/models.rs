//! These models represent the objects passed around by the agent
//!
//! There are several different related formats we need to interact with:
//! - useChat style messages and tool invocations, posted from a client to the endpoint
//! - data stream protocol parts, streamed from the endpoint back to the client
//! - openai messages/tools, sent from the agent to the LLM
//! - tool calls, sent from the agent to the systems providing capabilities
//!
//! We always immediately convert those formats into the internal structs here, which
//! are therefore not an exact match to any of them.
pub mod message;
pub mod role;
pub mod tool;
