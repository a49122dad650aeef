//! Adapters from OpenAI, Anthropic and Gemini streaming responses to the
//! Vercel AI SDK data stream protocol, plus conversions between the AI SDK
//! message model and each vendor's request shape.

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod stream;

mod util;
