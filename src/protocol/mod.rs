pub mod anthropic;
pub mod canonical;
pub mod gemini;
pub mod mapping;
pub mod openai_chat;

use std::fmt;
use std::str::FromStr;

use futures_util::{future, Stream, StreamExt};

use crate::error::{Error, StreamError};
use crate::stream::{DataStream, DataStreamExt, SseEvent};

use self::anthropic::stream::{anthropic_data_stream, parse_anthropic_sse};
use self::gemini::stream::{gemini_data_stream, parse_gemini_sse};
use self::openai_chat::stream::{openai_data_stream, parse_openai_sse};

/// Upstream vendor whose streaming format is being adapted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Anthropic, Provider::Google];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
        }
    }

    /// Environment variable holding this provider's API key.
    #[must_use]
    pub fn api_key_env(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Google => "GOOGLE_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "google" | "gemini" => Ok(Provider::Google),
            other => Err(Error::Usage(format!("unknown provider: {other}"))),
        }
    }
}

/// Adapt a stream of provider SSE events into data stream parts.
///
/// Events without a payload (keep-alives, `[DONE]`, unknown Anthropic event
/// names) are skipped before decoding.
pub fn adapt_sse<S>(provider: Provider, events: S) -> DataStream
where
    S: Stream<Item = Result<SseEvent, StreamError>> + Send + 'static,
{
    match provider {
        Provider::OpenAi => {
            let chunks = events.filter_map(|event| {
                future::ready(match event {
                    Ok(event) => parse_openai_sse(&event),
                    Err(err) => Some(Err(err)),
                })
            });
            openai_data_stream(chunks).into_data_stream()
        }
        Provider::Anthropic => {
            let events = events.filter_map(|event| {
                future::ready(match event {
                    Ok(event) => parse_anthropic_sse(&event),
                    Err(err) => Some(Err(err)),
                })
            });
            anthropic_data_stream(events).into_data_stream()
        }
        Provider::Google => {
            let responses = events.filter_map(|event| {
                future::ready(match event {
                    Ok(event) => parse_gemini_sse(&event),
                    Err(err) => Some(Err(err)),
                })
            });
            gemini_data_stream(responses).into_data_stream()
        }
    }
}
