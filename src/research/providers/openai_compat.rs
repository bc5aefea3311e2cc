//! Streaming client for OpenAI-compatible chat-completions endpoints.
//!
//! Works against OpenAI itself and against proxies that speak the same API
//! (LiteLLM, vLLM, Ollama's `/v1` surface). The prompt is sent as a single user
//! message with `stream: true`; the server-sent-event body is parsed with
//! `eventsource-stream` so each delta reaches the agent task as soon as it
//! arrives.
//!
//! # Example
//!
//! ```rust,no_run
//! use fanout_research::config::ProviderConfig;
//! use fanout_research::provider::TextGenerator;
//! use fanout_research::providers::openai_compat::OpenAiCompatibleGenerator;
//! use futures_util::StreamExt;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let generator = OpenAiCompatibleGenerator::new(&ProviderConfig::from_env());
//! let mut fragments = generator.generate("gpt-4o", "Say hello").await?;
//! while let Some(fragment) = fragments.next().await {
//!     print!("{}", fragment?);
//! }
//! # Ok(())
//! # }
//! ```

use crate::research::config::ProviderConfig;
use crate::research::http_client_pool::get_or_create_client;
use crate::research::provider::{FragmentStream, ProviderError, TextGenerator};
use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// [`TextGenerator`] backed by an OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiCompatibleGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatibleGenerator {
    pub fn new(config: &ProviderConfig) -> Self {
        Self::new_with_base_url(&config.api_key, &config.base_url)
    }

    pub fn new_with_base_url(api_key: &str, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: get_or_create_client(&base_url),
            base_url,
            api_key: api_key.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    async fn generate(&self, model_id: &str, prompt: &str) -> Result<FragmentStream, ProviderError> {
        let url = format!("{}{}", self.base_url, CHAT_COMPLETIONS_PATH);
        let request = ChatRequest {
            model: model_id,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: true,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                log::error!(
                    "OpenAiCompatibleGenerator::generate(...): request to {} failed: {}",
                    url,
                    err
                );
                ProviderError::Unavailable(format!("request failed: {}", err))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {} from {}: {}", status, url, preview(&body, 200));
            log::error!("OpenAiCompatibleGenerator::generate(...): {}", message);
            return Err(
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    ProviderError::Unavailable(message)
                } else {
                    ProviderError::Failed(message)
                },
            );
        }

        Ok(decode_fragments(response.bytes_stream()))
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

/// Decoding state: the parsed event stream plus fragments not yet yielded.
struct DecodeState<S> {
    events: S,
    pending: VecDeque<Result<String, ProviderError>>,
    saw_done: bool,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn accept(&mut self, data: &str) {
        let data = data.trim();
        if data.is_empty() {
            return;
        }
        if data == "[DONE]" {
            self.saw_done = true;
            self.finished = true;
            return;
        }
        match serde_json::from_str::<ChatChunk>(data) {
            Ok(chunk) => {
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            self.pending.push_back(Ok(content));
                        }
                    }
                }
            }
            Err(err) => {
                self.pending.push_back(Err(ProviderError::Failed(format!(
                    "malformed stream frame: {}",
                    err
                ))));
                self.finished = true;
            }
        }
    }
}

fn stream_error<E: fmt::Display>(err: EventStreamError<E>) -> ProviderError {
    match err {
        EventStreamError::Transport(err) => {
            log::warn!(
                "fanout_research::providers::openai_compat::decode_fragments(...): body error: {}",
                err
            );
            ProviderError::Unavailable(format!("stream interrupted: {}", err))
        }
        other => ProviderError::Failed(format!("malformed event stream: {}", other)),
    }
}

/// Turn a raw server-sent-events body into content fragments.
///
/// The stream ends at `[DONE]`. A body that ends before `[DONE]` yields a
/// transient error, so a cut-off answer is never mistaken for a complete one.
/// The first error ends the stream.
pub(crate) fn decode_fragments<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: fmt::Display + Send,
{
    let state = DecodeState {
        events: Box::pin(body.eventsource()),
        pending: VecDeque::new(),
        saw_done: false,
        finished: false,
    };

    Box::pin(stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    return Some((item, None));
                }
                return Some((item, Some(state)));
            }
            if state.finished {
                return None;
            }
            match state.events.next().await {
                Some(Ok(event)) => state.accept(&event.data),
                Some(Err(err)) => return Some((Err(stream_error(err)), None)),
                None if state.saw_done => return None,
                None => {
                    return Some((
                        Err(ProviderError::Unavailable(
                            "stream ended before [DONE]".to_string(),
                        )),
                        None,
                    ))
                }
            }
        }
    }))
}
