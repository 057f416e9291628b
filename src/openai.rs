use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::history::HistoryMessage;

pub const GPT_4_MODEL: &str = "gpt-4-1106-preview";
pub const GPT_3_MODEL: &str = "gpt-3.5-turbo-1106";

const COMPLETION_TOKENS: u16 = 1024;

pub fn select_model(low_cost: bool) -> &'static str {
    if low_cost {
        GPT_3_MODEL
    } else {
        GPT_4_MODEL
    }
}

/// Resolve the API key: environment first, then `~/.openai_api_key`.
pub fn load_api_key() -> Result<String> {
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        let key = key.trim().to_string();
        if !key.is_empty() {
            return Ok(key);
        }
    }

    let path = dirs::home_dir()
        .ok_or_else(|| anyhow!("Home directory not found"))?
        .join(".openai_api_key");
    let key = std::fs::read_to_string(&path).map_err(|_| {
        anyhow!("Failed to read .openai_api_key file in home directory")
    })?;
    Ok(key.trim().to_string())
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [HistoryMessage],
    stream: bool,
    max_tokens: u16,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Extract the delta content from one SSE `data:` payload. Returns `None`
/// for keep-alive chunks that carry no text.
fn parse_chunk(data: &str) -> Result<Option<String>> {
    let chunk: StreamChunk = serde_json::from_str(data)?;
    let Some(choice) = chunk.choices.first() else {
        return Ok(None);
    };
    if choice.finish_reason.is_some() {
        return Ok(None);
    }
    Ok(choice.delta.content.clone().filter(|c| !c.is_empty()))
}

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com/v1")
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Start a streaming chat completion. The returned receiver yields one
    /// item per delivered fragment; a mid-stream failure arrives as an `Err`
    /// item and ends the stream.
    pub async fn stream_chat(
        &self,
        model: &str,
        messages: &[HistoryMessage],
    ) -> Result<mpsc::UnboundedReceiver<Result<String>>> {
        let request = ChatRequest {
            model,
            messages,
            stream: true,
            max_tokens: COMPLETION_TOKENS,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("OpenAI API error {}: {}", status, text));
        }

        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            'read: while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(anyhow!("stream read error: {e}")));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // SSE events are newline-delimited; chunks may split a line
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'read;
                    }

                    match parse_chunk(data) {
                        Ok(Some(content)) => {
                            if tx.send(Ok(content)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(anyhow!("stream parse error: {e}")));
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
