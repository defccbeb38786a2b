//! HTTP transport using reqwest
//!
//! One-shot requests map to GET (payload as query) or POST (payload as JSON
//! body). Streams are GET requests whose body is a sequence of JSON
//! documents, one per line, optionally framed as server-sent events
//! (`data: {...}`).

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::ChannelError;
use crate::transport::{EventStream, Method, RequestOptions, Transport};

/// Transport against a backend base URL
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    connected: AtomicBool,
}

impl HttpTransport {
    /// Create transport with default request timeout (30s)
    ///
    /// # Errors
    /// `ChannelError::Config` if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>) -> Result<Self, ChannelError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Create transport with a request timeout
    ///
    /// The timeout bounds connecting and every one-shot request, response
    /// body included; streams stay open for as long as the backend keeps
    /// sending.
    ///
    /// # Errors
    /// `ChannelError::Config` if the HTTP client cannot be built
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ChannelError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            connected: AtomicBool::new(true),
        })
    }

    /// Base URL without trailing slash
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[inline]
    fn url(&self, key: &str) -> String {
        format!("{}{}", self.base_url, key)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ChannelError> {
        let response = request.send().await.map_err(|e| {
            self.connected.store(false, Ordering::Relaxed);
            ChannelError::Transport(e.to_string())
        })?;
        self.connected.store(true, Ordering::Relaxed);

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(ChannelError::backend(status.as_u16(), message))
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        key: &str,
        payload: &Value,
        options: RequestOptions,
    ) -> Result<Value, ChannelError> {
        let url = self.url(key);
        tracing::debug!(%url, method = ?options.method, "sending request");

        let request = match options.method {
            Method::Get => self.client.get(&url).query(&query_pairs(payload)),
            Method::Post => self.client.post(&url).json(payload),
        }
        .timeout(self.timeout);
        let body = self
            .send(request)
            .await?
            .bytes()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn stream(&self, key: &str, seed: &Value) -> Result<EventStream, ChannelError> {
        let url = self.url(key);
        tracing::debug!(%url, "opening event stream");

        let response = self
            .send(self.client.get(&url).query(&query_pairs(seed)))
            .await?;
        Ok(json_lines(Box::pin(response.bytes_stream())).boxed())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Flatten a JSON object into query parameters
///
/// Strings are sent verbatim, other values as their JSON text. Non-objects
/// produce no parameters.
#[must_use]
pub fn query_pairs(payload: &Value) -> Vec<(String, String)> {
    payload
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(key, value)| {
                    let text = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), text)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Decode a chunked byte stream into one JSON value per line
///
/// Lines may carry an SSE `data:` prefix; blank lines and other SSE fields
/// are skipped. A transport error ends the stream after being yielded.
pub fn json_lines<S, B, E>(chunks: S) -> impl Stream<Item = Result<Value, ChannelError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = (chunks, Vec::<u8>::new(), VecDeque::new(), false);
    stream::unfold(state, |(mut chunks, mut buffer, mut ready, mut finished)| async move {
        loop {
            if let Some(item) = ready.pop_front() {
                return Some((item, (chunks, buffer, ready, finished)));
            }
            if finished {
                return None;
            }
            match chunks.next().await {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(bytes.as_ref());
                    while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=end).collect();
                        push_line(&line, &mut ready);
                    }
                }
                Some(Err(e)) => {
                    ready.push_back(Err(ChannelError::Transport(e.to_string())));
                    finished = true;
                }
                None => {
                    let rest = std::mem::take(&mut buffer);
                    push_line(&rest, &mut ready);
                    finished = true;
                }
            }
        }
    })
}

fn push_line(line: &[u8], ready: &mut VecDeque<Result<Value, ChannelError>>) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() || text.starts_with(':') {
        return;
    }
    let payload = match text.strip_prefix("data:") {
        Some(data) => data.trim_start(),
        None if text.starts_with("event:") || text.starts_with("id:") || text.starts_with("retry:") => {
            return;
        }
        None => text,
    };
    ready.push_back(serde_json::from_str(payload).map_err(ChannelError::from));
}
