use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Part {
    text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

impl Content {
    fn user(text: &str) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part { text: text.to_string() }],
        }
    }

    fn model(text: &str) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part { text: text.to_string() }],
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    system_instruction: SystemInstruction,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct StreamChunk {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<Part>>,
}

/// One event of a streaming reply, delivered in arrival order.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Fragment(String),
    Done,
    Error(String),
}

/// A single conversation with the Gemini API.
///
/// The service itself is stateless, so the session keeps the transcript it
/// replays on every request. Created once at startup and owned by the app
/// for the lifetime of the process.
pub struct ChatSession {
    client: Client,
    api_key: String,
    model: String,
    system_prompt: String,
    transcript: Vec<Content>,
}

impl ChatSession {
    pub fn new(api_key: &str, model: &str, system_prompt: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            system_prompt: system_prompt.to_string(),
            transcript: Vec::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `message` and stream the reply.
    ///
    /// The user message is added to the transcript immediately; the request
    /// runs on a spawned task and reports fragments, completion, and failure
    /// through the returned channel. The task never outlives the exchange:
    /// it ends after sending `Done` or `Error`.
    pub fn send_streaming(&mut self, message: &str) -> mpsc::Receiver<StreamEvent> {
        self.transcript.push(Content::user(message));

        let request = GenerateRequest {
            contents: self.transcript.clone(),
            system_instruction: SystemInstruction {
                parts: vec![Part { text: self.system_prompt.clone() }],
            },
        };
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            API_BASE_URL, self.model
        );
        let client = self.client.clone();
        let api_key = self.api_key.clone();

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            if let Err(e) = stream_reply(client, url, api_key, request, tx.clone()).await {
                let _ = tx.send(StreamEvent::Error(e.to_string())).await;
            }
        });

        rx
    }

    /// Record a completed model reply so later requests carry it as context.
    pub fn record_reply(&mut self, text: &str) {
        self.transcript.push(Content::model(text));
    }

    /// Drop the trailing user message after a failed exchange, so the failed
    /// turn is not replayed on the next request.
    pub fn discard_failed_exchange(&mut self) {
        if self.transcript.last().map(|c| c.role.as_str()) == Some("user") {
            self.transcript.pop();
        }
    }

    #[cfg(test)]
    fn transcript_roles(&self) -> Vec<&str> {
        self.transcript.iter().map(|c| c.role.as_str()).collect()
    }
}

async fn stream_reply(
    client: Client,
    url: String,
    api_key: String,
    request: GenerateRequest,
    tx: mpsc::Sender<StreamEvent>,
) -> Result<()> {
    let response = client
        .post(&url)
        .header("x-goog-api-key", &api_key)
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("Gemini API error {}: {}", status, body));
    }

    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::new();

    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        for line in buffer.push(&bytes) {
            let Some(data) = parse_sse_data(&line) else {
                continue;
            };
            if let Some(text) = fragment_text(data) {
                if !text.is_empty() && tx.send(StreamEvent::Fragment(text)).await.is_err() {
                    // Receiver gone; the exchange is over for the UI.
                    return Ok(());
                }
            }
        }
    }

    let _ = tx.send(StreamEvent::Done).await;
    Ok(())
}

/// Reassembles complete lines from a byte stream whose chunk boundaries can
/// fall anywhere, including inside a UTF-8 sequence.
struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.pop(); // the '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

/// Extract the payload of an SSE `data:` line; `None` for anything else
/// (blank keep-alives, comments, event names).
fn parse_sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|rest| rest.trim_start())
}

/// Pull the text fragment out of one streamed chunk. Chunks without text
/// (safety metadata, usage stats) yield `None`; malformed JSON is skipped
/// rather than treated as a stream failure.
fn fragment_text(data: &str) -> Option<String> {
    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    let parts = chunk
        .candidates?
        .into_iter()
        .next()?
        .content?
        .parts?;
    let text: String = parts.into_iter().map(|p| p.text).collect();
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sse_data_lines() {
        assert_eq!(parse_sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(parse_sse_data("data:{\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(parse_sse_data(""), None);
        assert_eq!(parse_sse_data(": keep-alive"), None);
        assert_eq!(parse_sse_data("event: done"), None);
    }

    #[test]
    fn extracts_fragment_text_from_chunk() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        assert_eq!(fragment_text(data), Some("Hello".to_string()));
    }

    #[test]
    fn tolerates_chunks_without_text() {
        assert_eq!(fragment_text(r#"{"candidates":[{"finishReason":"STOP"}]}"#), None);
        assert_eq!(fragment_text(r#"{"usageMetadata":{"totalTokenCount":42}}"#), None);
        assert_eq!(fragment_text("not json"), None);
    }

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        let lines = buffer.push(b":1}\r\ndata: {\"b\":2}\n\n");
        assert_eq!(
            lines,
            vec![
                "data: {\"a\":1}".to_string(),
                "data: {\"b\":2}".to_string(),
                String::new(),
            ]
        );
    }

    #[test]
    fn line_buffer_handles_split_utf8() {
        let mut buffer = SseLineBuffer::new();
        let bytes = "héllo\n".as_bytes();
        assert!(buffer.push(&bytes[..2]).is_empty());
        let lines = buffer.push(&bytes[2..]);
        assert_eq!(lines, vec!["héllo".to_string()]);
    }

    #[tokio::test]
    async fn transcript_tracks_exchanges() {
        let mut session = ChatSession::new("test-key", "gemini-2.5-flash", "be helpful");
        let _rx = session.send_streaming("first question");
        assert_eq!(session.transcript_roles(), vec!["user"]);

        session.record_reply("an answer");
        assert_eq!(session.transcript_roles(), vec!["user", "model"]);

        let _rx = session.send_streaming("second question");
        session.discard_failed_exchange();
        assert_eq!(session.transcript_roles(), vec!["user", "model"]);

        // Only a trailing user turn is ever discarded.
        session.discard_failed_exchange();
        assert_eq!(session.transcript_roles(), vec!["user", "model"]);
    }
}
