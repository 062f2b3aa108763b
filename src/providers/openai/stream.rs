use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::models::StreamChunk;
use crate::providers::types::{BackendError, GenerateOutcome, StreamEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsePayload {
    Data(String),
    Done,
}

/// Incremental server-sent-events decoder. Bytes may arrive split anywhere,
/// including inside a UTF-8 sequence or an event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    byte_buf: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SsePayload> {
        self.byte_buf.extend_from_slice(bytes);

        let decoded = match std::str::from_utf8(&self.byte_buf) {
            Ok(s) => {
                let decoded = s.to_string();
                self.byte_buf.clear();
                decoded
            }
            // Incomplete trailing sequence: keep it for the next chunk.
            Err(e) if e.error_len().is_none() => {
                let valid_up_to = e.valid_up_to();
                let decoded = String::from_utf8_lossy(&self.byte_buf[..valid_up_to]).into_owned();
                self.byte_buf.drain(..valid_up_to);
                decoded
            }
            Err(_) => {
                let decoded = String::from_utf8_lossy(&self.byte_buf).into_owned();
                self.byte_buf.clear();
                decoded
            }
        };

        self.buffer.push_str(&decoded.replace("\r\n", "\n"));

        let mut payloads = Vec::new();
        while let Some(event_end) = self.buffer.find("\n\n") {
            let event_text: String = self.buffer.drain(..event_end + 2).collect();

            for line in event_text.lines() {
                let payload = if let Some(p) = line.strip_prefix("data: ") {
                    p
                } else if let Some(p) = line.strip_prefix("data:") {
                    p
                } else {
                    continue;
                };

                if payload.trim() == "[DONE]" {
                    payloads.push(SsePayload::Done);
                } else {
                    payloads.push(SsePayload::Data(payload.to_string()));
                }
            }
        }
        payloads
    }
}

/// Drive a streaming completions response to the end, forwarding chunks
/// through `tx` and accumulating the full reply.
///
/// Cancellation settles with `aborted = true` and the text received so far.
pub async fn consume_sse_stream(
    response: reqwest::Response,
    tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> Result<GenerateOutcome, BackendError> {
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::default();
    let mut outcome = GenerateOutcome::default();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                outcome.aborted = true;
                return Ok(outcome);
            }
            chunk = stream.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => return Err(BackendError::NetworkError(format!("Stream error: {}", e))),
            // Stream closed without a [DONE] marker.
            None => return Ok(outcome),
        };

        for payload in decoder.push(&bytes) {
            let data = match payload {
                SsePayload::Done => return Ok(outcome),
                SsePayload::Data(data) => data,
            };

            match serde_json::from_str::<StreamChunk>(&data) {
                Ok(chunk) => {
                    let Some(choice) = chunk.choices.into_iter().next() else {
                        continue;
                    };
                    if let Some(thinking) = choice.delta.reasoning_content.filter(|t| !t.is_empty()) {
                        outcome.thinking.push_str(&thinking);
                        let _ = tx.send(StreamEvent::Thinking(thinking)).await;
                    }
                    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                        outcome.response.push_str(&content);
                        let _ = tx.send(StreamEvent::Token(content)).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to parse SSE data: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_events() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        let payloads = decoder.push(b"1}\n\ndata: [DONE]\n\n");
        assert_eq!(
            payloads,
            vec![SsePayload::Data("{\"a\":1}".to_string()), SsePayload::Done]
        );
    }

    #[test]
    fn test_decoder_normalizes_crlf_and_ignores_comments() {
        let mut decoder = SseDecoder::default();
        let payloads = decoder.push(b": keep-alive\r\n\r\ndata:{\"b\":2}\r\n\r\n");
        assert_eq!(payloads, vec![SsePayload::Data("{\"b\":2}".to_string())]);
    }

    #[test]
    fn test_decoder_keeps_partial_utf8() {
        let mut decoder = SseDecoder::default();
        let text = "data: caf\u{e9}\n\n".as_bytes();
        // Split inside the two-byte encoding of 'é'.
        let split = text.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&text[..split]).is_empty());
        let payloads = decoder.push(&text[split..]);
        assert_eq!(payloads, vec![SsePayload::Data("caf\u{e9}".to_string())]);
    }

    #[test]
    fn test_stream_chunk_parses_reasoning() {
        let raw = r#"{"choices":[{"delta":{"reasoning_content":"hmm"},"finish_reason":null}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.choices[0].delta.reasoning_content.as_deref(), Some("hmm"));
        assert!(chunk.choices[0].delta.content.is_none());
    }
}
