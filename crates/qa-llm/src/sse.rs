use std::fmt::Display;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;

use crate::{QaError, Result, TextStream};

#[derive(Deserialize)]
struct OaiStreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OaiStreamChoice {
    delta: OaiStreamDelta,
}

#[derive(Deserialize)]
struct OaiStreamChunk {
    choices: Vec<OaiStreamChoice>,
}

#[derive(Deserialize)]
struct AnthTextDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthContentBlockDelta {
    delta: AnthTextDelta,
}

#[derive(Deserialize)]
struct AnthErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct AnthError {
    error: AnthErrorBody,
}

/// 单个 SSE 事件的解析结果
enum Frame {
    Text(String),
    Skip,
    Done,
}

type FrameParser = fn(&Event) -> Result<Frame>;

/// OpenAI 兼容流：`data: [DONE]` 结束，其余为 chat.completion.chunk
fn openai_frame(event: &Event) -> Result<Frame> {
    let data = event.data.trim();
    if data == "[DONE]" {
        return Ok(Frame::Done);
    }
    let chunk: OaiStreamChunk = serde_json::from_str(data)?;
    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(text) if !text.is_empty() => Ok(Frame::Text(text)),
        _ => Ok(Frame::Skip),
    }
}

/// Anthropic Messages 流：只取 content_block_delta 的文本，未知事件忽略
fn anthropic_frame(event: &Event) -> Result<Frame> {
    match event.event.as_str() {
        "content_block_delta" => {
            let delta: AnthContentBlockDelta = serde_json::from_str(&event.data)?;
            match delta.delta.text {
                Some(text) if !text.is_empty() => Ok(Frame::Text(text)),
                _ => Ok(Frame::Skip),
            }
        }
        "message_stop" => Ok(Frame::Done),
        "error" => {
            let err: AnthError = serde_json::from_str(&event.data)?;
            Err(QaError::LlmService {
                provider: "anthropic".to_string(),
                message: err.error.message,
                retry_after: None,
            })
        }
        _ => Ok(Frame::Skip),
    }
}

pub(crate) fn openai_text_stream(resp: reqwest::Response) -> TextStream {
    decode(resp.bytes_stream().map(|r| r.map_err(QaError::from)), openai_frame)
}

pub(crate) fn anthropic_text_stream(resp: reqwest::Response) -> TextStream {
    decode(resp.bytes_stream().map(|r| r.map_err(QaError::from)), anthropic_frame)
}

fn stream_error(e: EventStreamError<QaError>) -> QaError {
    match e {
        EventStreamError::Transport(e) => e,
        other => protocol_error(other),
    }
}

fn protocol_error(e: impl Display) -> QaError {
    QaError::Serialization {
        format: "sse".to_string(),
        message: e.to_string(),
    }
}

/// 字节流 → SSE 事件 → 文本片段；首个错误之后流即结束
fn decode<S, B>(bytes: S, parse: FrameParser) -> TextStream
where
    S: Stream<Item = std::result::Result<B, QaError>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let events = bytes.eventsource().boxed();
    futures::stream::unfold(Some(events), move |state| async move {
        let mut events = state?;
        loop {
            let item = match events.next().await? {
                Ok(event) => parse(&event),
                Err(e) => Err(stream_error(e)),
            };
            match item {
                Ok(Frame::Text(text)) => return Some((Ok(text), Some(events))),
                Ok(Frame::Skip) => continue,
                Ok(Frame::Done) => return None,
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(parts: &[&[u8]]) -> impl Stream<Item = Result<Vec<u8>>> + Send + 'static {
        let owned: Vec<Result<Vec<u8>>> = parts.iter().map(|p| Ok(p.to_vec())).collect();
        futures::stream::iter(owned)
    }

    #[tokio::test]
    async fn test_decodes_split_multibyte_frames() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n\n\
                    data: [DONE]\n\n";
        let bytes = body.as_bytes();
        // 在“你”字中间切开
        let cut = body.find("你").unwrap() + 1;
        let stream = decode(frames(&[&bytes[..cut], &bytes[cut..]]), openai_frame);
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec!["你好".to_string(), "!".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_event_ends_with_error() {
        let stream = decode(
            frames(&[&b"data: {not json}\n\n"[..], &b"data: [DONE]\n\n"[..]]),
            openai_frame,
        );
        let items: Vec<Result<String>> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn test_transport_error_is_terminal() {
        let items: Vec<Result<Vec<u8>>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".to_vec()),
            Err(QaError::Network {
                operation: "read".to_string(),
                message: "reset".to_string(),
            }),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n".to_vec()),
        ];
        let out: Vec<Result<String>> = decode(futures::stream::iter(items), openai_frame)
            .collect()
            .await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_deref().unwrap(), "a");
        assert!(matches!(out[1], Err(QaError::Network { .. })));
    }

    #[tokio::test]
    async fn test_anthropic_text_deltas_until_message_stop() {
        let body = "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n\
                    event: ping\ndata: {}\n\n\
                    event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"订单\"}}\n\n\
                    event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"已发货\"}}\n\n\
                    event: message_stop\ndata: {}\n\n\
                    event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"x\"}}\n\n";
        let parts: Vec<String> = decode(frames(&[body.as_bytes()]), anthropic_frame)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(parts, vec!["订单".to_string(), "已发货".to_string()]);
    }

    #[tokio::test]
    async fn test_anthropic_error_event_is_terminal() {
        let body = "event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"a\"}}\n\n\
                    event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n";
        let out: Vec<Result<String>> = decode(frames(&[body.as_bytes()]), anthropic_frame)
            .collect()
            .await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_deref().unwrap(), "a");
        assert!(matches!(out[1], Err(QaError::LlmService { .. })));
    }
}
