//! SSE response builders: native passthrough, native→OpenAI chunk conversion
//! and fake streaming.
//!
//! Every stream runs in a spawned task feeding a channel, so usage-log
//! finalisation happens off the request connection and client disconnects
//! (dropped receiver) tear the upstream read down.

use crate::db::UsageFinal;
use crate::service::{ImageStorage, UsageLogger};
use crate::server::dispatch::latency_ms;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use castor_schema::gemini::GeminiResponseBody;
use castor_schema::openai::{ChatChunk, ChatDelta};
use castor_schema::AssistResponseBody;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use std::convert::Infallible;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

/// Abort a stream whose upstream goes quiet for this long.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Keepalive cadence for fake streaming.
const FAKE_STREAM_HEARTBEAT: Duration = Duration::from_secs(2);

type EventResult = Result<Event, Infallible>;

/// Deferred usage-log finalisation owned by a streaming task.
pub struct StreamFinalizer {
    usage: UsageLogger,
    user_id: i64,
    fin: UsageFinal,
    started: Instant,
}

impl StreamFinalizer {
    pub fn new(usage: UsageLogger, user_id: i64, fin: UsageFinal, started: Instant) -> Self {
        Self {
            usage,
            user_id,
            fin,
            started,
        }
    }

    /// Finalise with the given status; best-effort by design.
    pub async fn complete(mut self, status_code: i64) {
        self.fin.status_code = status_code;
        self.fin.latency_ms = latency_ms(self.started);
        self.usage.finalize_best_effort(self.user_id, self.fin).await;
    }
}

fn sse_from_channel(rx: mpsc::Receiver<EventResult>) -> Response {
    Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn parse_frame(data: &str) -> Option<GeminiResponseBody> {
    match serde_json::from_str::<AssistResponseBody>(data) {
        Ok(envelope) => Some(envelope.into()),
        Err(e) => {
            warn!("skipping invalid SSE frame ({e}): {:.50}...", data);
            None
        }
    }
}

/// Native SSE passthrough: unwrap the assist envelope per frame and re-emit
/// the v1beta body, preserving frame order.
pub fn native_stream(upstream: reqwest::Response, finalizer: StreamFinalizer) -> Response {
    let (tx, rx) = mpsc::channel::<EventResult>(32);

    tokio::spawn(async move {
        let mut frames = upstream.bytes_stream().eventsource();
        loop {
            match tokio::time::timeout(STREAM_IDLE_TIMEOUT, frames.next()).await {
                Ok(Some(Ok(frame))) => {
                    if frame.data.is_empty() {
                        continue;
                    }
                    let Some(body) = parse_frame(&frame.data) else {
                        continue;
                    };
                    let Ok(event) = Event::default().json_data(&body) else {
                        continue;
                    };
                    if tx.send(Ok(event)).await.is_err() {
                        // Client went away; drop the upstream stream.
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!("upstream SSE error: {e}");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("upstream SSE idle timeout");
                    break;
                }
            }
        }
        finalizer.complete(200).await;
    });

    sse_from_channel(rx)
}

/// Native SSE converted frame-by-frame into OpenAI chat chunks, closed by a
/// `finish_reason=stop` chunk and the `[DONE]` sentinel.
pub fn openai_stream(
    upstream: reqwest::Response,
    model: String,
    images: ImageStorage,
    finalizer: StreamFinalizer,
) -> Response {
    let (tx, rx) = mpsc::channel::<EventResult>(32);

    tokio::spawn(async move {
        let mut frames = upstream.bytes_stream().eventsource();
        let mut client_gone = false;

        loop {
            match tokio::time::timeout(STREAM_IDLE_TIMEOUT, frames.next()).await {
                Ok(Some(Ok(frame))) => {
                    if frame.data.is_empty() {
                        continue;
                    }
                    let Some(body) = parse_frame(&frame.data) else {
                        continue;
                    };
                    let Some(delta) =
                        crate::rewrite::openai::native_to_delta(&body, Some(&images)).await
                    else {
                        continue;
                    };
                    let chunk = ChatChunk::new(
                        crate::rewrite::openai::CHAT_COMPLETION_ID,
                        model.clone(),
                        delta,
                    );
                    let Ok(event) = Event::default().json_data(&chunk) else {
                        continue;
                    };
                    if tx.send(Ok(event)).await.is_err() {
                        client_gone = true;
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!("upstream SSE error: {e}");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("upstream SSE idle timeout");
                    break;
                }
            }
        }

        if !client_gone {
            let finish = ChatChunk::finish(crate::rewrite::openai::CHAT_COMPLETION_ID, model.as_str());
            if let Ok(event) = Event::default().json_data(&finish) {
                let _ = tx.send(Ok(event)).await;
            }
            let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
        }
        finalizer.complete(200).await;
    });

    sse_from_channel(rx)
}

/// Outcome of the deferred non-streaming call behind a fake stream. The
/// future owns its own usage-log finalisation; this layer only shapes bytes.
pub struct FakeStreamPayload {
    pub content: String,
    pub reasoning: Option<String>,
}

/// Emulated streaming: immediate role chunk, keepalive empty deltas while the
/// non-streaming call runs, then one content chunk, a stop chunk and
/// `[DONE]`. Used for clients that abort without early bytes against models
/// the upstream will not stream.
pub fn fake_stream<F>(model: String, call: F) -> Response
where
    F: Future<Output = Result<FakeStreamPayload, String>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<EventResult>(32);

    tokio::spawn(async move {
        let send_chunk = |chunk: ChatChunk| {
            let tx = tx.clone();
            async move {
                match Event::default().json_data(&chunk) {
                    Ok(event) => tx.send(Ok(event)).await.is_ok(),
                    Err(_) => false,
                }
            }
        };

        let role = ChatChunk::new(
            crate::rewrite::openai::CHAT_COMPLETION_ID,
            model.clone(),
            ChatDelta::role_only(),
        );
        if !send_chunk(role).await {
            return;
        }

        let mut heartbeat = tokio::time::interval(FAKE_STREAM_HEARTBEAT);
        heartbeat.tick().await; // first tick fires immediately
        let mut call = std::pin::pin!(call);

        let outcome = loop {
            tokio::select! {
                outcome = &mut call => break outcome,
                _ = heartbeat.tick() => {
                    let keepalive = ChatChunk::new(
                        crate::rewrite::openai::CHAT_COMPLETION_ID,
                        model.clone(),
                        ChatDelta::default(),
                    );
                    if !send_chunk(keepalive).await {
                        return;
                    }
                }
            }
        };

        match outcome {
            Ok(payload) => {
                let delta = ChatDelta {
                    role: None,
                    content: (!payload.content.is_empty()).then_some(payload.content),
                    reasoning_content: payload.reasoning,
                };
                if !delta.is_empty() {
                    let chunk = ChatChunk::new(
                        crate::rewrite::openai::CHAT_COMPLETION_ID,
                        model.clone(),
                        delta,
                    );
                    if !send_chunk(chunk).await {
                        return;
                    }
                }
            }
            Err(message) => {
                let chunk = ChatChunk::new(
                    crate::rewrite::openai::CHAT_COMPLETION_ID,
                    model.clone(),
                    ChatDelta {
                        role: None,
                        content: Some(format!("\n\n[Error: {message}]")),
                        reasoning_content: None,
                    },
                );
                if !send_chunk(chunk).await {
                    return;
                }
            }
        }

        let finish = ChatChunk::finish(crate::rewrite::openai::CHAT_COMPLETION_ID, model.as_str());
        let _ = send_chunk(finish).await;
        let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
    });

    sse_from_channel(rx)
}
