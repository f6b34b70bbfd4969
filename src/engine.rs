//! Stream synthesis: turns one blocking upstream completion into a paced
//! event stream.
//!
//! A streaming request moves through
//! `Idle -> HeadersSent -> AwaitingUpstream -> Emitting -> Terminated`.
//! The heartbeat runs only between the role frame and the upstream reply and
//! is always joined before the first content frame is written, so the
//! connection has exactly one writer at any moment.

use crate::chunker::chunk_text;
use crate::config::StreamConfig;
use crate::connection::{Connection, ConnectionBody, ConnectionCloser, FRAME_BUFFER};
use crate::error::GENERIC_ERROR_MESSAGE;
use crate::extract::UpstreamResult;
use crate::heartbeat::{self, Heartbeat};
use crate::request::CompletionRequest;
use crate::sse::{self, DONE_SENTINEL, Payload};
use crate::upstream::{ChatUpstream, UpstreamCallError};
use axum::Json;
use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderName};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Sent as the only content when upstream produced no text.
pub const PLACEHOLDER_CHUNK: &str = " ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    HeadersSent,
    AwaitingUpstream,
    Emitting,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    ClientAborted,
    UpstreamFailed,
}

/// Summary of a finished stream task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub outcome: StreamOutcome,
    pub final_state: StreamState,
    pub content_frames: usize,
    pub terminal_sent: bool,
}

/// Shared `chat.completion.chunk` fields; one id per stream.
struct ChunkEnvelope {
    id: String,
    created: i64,
    model: Value,
}

impl ChunkEnvelope {
    fn new(model: &Value) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            model: model.clone(),
        }
    }

    fn frame(&self, delta: Value, finish_reason: Option<&str>) -> Payload {
        Payload::Json(json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }]
        }))
    }
}

/// Per-request state, owned by the stream task. The disconnect observer is the
/// only other party and it only ever sets `client_aborted` and cancels `abort`.
pub struct StreamSession {
    state: StreamState,
    client_aborted: Arc<AtomicBool>,
    abort: CancellationToken,
    heartbeat: Option<Heartbeat>,
    role_frame_sent: bool,
    settings: StreamConfig,
    envelope: ChunkEnvelope,
    content_frames: usize,
    terminal_sent: bool,
}

impl StreamSession {
    pub fn new(model: &Value, settings: StreamConfig) -> Self {
        Self {
            state: StreamState::Idle,
            client_aborted: Arc::new(AtomicBool::new(false)),
            abort: CancellationToken::new(),
            heartbeat: None,
            role_frame_sent: false,
            settings,
            envelope: ChunkEnvelope::new(model),
            content_frames: 0,
            terminal_sent: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    fn is_aborted(&self) -> bool {
        self.client_aborted.load(Ordering::SeqCst)
    }

    fn transition(&mut self, next: StreamState) {
        tracing::debug!(stream_id = %self.envelope.id, from = ?self.state, to = ?next, "stream state");
        self.state = next;
    }

    async fn run(
        mut self,
        conn: Connection,
        upstream: Arc<dyn ChatUpstream>,
        credential: String,
        request: CompletionRequest,
    ) -> StreamReport {
        let _close_guard = CloseOnDrop(conn.clone());

        self.heartbeat = Some(Heartbeat::start(
            conn.clone(),
            self.settings.heartbeat_interval(),
            self.abort.child_token(),
        ));
        self.send_role_frame(&conn).await;
        self.transition(StreamState::AwaitingUpstream);

        let body = request.upstream_body();
        let started = Instant::now();
        let reply = tokio::select! {
            biased;
            _ = self.abort.cancelled() => None,
            result = upstream.complete(&credential, &body) => Some(result),
        };
        heartbeat::stop(&mut self.heartbeat).await;

        let outcome = match reply {
            None => StreamOutcome::ClientAborted,
            Some(Ok(raw)) => {
                record_upstream_latency(started);
                let result = UpstreamResult::from_body(raw, &request.model);
                self.emit(&conn, result).await
            }
            Some(Err(err)) => {
                record_upstream_latency(started);
                self.fail(&conn, &err).await;
                StreamOutcome::UpstreamFailed
            }
        };

        heartbeat::stop(&mut self.heartbeat).await;
        conn.close();
        self.transition(StreamState::Terminated);

        if outcome == StreamOutcome::ClientAborted {
            metrics::counter!("pseudostream_client_aborts_total").increment(1);
            tracing::info!(
                stream_id = %self.envelope.id,
                content_frames = self.content_frames,
                "client disconnected, stream abandoned"
            );
        }
        StreamReport {
            outcome,
            final_state: self.state,
            content_frames: self.content_frames,
            terminal_sent: self.terminal_sent,
        }
    }

    async fn send_role_frame(&mut self, conn: &Connection) {
        let frame = self.envelope.frame(json!({ "role": "assistant" }), None);
        match conn.write(sse::encode(&frame)).await {
            Ok(()) => self.role_frame_sent = true,
            Err(_) => tracing::debug!(stream_id = %self.envelope.id, "role frame not delivered"),
        }
    }

    async fn emit(&mut self, conn: &Connection, result: UpstreamResult) -> StreamOutcome {
        if self.is_aborted() {
            return StreamOutcome::ClientAborted;
        }
        self.transition(StreamState::Emitting);
        self.envelope.model = result.model_echo.clone();
        if !self.role_frame_sent {
            self.send_role_frame(conn).await;
        }

        tracing::debug!(
            stream_id = %self.envelope.id,
            content_chars = result.completion_text.chars().count(),
            "upstream completion received"
        );
        let mut chunks = chunk_text(&result.completion_text, self.settings.chunk_target_length);
        if chunks.is_empty() {
            chunks.push(if result.completion_text.is_empty() {
                PLACEHOLDER_CHUNK.to_string()
            } else {
                result.completion_text.clone()
            });
        }

        let delay = self.settings.chunk_delay();
        for chunk in &chunks {
            if self.is_aborted() {
                return StreamOutcome::ClientAborted;
            }
            let frame = self.envelope.frame(json!({ "content": chunk }), None);
            if conn.write(sse::encode(&frame)).await.is_err() {
                return StreamOutcome::ClientAborted;
            }
            self.content_frames += 1;
            tokio::select! {
                _ = self.abort.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if self.is_aborted() {
            return StreamOutcome::ClientAborted;
        }
        let terminal = self
            .envelope
            .frame(json!({}), Some(result.finish_reason.as_str()));
        if conn.write(sse::encode(&terminal)).await.is_err() {
            return StreamOutcome::ClientAborted;
        }
        self.terminal_sent = true;
        if conn.write(sse::encode(&DONE_SENTINEL.into())).await.is_err() {
            return StreamOutcome::ClientAborted;
        }
        StreamOutcome::Completed
    }

    async fn fail(&mut self, conn: &Connection, err: &UpstreamCallError) {
        metrics::counter!("pseudostream_upstream_errors_total").increment(1);
        tracing::warn!(
            stream_id = %self.envelope.id,
            status = ?err.status,
            kind = ?err.kind,
            "upstream call failed: {}",
            err.message
        );
        if self.is_aborted() {
            return;
        }
        let _ = conn.write(sse::encode(&error_payload(err).into())).await;
    }
}

struct CloseOnDrop(Connection);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn disconnect_observer(
    client_aborted: Arc<AtomicBool>,
    abort: CancellationToken,
    closer: ConnectionCloser,
) -> impl FnOnce() + Send + 'static {
    move || {
        client_aborted.store(true, Ordering::SeqCst);
        abort.cancel();
        closer.close();
    }
}

fn record_upstream_latency(started: Instant) {
    metrics::histogram!("pseudostream_upstream_latency_seconds")
        .record(started.elapsed().as_secs_f64());
}

/// Error frame body for a stream that is already open and cannot change status.
pub fn error_payload(err: &UpstreamCallError) -> Value {
    let message = err
        .upstream_message()
        .map(str::to_string)
        .or_else(|| Some(err.message.clone()).filter(|m| !m.is_empty()))
        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string());
    json!({
        "error": {
            "message": message,
            "type": err.upstream_type().unwrap_or("server_error"),
        }
    })
}

/// Starts the stream task and returns the body it feeds plus its join handle.
pub fn spawn_stream(
    upstream: Arc<dyn ChatUpstream>,
    credential: String,
    request: CompletionRequest,
    settings: StreamConfig,
) -> (ConnectionBody, JoinHandle<StreamReport>) {
    let (conn, mut body) = Connection::channel(FRAME_BUFFER);
    let mut session = StreamSession::new(&request.model, settings);
    body.on_disconnect(disconnect_observer(
        session.client_aborted.clone(),
        session.abort.clone(),
        conn.closer(),
    ));
    session.transition(StreamState::HeadersSent);
    let task = tokio::spawn(session.run(conn, upstream, credential, request));
    (body, task)
}

/// Answers a streaming request: event-stream headers now, frames as the task
/// produces them.
pub fn open_stream(
    upstream: Arc<dyn ChatUpstream>,
    credential: String,
    request: CompletionRequest,
    settings: StreamConfig,
) -> Response {
    let (body, _task) = spawn_stream(upstream, credential, request, settings);
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, sse::CONTENT_TYPE),
            (CACHE_CONTROL, "no-cache, no-transform"),
            (CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Non-streaming path: one upstream call, body relayed as-is.
pub async fn relay_blocking(
    upstream: &dyn ChatUpstream,
    credential: &str,
    request: &CompletionRequest,
) -> Response {
    let started = Instant::now();
    let result = upstream.complete(credential, &request.upstream_body()).await;
    record_upstream_latency(started);
    match result {
        Ok(raw) => Json(raw).into_response(),
        Err(err) => {
            metrics::counter!("pseudostream_upstream_errors_total").increment(1);
            tracing::warn!(status = ?err.status, kind = ?err.kind, "upstream call failed: {}", err.message);
            err.passthrough_response(GENERIC_ERROR_MESSAGE)
        }
    }
}
