//! Streaming client for the designated inference stage. Tokens are delivered
//! through an mpsc channel in strict FIFO order; consumers iterate the
//! receiver and relay each token into the pipeline store.
//!
//! At most one stream is active per client. Starting a new stream cancels the
//! previous generation first, and each generation gets its own channel, so
//! tokens from two generations can never interleave.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, ScreeningRequest, WireStreamEvent};
use crate::errors::StreamError;

const TOKEN_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    /// Caller aborted; a normal stop, not an error.
    Cancelled,
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Deliver tokens to `tx` until the source ends, `cancel` fires, or the
    /// transport fails. Token order must match arrival order.
    async fn stream(
        &self,
        request: &ScreeningRequest,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<StreamOutcome, StreamError>;
}

/// Chunked-fetch transport: every decoded byte chunk is one token.
pub struct ChunkedTransport {
    api: Arc<ApiClient>,
}

impl ChunkedTransport {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl StreamTransport for ChunkedTransport {
    async fn stream(
        &self,
        request: &ScreeningRequest,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<StreamOutcome, StreamError> {
        let response = self.api.open_stream(request).await?;
        let mut chunks = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = chunks.next().await {
            if cancel.is_cancelled() {
                return Ok(StreamOutcome::Cancelled);
            }
            pending.extend_from_slice(&chunk?);
            let token = take_complete_utf8(&mut pending);
            if token.is_empty() {
                continue;
            }
            tx.send(token)
                .await
                .map_err(|_| StreamError::ChannelClosed)?;
        }
        Ok(StreamOutcome::Completed)
    }
}

/// Splits off the longest decodable UTF-8 prefix of `bytes`. A multi-byte
/// character cut at a chunk boundary stays buffered until its remaining
/// bytes arrive; genuinely invalid bytes are replaced.
pub(crate) fn take_complete_utf8(bytes: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(bytes) {
            Ok(s) => {
                out.push_str(s);
                bytes.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&bytes[..valid]));
                match e.error_len() {
                    // Incomplete trailing sequence: wait for the next chunk.
                    None => {
                        bytes.drain(..valid);
                        return out;
                    }
                    Some(n) => {
                        out.push('\u{FFFD}');
                        bytes.drain(..valid + n);
                    }
                }
            }
        }
    }
}

/// SSE transport: parses `data: ` lines into wire events and forwards the
/// token payloads.
pub struct SseTransport {
    api: Arc<ApiClient>,
}

impl SseTransport {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }
}

/// Drains complete (`\n\n`-terminated) SSE events from `buffer`, leaving any
/// partial trailing event in place.
pub(crate) fn drain_sse_buffer(buffer: &mut String) -> Vec<WireStreamEvent> {
    let mut events = Vec::new();
    while let Some(end) = buffer.find("\n\n") {
        let block = buffer[..end].to_string();
        buffer.drain(..end + 2);
        for line in block.lines() {
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                continue;
            }
            match serde_json::from_str::<WireStreamEvent>(data) {
                Ok(event) => events.push(event),
                Err(e) => log::warn!("skipping malformed stream event: {e}"),
            }
        }
    }
    events
}

#[async_trait]
impl StreamTransport for SseTransport {
    async fn stream(
        &self,
        request: &ScreeningRequest,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<StreamOutcome, StreamError> {
        let response = self.api.open_stream(request).await?;
        let mut chunks = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut buffer = String::new();

        while let Some(chunk) = chunks.next().await {
            if cancel.is_cancelled() {
                return Ok(StreamOutcome::Cancelled);
            }
            pending.extend_from_slice(&chunk?);
            buffer.push_str(&take_complete_utf8(&mut pending));

            for event in drain_sse_buffer(&mut buffer) {
                if event.kind == "error" {
                    return Err(StreamError::Remote(
                        event.message.unwrap_or_else(|| "unspecified".to_string()),
                    ));
                }
                if let Some(token) = event.token {
                    tx.send(token)
                        .await
                        .map_err(|_| StreamError::ChannelClosed)?;
                }
            }
        }
        Ok(StreamOutcome::Completed)
    }
}

#[derive(Clone, Debug, Default)]
pub struct StreamStats {
    /// Everything received so far this generation.
    pub buffer: String,
    pub chars_per_sec: f64,
    pub is_streaming: bool,
    pub last_error: Option<String>,
}

/// Stats plus the generation they belong to. A cancelled transport may only
/// notice at its next chunk; the generation stamp keeps such stragglers from
/// writing into the stats of the stream that replaced them.
struct StatsCell {
    generation: u64,
    stats: StreamStats,
}

pub struct TokenStreamClient {
    transport: Arc<dyn StreamTransport>,
    cell: Arc<Mutex<StatsCell>>,
    active: Mutex<Option<CancellationToken>>,
}

impl TokenStreamClient {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            transport,
            cell: Arc::new(Mutex::new(StatsCell {
                generation: 0,
                stats: StreamStats::default(),
            })),
            active: Mutex::new(None),
        }
    }

    pub async fn stats(&self) -> StreamStats {
        self.cell.lock().await.stats.clone()
    }

    /// Abort the in-flight stream, if any. A distinct terminal condition, not
    /// surfaced as an error.
    pub async fn cancel(&self) {
        if let Some(token) = self.active.lock().await.take() {
            token.cancel();
        }
    }

    /// Start streaming and return the token receiver. Any previously active
    /// stream is cancelled before the new one is armed.
    pub async fn start(&self, request: ScreeningRequest) -> mpsc::Receiver<String> {
        self.cancel().await;

        let cancel = CancellationToken::new();
        *self.active.lock().await = Some(cancel.clone());

        let generation = {
            let mut cell = self.cell.lock().await;
            cell.generation += 1;
            cell.stats = StreamStats {
                is_streaming: true,
                ..StreamStats::default()
            };
            cell.generation
        };

        let (raw_tx, mut raw_rx) = mpsc::channel::<String>(TOKEN_CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<String>(TOKEN_CHANNEL_CAPACITY);

        let transport = Arc::clone(&self.transport);
        let cell = Arc::clone(&self.cell);

        tokio::spawn(async move {
            let started = Instant::now();
            let relay = async {
                while let Some(token) = raw_rx.recv().await {
                    {
                        let mut cell = cell.lock().await;
                        if cell.generation == generation {
                            cell.stats.buffer.push_str(&token);
                            cell.stats.chars_per_sec = cell.stats.buffer.len() as f64
                                / started.elapsed().as_secs_f64().max(1e-3);
                        }
                    }
                    if out_tx.send(token).await.is_err() {
                        break;
                    }
                }
            };

            let (outcome, ()) =
                tokio::join!(transport.stream(&request, raw_tx, cancel), relay);

            // is_streaming must clear on every exit path, before the receiver
            // observes the channel closing, and only for the live generation:
            // a superseded stream finishing late must not clear the flag of
            // the stream that replaced it.
            {
                let mut cell = cell.lock().await;
                if cell.generation == generation {
                    cell.stats.is_streaming = false;
                    match outcome {
                        Ok(StreamOutcome::Completed) => {}
                        Ok(StreamOutcome::Cancelled) => log::debug!("stream cancelled by caller"),
                        Err(e) => {
                            log::warn!("stream failed: {e}");
                            cell.stats.last_error = Some(e.to_string());
                        }
                    }
                }
            }
            drop(out_tx);
        });

        out_rx
    }
}
