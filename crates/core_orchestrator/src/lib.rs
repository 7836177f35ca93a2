mod helpers;
mod state;

use std::sync::Arc;

use core_types::{
    ChatCompletionOptions, ChatMessage, ChatProvider, SafetyChecker, StreamChunk,
};
use futures::StreamExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use helpers::{UserTurnDecision, chunk_message, screen_user_turn};
pub use state::{StreamPhase, StreamingState};

pub const STREAM_INTERRUPTED: &str = "Streaming interrupted";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("cannot reset while a stream is in flight")]
    ResetWhileStreaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { content: String },
    Failed { error: String },
    Cancelled,
}

enum ChunkApplied {
    Continue,
    Terminal(StreamOutcome),
    Stale,
}

struct Inner {
    generation: u64,
    token: CancellationToken,
}

/// Turns one provider chunk stream at a time into a safety-checked reply.
///
/// Every `send_message` and `cancel` bumps a generation counter; chunks are
/// only applied while their generation is current, so a superseded producer
/// can never write into the state again.
pub struct StreamingAccumulator {
    provider: Arc<dyn ChatProvider>,
    safety: Arc<dyn SafetyChecker>,
    options: ChatCompletionOptions,
    inner: Mutex<Inner>,
    state: watch::Sender<StreamingState>,
}

impl StreamingAccumulator {
    pub fn new(provider: Arc<dyn ChatProvider>, safety: Arc<dyn SafetyChecker>) -> Self {
        let (state, _) = watch::channel(StreamingState::idle());
        Self {
            provider,
            safety,
            options: ChatCompletionOptions::streaming(),
            inner: Mutex::new(Inner {
                generation: 0,
                token: CancellationToken::new(),
            }),
            state,
        }
    }

    pub fn with_options(mut self, options: ChatCompletionOptions) -> Self {
        self.options = ChatCompletionOptions {
            stream: true,
            ..options
        };
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamingState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> StreamingState {
        self.state.borrow().clone()
    }

    pub async fn send_message(&self, messages: Vec<ChatMessage>) -> StreamOutcome {
        let (generation, token) = self.begin();
        let mut stream = self
            .provider
            .stream_chat_completion(messages, self.options.clone());

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return StreamOutcome::Cancelled,
                chunk = stream.next() => chunk,
            };
            let chunk = next.unwrap_or_else(|| StreamChunk::failed(STREAM_INTERRUPTED));
            match self.apply_chunk(generation, chunk) {
                ChunkApplied::Continue => {}
                ChunkApplied::Terminal(outcome) => return outcome,
                ChunkApplied::Stale => return StreamOutcome::Cancelled,
            }
        }
    }

    pub fn spawn_send(self: &Arc<Self>, messages: Vec<ChatMessage>) -> JoinHandle<StreamOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.send_message(messages).await })
    }

    /// Stops the current producer and returns to Idle, dropping any partial
    /// content. A no-op apart from the generation bump when nothing streams.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.token.cancel();
        inner.generation += 1;
        self.state.send_replace(StreamingState::idle());
        debug!(generation = inner.generation, "stream cancelled");
    }

    pub fn reset(&self) -> Result<(), StreamError> {
        let _inner = self.inner.lock();
        if self.state.borrow().is_streaming {
            return Err(StreamError::ResetWhileStreaming);
        }
        self.state.send_replace(StreamingState::idle());
        Ok(())
    }

    fn begin(&self) -> (u64, CancellationToken) {
        let mut inner = self.inner.lock();
        inner.token.cancel();
        let superseded = self.state.borrow().is_streaming;
        if superseded {
            self.state.send_replace(StreamingState::idle());
            debug!(generation = inner.generation, "superseding in-flight stream");
        }
        inner.generation += 1;
        inner.token = CancellationToken::new();
        self.state.send_replace(StreamingState::streaming());
        (inner.generation, inner.token.clone())
    }

    fn apply_chunk(&self, generation: u64, chunk: StreamChunk) -> ChunkApplied {
        let inner = self.inner.lock();
        if inner.generation != generation {
            debug!(
                generation,
                current = inner.generation,
                "dropping chunk from stale stream"
            );
            return ChunkApplied::Stale;
        }

        if let Some(error) = chunk.error {
            self.state.send_modify(|state| {
                state.is_streaming = false;
                state.finished = true;
                state.error = Some(error.clone());
            });
            return ChunkApplied::Terminal(StreamOutcome::Failed { error });
        }

        if chunk.finished {
            let mut content = self.state.borrow().current_content.clone();
            content.push_str(&chunk.content);
            let content = self.screen_reply(content);
            self.state.send_replace(StreamingState {
                is_streaming: false,
                current_content: content.clone(),
                finished: true,
                error: None,
            });
            return ChunkApplied::Terminal(StreamOutcome::Completed { content });
        }

        if !chunk.content.is_empty() {
            self.state
                .send_modify(|state| state.current_content.push_str(&chunk.content));
        }
        ChunkApplied::Continue
    }

    fn screen_reply(&self, content: String) -> String {
        let result = self.safety.check_ai_response(&content);
        if result.is_safe {
            return content;
        }
        warn!(
            violations = ?result.violations,
            severity = ?result.severity,
            "unsafe ai response replaced"
        );
        result
            .replacement_text
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| self.safety.generate_safe_response(""))
    }
}
