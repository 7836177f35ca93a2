mod image;
mod local;
mod pacing;
mod shape;
mod sse;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use core_types::{
    ChatCompletionOptions, ChatMessage, ChatProvider, ChunkStream, ProviderKind, StreamChunk,
};
use futures::{Stream, StreamExt, stream};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub use image::{DEFAULT_IMAGE_MIME, inline_image, sniff_mime_type, strip_data_url};
pub use local::{DEFAULT_LOCAL_LATENCY_MS, LocalResponder};
pub use pacing::{LOCAL_CHAR_DELAY, REMOTE_CHAR_DELAY, StreamPacing, StreamingController};
pub use shape::{
    ANTHROPIC_VERSION, AnthropicShape, GeminiShape, OpenAiShape, ProviderEndpoint, RequestShape,
    build_headers, shape_for,
};
pub use sse::{DONE_SENTINEL, SseDecoder};

pub const PLACEHOLDER_API_KEY: &str = "demo-key-for-testing";
pub const EMPTY_REPLY: &str = "すみません、応答を生成できませんでした。";

pub const IMAGE_ANALYSIS_PROMPT: &str = "この画像を分析して、以下の情報を提供してください：

【画像に食べ物が写っている場合】
1. 料理の名前
2. おおよそのカロリー（kcal）
3. 糖質量（g）
4. タンパク質量（g）
5. 東京のガイドとしての一言アドバイス

【食べ物以外の場合】
写っている場所や物について、東京観光の視点で短く紹介してください。

回答は以下の形式でお願いします：

📊 **[料理名]**

🔥 カロリー: [数値]kcal
🍚 糖質: [数値]g
💪 タンパク質: [数値]g

[アドバイス]";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing credentials for {0}")]
    MissingCredentials(ProviderKind),
    #[error("transport failure: {0}")]
    Transport(reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response body: {0}")]
    MalformedBody(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0} does not support this operation")]
    Unsupported(ProviderKind),
    #[error("empty response from {0}")]
    EmptyResponse(ProviderKind),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // Gemini carries the API key in the query string.
        Self::Transport(err.without_url())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    MissingCredentials,
    Transport,
    HttpStatus,
    MalformedBody,
    EmptyReply,
    Unsupported,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::Transport => "transport",
            Self::HttpStatus => "http_status",
            Self::MalformedBody => "malformed_body",
            Self::EmptyReply => "empty_reply",
            Self::Unsupported => "unsupported_operation",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProviderError {
    pub fn fallback_reason(&self) -> FallbackReason {
        match self {
            Self::MissingCredentials(_) => FallbackReason::MissingCredentials,
            Self::Transport(_) | Self::InvalidRequest(_) => FallbackReason::Transport,
            Self::Status { .. } => FallbackReason::HttpStatus,
            Self::MalformedBody(_) => FallbackReason::MalformedBody,
            Self::EmptyResponse(_) => FallbackReason::EmptyReply,
            Self::Unsupported(_) => FallbackReason::Unsupported,
        }
    }
}

fn log_fallback(kind: ProviderKind, err: &ProviderError) {
    warn!(
        fallback = true,
        provider = %kind,
        reason = %err.fallback_reason(),
        error = %err,
        "provider request failed, answering locally"
    );
}

/// Treats blank keys and the shipped placeholder as absent.
pub fn usable_api_key(api_key: Option<&str>) -> Option<&str> {
    api_key
        .map(str::trim)
        .filter(|key| !key.is_empty() && *key != PLACEHOLDER_API_KEY)
}

#[derive(Clone)]
enum Backend {
    Local,
    Remote {
        shape: Arc<dyn RequestShape>,
        endpoint: ProviderEndpoint,
    },
}

/// Chat provider over one backend shape, answering from the local responder
/// whenever the backend cannot.
#[derive(Clone)]
pub struct HttpChatProvider {
    client: reqwest::Client,
    backend: Backend,
    local: LocalResponder,
    pacing: StreamPacing,
}

impl HttpChatProvider {
    pub fn local() -> Self {
        Self {
            client: reqwest::Client::new(),
            backend: Backend::Local,
            local: LocalResponder::default(),
            pacing: StreamPacing::default(),
        }
    }

    pub fn remote(shape: Arc<dyn RequestShape>, endpoint: ProviderEndpoint) -> Self {
        Self {
            backend: Backend::Remote { shape, endpoint },
            ..Self::local()
        }
    }

    /// `endpoint` is ignored for [`ProviderKind::Local`].
    pub fn for_kind(kind: ProviderKind, endpoint: ProviderEndpoint) -> Self {
        match shape_for(kind) {
            Some(shape) => Self::remote(shape, endpoint),
            None => Self::local(),
        }
    }

    pub fn with_local_responder(mut self, local: LocalResponder) -> Self {
        self.local = local;
        self
    }

    pub fn with_pacing(mut self, pacing: StreamPacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        match &self.backend {
            Backend::Local => ProviderKind::Local,
            Backend::Remote { shape, .. } => shape.kind(),
        }
    }

    async fn post(
        &self,
        shape: &dyn RequestShape,
        endpoint: &ProviderEndpoint,
        streaming: bool,
        body: &Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let api_key = usable_api_key(endpoint.api_key.as_deref())
            .ok_or(ProviderError::MissingCredentials(shape.kind()))?;
        let url = shape.endpoint_for(endpoint, api_key, streaming);
        let headers = build_headers(shape, api_key, &endpoint.extra_headers)
            .map_err(|err| ProviderError::InvalidRequest(err.to_string()))?;
        let accept = if streaming {
            "text/event-stream"
        } else {
            "application/json"
        };
        let response = self
            .client
            .post(url)
            .headers(headers)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, accept)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn post_for_json(
        &self,
        shape: &dyn RequestShape,
        endpoint: &ProviderEndpoint,
        body: &Value,
    ) -> Result<Value, ProviderError> {
        let text = self.post(shape, endpoint, false, body).await?.text().await?;
        serde_json::from_str(&text).map_err(|err| ProviderError::MalformedBody(err.to_string()))
    }

    async fn remote_reply(
        &self,
        shape: &dyn RequestShape,
        endpoint: &ProviderEndpoint,
        messages: &[ChatMessage],
        options: &ChatCompletionOptions,
    ) -> Result<String, ProviderError> {
        let options = ChatCompletionOptions {
            stream: false,
            ..options.clone()
        };
        let body = shape.build_request(&endpoint.model, messages, &options);
        let payload = self.post_for_json(shape, endpoint, &body).await?;
        Ok(shape
            .extract_content(&payload)
            .unwrap_or_else(|| EMPTY_REPLY.to_string()))
    }

    async fn remote_image_analysis(
        &self,
        shape: &dyn RequestShape,
        endpoint: &ProviderEndpoint,
        base64_image: &str,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let body = shape
            .build_image_request(&endpoint.model, base64_image, prompt)
            .ok_or(ProviderError::Unsupported(shape.kind()))?;
        let payload = self.post_for_json(shape, endpoint, &body).await?;
        shape
            .extract_content(&payload)
            .filter(|text| !text.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse(shape.kind()))
    }

    fn local_stream(&self, messages: &[ChatMessage]) -> impl Stream<Item = StreamChunk> + Send + use<> {
        paced_chunks(self.local.pick_reply(messages), self.pacing.local_char_delay)
    }

    /// Decodes the SSE body as it arrives. Falls back to the local reply only
    /// while nothing has been emitted yet.
    fn incremental_stream(
        self,
        shape: Arc<dyn RequestShape>,
        endpoint: ProviderEndpoint,
        messages: Vec<ChatMessage>,
        options: ChatCompletionOptions,
    ) -> impl Stream<Item = StreamChunk> + Send + 'static {
        async_stream::stream! {
            let options = ChatCompletionOptions { stream: true, ..options };
            let body = shape.build_request(&endpoint.model, &messages, &options);
            let response = match self.post(shape.as_ref(), &endpoint, true, &body).await {
                Ok(response) => response,
                Err(err) => {
                    log_fallback(shape.kind(), &err);
                    for await chunk in self.local_stream(&messages) {
                        yield chunk;
                    }
                    return;
                }
            };

            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            let mut emitted = false;
            loop {
                let next = bytes.next().await;
                let ended = next.is_none();
                let payloads = match next {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(err)) => {
                        let err = ProviderError::from(err);
                        if emitted {
                            yield StreamChunk::failed(err.to_string());
                        } else {
                            log_fallback(shape.kind(), &err);
                            for await chunk in self.local_stream(&messages) {
                                yield chunk;
                            }
                        }
                        return;
                    }
                    None => decoder.finish(),
                };

                for payload in payloads {
                    if payload == DONE_SENTINEL {
                        yield StreamChunk::finished();
                        return;
                    }
                    let value: Value = match serde_json::from_str(&payload) {
                        Ok(value) => value,
                        Err(err) => {
                            debug!(error = %err, "skipping unparseable sse payload");
                            continue;
                        }
                    };
                    if let Some(message) = shape.stream_error(&value) {
                        if emitted {
                            yield StreamChunk::failed(message);
                        } else {
                            log_fallback(shape.kind(), &ProviderError::MalformedBody(message));
                            for await chunk in self.local_stream(&messages) {
                                yield chunk;
                            }
                        }
                        return;
                    }
                    if let Some(text) = shape.extract_content(&value) {
                        emitted = true;
                        yield StreamChunk::text(text);
                    }
                    if shape.is_stream_end(&value) {
                        yield StreamChunk::finished();
                        return;
                    }
                }

                if ended {
                    if emitted {
                        yield StreamChunk::finished();
                    } else {
                        log_fallback(shape.kind(), &ProviderError::EmptyResponse(shape.kind()));
                        for await chunk in self.local_stream(&messages) {
                            yield chunk;
                        }
                    }
                    return;
                }
            }
        }
    }

    /// One full request, re-emitted one character at a time.
    fn rechunked_stream(
        self,
        shape: Arc<dyn RequestShape>,
        endpoint: ProviderEndpoint,
        messages: Vec<ChatMessage>,
        options: ChatCompletionOptions,
    ) -> impl Stream<Item = StreamChunk> + Send + 'static {
        async_stream::stream! {
            let (reply, delay) = match self
                .remote_reply(shape.as_ref(), &endpoint, &messages, &options)
                .await
            {
                Ok(reply) => (reply, self.pacing.remote_char_delay),
                Err(err) => {
                    log_fallback(shape.kind(), &err);
                    (self.local.pick_reply(&messages), self.pacing.local_char_delay)
                }
            };
            for await chunk in paced_chunks(reply, delay) {
                yield chunk;
            }
        }
    }
}

fn paced_chunks(
    text: String,
    delay: std::time::Duration,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    StreamingController::new(delay)
        .controlled_stream(text)
        .map(StreamChunk::text)
        .chain(stream::once(async { StreamChunk::finished() }))
}

fn image_prompt(user_message: Option<&str>) -> String {
    match user_message.map(str::trim).filter(|msg| !msg.is_empty()) {
        Some(message) => format!("{IMAGE_ANALYSIS_PROMPT}\n\nユーザーのコメント: {message}"),
        None => IMAGE_ANALYSIS_PROMPT.to_string(),
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: &ChatCompletionOptions,
    ) -> Result<String> {
        let Backend::Remote { shape, endpoint } = &self.backend else {
            return Ok(self.local.chat_reply(messages).await);
        };
        match self
            .remote_reply(shape.as_ref(), endpoint, messages, options)
            .await
        {
            Ok(reply) => Ok(reply),
            Err(err) => {
                log_fallback(shape.kind(), &err);
                Ok(self.local.chat_reply(messages).await)
            }
        }
    }

    fn stream_chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatCompletionOptions,
    ) -> ChunkStream {
        match self.backend.clone() {
            Backend::Local => Box::pin(self.local_stream(&messages)),
            Backend::Remote { shape, endpoint } if shape.incremental_streaming() => Box::pin(
                self.clone()
                    .incremental_stream(shape, endpoint, messages, options),
            ),
            Backend::Remote { shape, endpoint } => Box::pin(
                self.clone()
                    .rechunked_stream(shape, endpoint, messages, options),
            ),
        }
    }

    async fn analyze_image(
        &self,
        base64_image: &str,
        user_message: Option<&str>,
    ) -> Result<String> {
        let Backend::Remote { shape, endpoint } = &self.backend else {
            return Ok(self.local.image_analysis().await);
        };
        let prompt = image_prompt(user_message);
        match self
            .remote_image_analysis(shape.as_ref(), endpoint, base64_image, &prompt)
            .await
        {
            Ok(analysis) => Ok(analysis),
            Err(err) => {
                log_fallback(shape.kind(), &err);
                Ok(self.local.image_analysis().await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use core_types::FixedChooser;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn local_responder() -> LocalResponder {
        LocalResponder::immediate(Arc::new(FixedChooser(0)))
    }

    fn expected_local_reply(messages: &[ChatMessage]) -> String {
        local_responder().pick_reply(messages)
    }

    fn provider(kind: ProviderKind, server: &MockServer, api_key: Option<&str>) -> HttpChatProvider {
        let mut endpoint = ProviderEndpoint::new(server.uri(), "test-model");
        endpoint.api_key = api_key.map(str::to_string);
        HttpChatProvider::for_kind(kind, endpoint)
            .with_local_responder(local_responder())
            .with_pacing(StreamPacing::immediate())
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("あなたはみさきです"),
            ChatMessage::user("浅草でおすすめは？"),
        ]
    }

    async fn collect(stream: ChunkStream) -> Vec<StreamChunk> {
        stream.collect().await
    }

    fn joined(chunks: &[StreamChunk]) -> String {
        chunks.iter().map(|chunk| chunk.content.as_str()).collect()
    }

    #[tokio::test]
    async fn missing_key_falls_back_to_local_reply() {
        let server = MockServer::start().await;
        let provider = provider(ProviderKind::OpenAi, &server, None);
        let reply = provider
            .chat_completion(&conversation(), &ChatCompletionOptions::default())
            .await
            .expect("reply");
        assert_eq!(reply, expected_local_reply(&conversation()));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn placeholder_key_counts_as_missing() {
        let server = MockServer::start().await;
        let provider = provider(ProviderKind::Gemini, &server, Some(PLACEHOLDER_API_KEY));
        let reply = provider
            .chat_completion(&conversation(), &ChatCompletionOptions::default())
            .await
            .expect("reply");
        assert!(!reply.is_empty());
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn openai_single_shot_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "stream": false,
                "max_tokens": 500,
                "messages": [{"role": "system", "content": "あなたはみさきです"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "浅草寺がおすすめです！"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = provider(ProviderKind::OpenAi, &server, Some("sk-test"))
            .chat_completion(&conversation(), &ChatCompletionOptions::default())
            .await
            .expect("reply");
        assert_eq!(reply, "浅草寺がおすすめです！");
    }

    #[tokio::test]
    async fn server_error_falls_back_to_local_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let reply = provider(ProviderKind::OpenAi, &server, Some("sk-test"))
            .chat_completion(&conversation(), &ChatCompletionOptions::default())
            .await
            .expect("reply");
        assert_eq!(reply, expected_local_reply(&conversation()));
    }

    #[tokio::test]
    async fn malformed_body_falls_back_to_local_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let reply = provider(ProviderKind::OpenAi, &server, Some("sk-test"))
            .chat_completion(&conversation(), &ChatCompletionOptions::default())
            .await
            .expect("reply");
        assert_eq!(reply, expected_local_reply(&conversation()));
    }

    #[tokio::test]
    async fn empty_extraction_returns_apology() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let reply = provider(ProviderKind::OpenAi, &server, Some("sk-test"))
            .chat_completion(&conversation(), &ChatCompletionOptions::default())
            .await
            .expect("reply");
        assert_eq!(reply, EMPTY_REPLY);
    }

    #[tokio::test]
    async fn gemini_sends_system_text_in_first_user_turn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/test-model:generateContent"))
            .and(query_param("key", "g-key"))
            .and(body_partial_json(json!({
                "contents": [{"role": "user", "parts": [{"text": "あなたはみさきです\n\n浅草でおすすめは？"}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "雷門です"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = provider(ProviderKind::Gemini, &server, Some("g-key"))
            .chat_completion(&conversation(), &ChatCompletionOptions::default())
            .await
            .expect("reply");
        assert_eq!(reply, "雷門です");
    }

    #[tokio::test]
    async fn remote_reply_is_rechunked_per_character() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/test-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "雷門"}]}}]
            })))
            .mount(&server)
            .await;

        let chunks = collect(
            provider(ProviderKind::Gemini, &server, Some("g-key"))
                .stream_chat_completion(conversation(), ChatCompletionOptions::streaming()),
        )
        .await;
        assert_eq!(
            chunks,
            vec![
                StreamChunk::text("雷"),
                StreamChunk::text("門"),
                StreamChunk::finished()
            ]
        );
    }

    #[tokio::test]
    async fn anthropic_stream_is_decoded_incrementally() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"content\":[]}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"浅草\"}}\n\n",
            "data: not-json\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"寺です\"}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "a-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "system": "あなたはみさきです",
                "stream": true,
                "messages": [{"role": "user", "content": "浅草でおすすめは？"}]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let chunks = collect(
            provider(ProviderKind::Anthropic, &server, Some("a-key"))
                .stream_chat_completion(conversation(), ChatCompletionOptions::streaming()),
        )
        .await;
        assert_eq!(
            chunks,
            vec![
                StreamChunk::text("浅草"),
                StreamChunk::text("寺です"),
                StreamChunk::finished()
            ]
        );
    }

    #[tokio::test]
    async fn anthropic_body_without_stop_event_still_finishes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"はい\"}}",
            ))
            .mount(&server)
            .await;

        let chunks = collect(
            provider(ProviderKind::Anthropic, &server, Some("a-key"))
                .stream_chat_completion(conversation(), ChatCompletionOptions::streaming()),
        )
        .await;
        assert_eq!(chunks, vec![StreamChunk::text("はい"), StreamChunk::finished()]);
    }

    #[tokio::test]
    async fn anthropic_unauthorized_stream_falls_back_to_local() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let chunks = collect(
            provider(ProviderKind::Anthropic, &server, Some("bad-key"))
                .stream_chat_completion(conversation(), ChatCompletionOptions::streaming()),
        )
        .await;
        assert_eq!(chunks.last(), Some(&StreamChunk::finished()));
        assert!(chunks.iter().all(|chunk| chunk.error.is_none()));
        assert_eq!(joined(&chunks), expected_local_reply(&conversation()));
    }

    #[tokio::test]
    async fn anthropic_error_event_after_content_becomes_error_chunk() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"途中\"}}\n\n",
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let chunks = collect(
            provider(ProviderKind::Anthropic, &server, Some("a-key"))
                .stream_chat_completion(conversation(), ChatCompletionOptions::streaming()),
        )
        .await;
        assert_eq!(
            chunks,
            vec![StreamChunk::text("途中"), StreamChunk::failed("Overloaded")]
        );
    }

    #[tokio::test]
    async fn local_mode_streams_canned_reply() {
        let provider = HttpChatProvider::local()
            .with_local_responder(local_responder())
            .with_pacing(StreamPacing::immediate());
        let chunks = collect(
            provider.stream_chat_completion(conversation(), ChatCompletionOptions::streaming()),
        )
        .await;
        let reply = expected_local_reply(&conversation());
        assert_eq!(chunks.len(), reply.chars().count() + 1);
        assert_eq!(joined(&chunks), reply);
        assert!(chunks[..chunks.len() - 1].iter().all(|chunk| !chunk.finished));
    }

    #[tokio::test]
    async fn gemini_analyzes_image_remotely() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/test-model:generateContent"))
            .and(body_partial_json(json!({"generationConfig": {"temperature": 0.3}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "📊 **もんじゃ焼き**"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let analysis = provider(ProviderKind::Gemini, &server, Some("g-key"))
            .analyze_image("/9j/4AAQSkZJRg==", Some("お昼ごはん"))
            .await
            .expect("analysis");
        assert_eq!(analysis, "📊 **もんじゃ焼き**");
    }

    #[tokio::test]
    async fn image_analysis_is_local_for_other_shapes() {
        let server = MockServer::start().await;
        let analysis = provider(ProviderKind::OpenAi, &server, Some("sk-test"))
            .analyze_image("/9j/4AAQSkZJRg==", None)
            .await
            .expect("analysis");
        assert_eq!(analysis, local_responder().pick_image_analysis());
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[test]
    fn fallback_reasons_are_classified() {
        assert_eq!(
            ProviderError::MissingCredentials(ProviderKind::OpenAi).fallback_reason(),
            FallbackReason::MissingCredentials
        );
        assert_eq!(
            ProviderError::Status {
                status: 429,
                body: String::new()
            }
            .fallback_reason(),
            FallbackReason::HttpStatus
        );
        assert_eq!(
            ProviderError::Unsupported(ProviderKind::Anthropic)
                .fallback_reason()
                .as_str(),
            "unsupported_operation"
        );
    }

    #[tokio::test]
    async fn transport_error_hides_query_string_key() {
        let endpoint =
            ProviderEndpoint::new("http://127.0.0.1:1", "m").with_api_key("SECRET-GEMINI-KEY");
        let provider = HttpChatProvider::for_kind(ProviderKind::Gemini, endpoint.clone());

        let err = provider
            .post(&GeminiShape, &endpoint, false, &json!({}))
            .await
            .expect_err("nothing listens on port 1");
        assert!(matches!(err, ProviderError::Transport(_)));
        assert_eq!(err.fallback_reason(), FallbackReason::Transport);
        assert!(!err.to_string().contains("SECRET-GEMINI-KEY"), "{err}");
        assert!(!format!("{err:?}").contains("SECRET-GEMINI-KEY"));
    }

    #[test]
    fn image_prompt_appends_user_comment() {
        assert_eq!(image_prompt(Some("  ")), IMAGE_ANALYSIS_PROMPT);
        assert!(image_prompt(Some("夜ごはん")).ends_with("ユーザーのコメント: 夜ごはん"));
    }
}
