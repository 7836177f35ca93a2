use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use core_types::{ChatCompletionOptions, ChatMessage, ChatRole, ProviderKind};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};

use crate::image::inline_image;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub extra_headers: Vec<(String, String)>,
}

impl ProviderEndpoint {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            extra_headers: Vec::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// One backend's wire format. The HTTP client and the accumulator only see
/// this trait, never the provider tag.
pub trait RequestShape: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn build_request(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatCompletionOptions,
    ) -> Value;

    fn extract_content(&self, payload: &Value) -> Option<String>;

    fn endpoint_for(&self, endpoint: &ProviderEndpoint, api_key: &str, streaming: bool) -> String;

    fn auth_headers(&self, api_key: &str) -> Result<HeaderMap>;

    /// Whether `stream_chat_completion` decodes the SSE body incrementally
    /// instead of re-chunking a single-shot reply.
    fn incremental_streaming(&self) -> bool {
        false
    }

    fn is_stream_end(&self, _payload: &Value) -> bool {
        false
    }

    fn stream_error(&self, _payload: &Value) -> Option<String> {
        None
    }

    fn build_image_request(&self, _model: &str, _base64_image: &str, _prompt: &str) -> Option<Value> {
        None
    }
}

pub fn shape_for(kind: ProviderKind) -> Option<Arc<dyn RequestShape>> {
    match kind {
        ProviderKind::Local => None,
        ProviderKind::OpenAi => Some(Arc::new(OpenAiShape)),
        ProviderKind::Anthropic => Some(Arc::new(AnthropicShape)),
        ProviderKind::Gemini => Some(Arc::new(GeminiShape)),
    }
}

pub fn build_headers(
    shape: &dyn RequestShape,
    api_key: &str,
    extra_headers: &[(String, String)],
) -> Result<HeaderMap> {
    let mut headers = shape.auth_headers(api_key)?;
    for (key, value) in extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| anyhow!("invalid header name: {key}"))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| anyhow!("invalid header value for {key}"))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.filter(|text| !text.is_empty()).map(str::to_string)
}

fn joined_system_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|msg| msg.role == ChatRole::System)
        .map(|msg| msg.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiShape;

impl RequestShape for OpenAiShape {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn build_request(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatCompletionOptions,
    ) -> Value {
        json!({
            "model": model,
            "messages": to_openai_messages(messages),
            "stream": options.stream,
            "temperature": options.temperature(),
            "max_tokens": options.max_tokens(),
        })
    }

    fn extract_content(&self, payload: &Value) -> Option<String> {
        let choice = payload.get("choices")?.get(0)?;
        non_empty(
            choice
                .get("delta")
                .and_then(|delta| delta.get("content"))
                .and_then(Value::as_str),
        )
        .or_else(|| {
            non_empty(
                choice
                    .get("message")
                    .and_then(|message| message.get("content"))
                    .and_then(Value::as_str),
            )
        })
    }

    fn endpoint_for(&self, endpoint: &ProviderEndpoint, _api_key: &str, _streaming: bool) -> String {
        format!("{}/chat/completions", endpoint.base())
    }

    fn auth_headers(&self, api_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
                .context("invalid authorization header")?,
        );
        Ok(headers)
    }
}

fn to_openai_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.image_data.as_deref() {
            Some(image) if msg.role == ChatRole::User => {
                let (payload, mime) = inline_image(image);
                json!({
                    "role": msg.role.as_str(),
                    "content": [
                        {"type": "text", "text": msg.content},
                        {"type": "image_url", "image_url": {"url": format!("data:{mime};base64,{payload}")}}
                    ]
                })
            }
            _ => json!({"role": msg.role.as_str(), "content": msg.content}),
        })
        .collect()
}

/// Sends the system text as a top-level field, turns as `messages`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicShape;

impl RequestShape for AnthropicShape {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn build_request(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatCompletionOptions,
    ) -> Value {
        let mut body = json!({
            "model": model,
            "max_tokens": options.max_tokens(),
            "temperature": options.temperature(),
            "messages": to_anthropic_messages(messages),
            "stream": options.stream,
        });
        let system = joined_system_text(messages);
        if !system.is_empty() {
            body["system"] = Value::String(system);
        }
        body
    }

    fn extract_content(&self, payload: &Value) -> Option<String> {
        non_empty(
            payload
                .get("delta")
                .and_then(|delta| delta.get("text"))
                .and_then(Value::as_str),
        )
        .or_else(|| {
            non_empty(
                payload
                    .get("content")
                    .and_then(|content| content.get(0))
                    .and_then(|block| block.get("text"))
                    .and_then(Value::as_str),
            )
        })
    }

    fn endpoint_for(&self, endpoint: &ProviderEndpoint, _api_key: &str, _streaming: bool) -> String {
        format!("{}/v1/messages", endpoint.base())
    }

    fn auth_headers(&self, api_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(api_key.trim()).context("invalid api key header")?,
        );
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        Ok(headers)
    }

    fn incremental_streaming(&self) -> bool {
        true
    }

    fn is_stream_end(&self, payload: &Value) -> bool {
        payload.get("type").and_then(Value::as_str) == Some("message_stop")
    }

    fn stream_error(&self, payload: &Value) -> Option<String> {
        if payload.get("type").and_then(Value::as_str) != Some("error") {
            return None;
        }
        Some(
            payload
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("anthropic error")
                .to_string(),
        )
    }
}

fn to_anthropic_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .filter(|msg| msg.role != ChatRole::System)
        .map(|msg| match msg.image_data.as_deref() {
            Some(image) if msg.role == ChatRole::User => {
                let (payload, mime) = inline_image(image);
                json!({
                    "role": msg.role.as_str(),
                    "content": [
                        {"type": "image", "source": {"type": "base64", "media_type": mime, "data": payload}},
                        {"type": "text", "text": msg.content}
                    ]
                })
            }
            _ => json!({"role": msg.role.as_str(), "content": msg.content}),
        })
        .collect()
}

/// No system role on the wire: the system text is prefixed to the first user
/// turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiShape;

impl RequestShape for GeminiShape {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn build_request(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        options: &ChatCompletionOptions,
    ) -> Value {
        let system = joined_system_text(messages);
        let mut contents: Vec<Value> = messages
            .iter()
            .filter(|msg| msg.role != ChatRole::System)
            .map(|msg| {
                let role = if msg.role == ChatRole::Assistant {
                    "model"
                } else {
                    "user"
                };
                let mut parts = vec![json!({"text": msg.content})];
                if let Some(image) = msg.image_data.as_deref() {
                    let (payload, mime) = inline_image(image);
                    parts.push(json!({"inline_data": {"mime_type": mime, "data": payload}}));
                }
                json!({"role": role, "parts": parts})
            })
            .collect();

        if !system.is_empty()
            && let Some(first) = contents.first_mut()
            && first["role"] == "user"
        {
            let text = first["parts"][0]["text"].as_str().unwrap_or_default();
            first["parts"][0]["text"] = Value::String(format!("{system}\n\n{text}"));
        }

        json!({
            "contents": contents,
            "generationConfig": {
                "temperature": options.temperature(),
                "maxOutputTokens": options.max_tokens(),
            }
        })
    }

    fn extract_content(&self, payload: &Value) -> Option<String> {
        non_empty(
            payload
                .get("candidates")
                .and_then(|candidates| candidates.get(0))
                .and_then(|candidate| candidate.get("content"))
                .and_then(|content| content.get("parts"))
                .and_then(|parts| parts.get(0))
                .and_then(|part| part.get("text"))
                .and_then(Value::as_str),
        )
    }

    fn endpoint_for(&self, endpoint: &ProviderEndpoint, api_key: &str, streaming: bool) -> String {
        let (method, query) = if streaming {
            ("streamGenerateContent", "alt=sse&")
        } else {
            ("generateContent", "")
        };
        format!(
            "{}/v1beta/models/{}:{method}?{query}key={}",
            endpoint.base(),
            endpoint.model.trim(),
            api_key.trim()
        )
    }

    fn auth_headers(&self, _api_key: &str) -> Result<HeaderMap> {
        Ok(HeaderMap::new())
    }

    fn build_image_request(&self, _model: &str, base64_image: &str, prompt: &str) -> Option<Value> {
        let (payload, mime) = inline_image(base64_image);
        Some(json!({
            "contents": [{
                "parts": [
                    {"text": prompt},
                    {"inline_data": {"mime_type": mime, "data": payload}}
                ]
            }],
            "generationConfig": {
                "temperature": 0.3,
                "maxOutputTokens": core_types::DEFAULT_MAX_TOKENS,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("persona"),
            ChatMessage::system("memory"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
            ChatMessage::user("again"),
        ]
    }

    #[test]
    fn openai_keeps_roles_inline() {
        let body = OpenAiShape.build_request("gpt", &conversation(), &ChatCompletionOptions::default());
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(5));
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn anthropic_lifts_system_to_top_level() {
        let body = AnthropicShape.build_request(
            "claude",
            &conversation(),
            &ChatCompletionOptions::streaming(),
        );
        assert_eq!(body["system"], "persona\n\nmemory");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(3));
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn gemini_prefixes_system_to_first_user_turn() {
        let body = GeminiShape.build_request("gemini", &conversation(), &ChatCompletionOptions::default());
        let contents = body["contents"].as_array().expect("contents");
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["parts"][0]["text"], "persona\n\nmemory\n\nhello");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 500);
    }

    #[test]
    fn gemini_leaves_assistant_first_turn_alone() {
        let messages = vec![ChatMessage::system("persona"), ChatMessage::assistant("hi")];
        let body = GeminiShape.build_request("gemini", &messages, &ChatCompletionOptions::default());
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn user_image_becomes_inline_part() {
        let messages = vec![ChatMessage::user("what is this").with_image("/9j/4AAQSkZJRg==")];
        let body = GeminiShape.build_request("gemini", &messages, &ChatCompletionOptions::default());
        assert_eq!(body["contents"][0]["parts"][1]["inline_data"]["mime_type"], "image/jpeg");

        let body = OpenAiShape.build_request("gpt", &messages, &ChatCompletionOptions::default());
        let url = body["messages"][0]["content"][1]["image_url"]["url"]
            .as_str()
            .expect("url");
        assert!(url.starts_with("data:image/jpeg;base64,/9j/"));
    }

    #[test]
    fn extracts_text_from_each_envelope() {
        let openai_delta = json!({"choices": [{"delta": {"content": "a"}}]});
        let openai_message = json!({"choices": [{"message": {"content": "b"}}]});
        let anthropic_delta = json!({"type": "content_block_delta", "delta": {"text": "c"}});
        let anthropic_message = json!({"content": [{"type": "text", "text": "d"}]});
        let gemini = json!({"candidates": [{"content": {"parts": [{"text": "e"}]}}]});

        assert_eq!(OpenAiShape.extract_content(&openai_delta).as_deref(), Some("a"));
        assert_eq!(OpenAiShape.extract_content(&openai_message).as_deref(), Some("b"));
        assert_eq!(AnthropicShape.extract_content(&anthropic_delta).as_deref(), Some("c"));
        assert_eq!(AnthropicShape.extract_content(&anthropic_message).as_deref(), Some("d"));
        assert_eq!(GeminiShape.extract_content(&gemini).as_deref(), Some("e"));
        assert_eq!(GeminiShape.extract_content(&json!({})), None);
    }

    #[test]
    fn endpoints_follow_each_backend() {
        let endpoint = ProviderEndpoint::new("https://example.test/", "model-x");
        assert_eq!(
            OpenAiShape.endpoint_for(&endpoint, "k", true),
            "https://example.test/chat/completions"
        );
        assert_eq!(
            AnthropicShape.endpoint_for(&endpoint, "k", true),
            "https://example.test/v1/messages"
        );
        assert_eq!(
            GeminiShape.endpoint_for(&endpoint, "k", false),
            "https://example.test/v1beta/models/model-x:generateContent?key=k"
        );
        assert_eq!(
            GeminiShape.endpoint_for(&endpoint, "k", true),
            "https://example.test/v1beta/models/model-x:streamGenerateContent?alt=sse&key=k"
        );
    }

    #[test]
    fn anthropic_recognizes_stop_and_error_events() {
        assert!(AnthropicShape.is_stream_end(&json!({"type": "message_stop"})));
        assert_eq!(
            AnthropicShape.stream_error(&json!({"type": "error", "error": {"message": "Overloaded"}})),
            Some("Overloaded".to_string())
        );
        assert_eq!(AnthropicShape.stream_error(&json!({"type": "ping"})), None);
    }

    #[test]
    fn extra_headers_are_applied() {
        let headers = build_headers(
            &OpenAiShape,
            "secret",
            &[("x-trace".to_string(), "1".to_string())],
        )
        .expect("headers");
        assert_eq!(headers["authorization"], "Bearer secret");
        assert_eq!(headers["x-trace"], "1");
    }
}
