//! AI 个性化改写
//!
//! 渲染后的文本可交给外部模型改写成更自然的短消息（不超过三句）。
//! 改写是可选步骤：未启用、模板已个性化、调用失败、超时或空回复时，
//! 一律回退到模板替换后的原文。回退是显式的结果分支而不是吞掉异常。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loyalty::MessageType;
use loyalty_shared::config::PersonalizationConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, WorkerError};
use crate::templates::RenderedMessage;

/// 改写结果最多保留的句数
pub const MAX_SENTENCES: usize = 3;

/// 发给外部模型的请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizationRequest {
    /// 已完成变量替换的文本
    pub text: String,
    pub tenant_name: String,
    pub message_type: MessageType,
}

/// 个性化改写接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Personalizer: Send + Sync {
    async fn rewrite(&self, request: &PersonalizationRequest) -> Result<String>;
}

/// 回退原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    Disabled,
    AlreadyPersonalized,
    Failed(String),
    TimedOut,
    EmptyReply,
}

/// 个性化步骤的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Personalized {
    Rewritten(String),
    Fallback { text: String, reason: FallbackReason },
}

impl Personalized {
    pub fn text(&self) -> &str {
        match self {
            Self::Rewritten(text) => text,
            Self::Fallback { text, .. } => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Rewritten(text) => text,
            Self::Fallback { text, .. } => text,
        }
    }

    pub fn is_rewritten(&self) -> bool {
        matches!(self, Self::Rewritten(_))
    }

    /// 是否因为外部调用出错而回退
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            Self::Fallback {
                reason: FallbackReason::Failed(_) | FallbackReason::TimedOut | FallbackReason::EmptyReply,
                ..
            }
        )
    }
}

/// 带超时与回退的个性化步骤
#[derive(Clone)]
pub struct PersonalizationStep {
    personalizer: Option<Arc<dyn Personalizer>>,
    timeout: Duration,
}

impl PersonalizationStep {
    pub fn new(personalizer: Arc<dyn Personalizer>, timeout: Duration) -> Self {
        Self {
            personalizer: Some(personalizer),
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            personalizer: None,
            timeout: Duration::ZERO,
        }
    }

    /// 按配置构造，启用时使用 OpenAI 兼容接口
    pub fn from_config(config: &PersonalizationConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        let client = OpenAiPersonalizer::new(config)?;
        Ok(Self::new(
            Arc::new(client),
            Duration::from_millis(config.timeout_ms),
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.personalizer.is_some()
    }

    pub async fn apply(&self, rendered: &RenderedMessage, tenant_name: &str) -> Personalized {
        let fallback = |reason| Personalized::Fallback {
            text: rendered.text.clone(),
            reason,
        };

        if rendered.personalized {
            return fallback(FallbackReason::AlreadyPersonalized);
        }
        let Some(personalizer) = &self.personalizer else {
            return fallback(FallbackReason::Disabled);
        };

        let request = PersonalizationRequest {
            text: rendered.text.clone(),
            tenant_name: tenant_name.to_string(),
            message_type: rendered.message_type,
        };

        match tokio::time::timeout(self.timeout, personalizer.rewrite(&request)).await {
            Ok(Ok(reply)) => {
                let text = limit_sentences(reply.trim(), MAX_SENTENCES);
                if text.is_empty() {
                    warn!(message_type = request.message_type.as_str(), "个性化返回空文本，使用模板原文");
                    fallback(FallbackReason::EmptyReply)
                } else {
                    debug!(message_type = request.message_type.as_str(), "消息已个性化");
                    Personalized::Rewritten(text)
                }
            }
            Ok(Err(e)) => {
                warn!(
                    message_type = request.message_type.as_str(),
                    error = %e,
                    "个性化调用失败，使用模板原文"
                );
                fallback(FallbackReason::Failed(e.to_string()))
            }
            Err(_) => {
                warn!(
                    message_type = request.message_type.as_str(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "个性化调用超时，使用模板原文"
                );
                fallback(FallbackReason::TimedOut)
            }
        }
    }
}

/// 截取前 max 句
///
/// 句末标点后紧跟空白或文本结束才算一句
pub fn limit_sentences(text: &str, max: usize) -> String {
    let mut count = 0;
    for (idx, ch) in text.char_indices() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        let end = idx + ch.len_utf8();
        if text[end..].chars().next().is_none_or(char::is_whitespace) {
            count += 1;
            if count == max {
                return text[..end].to_string();
            }
        }
    }
    text.to_string()
}

// ---------------------------------------------------------------------------
// OpenAI 兼容客户端
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// 调用 `POST {endpoint}/chat/completions` 的改写客户端
pub struct OpenAiPersonalizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiPersonalizer {
    pub fn new(config: &PersonalizationConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| WorkerError::Config("lifecycle.personalization.endpoint 未配置".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn chat_request<'a>(&'a self, request: &PersonalizationRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(request),
                },
                ChatMessage {
                    role: "user",
                    content: request.text.clone(),
                },
            ],
            max_tokens: 200,
            temperature: 0.7,
        }
    }
}

fn system_prompt(request: &PersonalizationRequest) -> String {
    let kind = match request.message_type {
        MessageType::MembershipReminder => "membership renewal reminder",
        MessageType::Reactivation => "we-miss-you message for a customer who has not visited in a while",
    };
    format!(
        "You write short, warm WhatsApp messages on behalf of {tenant}. \
         Rewrite the following {kind} in at most {MAX_SENTENCES} sentences. \
         Keep every name, date, number and offer exactly as given. Reply with the message only.",
        tenant = request.tenant_name,
    )
}

#[async_trait]
impl Personalizer for OpenAiPersonalizer {
    async fn rewrite(&self, request: &PersonalizationRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.endpoint);
        let mut builder = self.client.post(&url).json(&self.chat_request(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?.error_for_status()?;
        let reply: ChatResponse = response.json().await?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| WorkerError::Personalization("模型未返回内容".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(personalized: bool) -> RenderedMessage {
        RenderedMessage {
            message_type: MessageType::Reactivation,
            text: "We miss you at Glow Clinic!".to_string(),
            unresolved: Vec::new(),
            personalized,
        }
    }

    fn step(mock: MockPersonalizer) -> PersonalizationStep {
        PersonalizationStep::new(Arc::new(mock), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_rewrite_is_used_and_trimmed_to_three_sentences() {
        let mut mock = MockPersonalizer::new();
        mock.expect_rewrite()
            .withf(|req| req.tenant_name == "Glow Clinic" && req.message_type == MessageType::Reactivation)
            .times(1)
            .returning(|_| Ok(" One. Two! Three? Four. ".to_string()));

        let result = step(mock).apply(&rendered(false), "Glow Clinic").await;
        assert_eq!(result, Personalized::Rewritten("One. Two! Three?".to_string()));
    }

    #[tokio::test]
    async fn test_error_falls_back_to_template_text() {
        let mut mock = MockPersonalizer::new();
        mock.expect_rewrite()
            .returning(|_| Err(WorkerError::Personalization("503".to_string())));

        let result = step(mock).apply(&rendered(false), "Glow Clinic").await;
        assert!(result.is_degraded());
        assert_eq!(result.text(), "We miss you at Glow Clinic!");
    }

    #[tokio::test]
    async fn test_blank_reply_falls_back() {
        let mut mock = MockPersonalizer::new();
        mock.expect_rewrite().returning(|_| Ok("   ".to_string()));

        let result = step(mock).apply(&rendered(false), "Glow Clinic").await;
        assert!(matches!(
            result,
            Personalized::Fallback {
                reason: FallbackReason::EmptyReply,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_personalized_template_skips_the_call() {
        let mut mock = MockPersonalizer::new();
        mock.expect_rewrite().never();

        let result = step(mock).apply(&rendered(true), "Glow Clinic").await;
        assert!(matches!(
            result,
            Personalized::Fallback {
                reason: FallbackReason::AlreadyPersonalized,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_disabled_step_returns_template_text() {
        let result = PersonalizationStep::disabled()
            .apply(&rendered(false), "Glow Clinic")
            .await;
        assert_eq!(
            result,
            Personalized::Fallback {
                text: "We miss you at Glow Clinic!".to_string(),
                reason: FallbackReason::Disabled,
            }
        );
        assert!(!result.is_degraded());
    }

    #[test]
    fn test_limit_sentences() {
        assert_eq!(limit_sentences("Hi. You there? Yes! More.", 3), "Hi. You there? Yes!");
        assert_eq!(limit_sentences("Only one", 3), "Only one");
        assert_eq!(limit_sentences("R$ 4.50 off today. Come back!", 1), "R$ 4.50 off today.");
    }

    #[test]
    fn test_enabled_config_requires_endpoint() {
        let config = PersonalizationConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(matches!(
            PersonalizationStep::from_config(&config),
            Err(WorkerError::Config(_))
        ));
        assert!(!PersonalizationStep::from_config(&PersonalizationConfig::default())
            .unwrap()
            .is_enabled());
    }

    #[test]
    fn test_chat_request_shape() {
        let config = PersonalizationConfig {
            enabled: true,
            endpoint: Some("https://llm.example.com/v1/".to_string()),
            ..Default::default()
        };
        let client = OpenAiPersonalizer::new(&config).unwrap();
        assert_eq!(client.endpoint, "https://llm.example.com/v1");

        let request = PersonalizationRequest {
            text: "We miss you".to_string(),
            tenant_name: "Glow Clinic".to_string(),
            message_type: MessageType::Reactivation,
        };
        let body = serde_json::to_value(client.chat_request(&request)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][1]["content"], "We miss you");
        assert!(
            body["messages"][0]["content"]
                .as_str()
                .unwrap()
                .contains("Glow Clinic")
        );
    }

    #[test]
    fn test_chat_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"Hi!"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Hi!"));
    }
}
