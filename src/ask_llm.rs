use std::fmt;
use std::future::Future;
use std::time::Duration;

use openai::Credentials;
use openai::chat::{ChatCompletion, ChatCompletionMessage, ChatCompletionMessageRole};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::error::ServiceError;

/// 一次生成请求：用户 prompt、系统消息和期望的题目数量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_message: Option<String>,
    pub requested_count: usize,
}

/// 外部文本生成服务
#[allow(async_fn_in_trait)]
pub trait GenerationService {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError>;
}

impl<S: GenerationService> GenerationService for &S {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        (**self).generate(request).await
    }
}

/// LLM 请求配置
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API 密钥，只能来自环境变量
    pub api_key: String,
    /// API 基础 URL（OpenAI 兼容接口）
    pub api_base_url: String,
    /// 模型名称
    pub model_name: String,
    /// 单次请求超时
    pub timeout: Duration,
}

/// 带配置的 LLM 调用
pub async fn ask_llm_with_config(
    user_message: &str,
    system_message: Option<&str>,
    config: &LlmConfig,
) -> Result<String, ServiceError> {
    debug!("正在调用 LLM API，模型: {}", config.model_name);
    debug!("用户消息: {}", user_message);

    let credentials = Credentials::new(&config.api_key, &config.api_base_url);

    let mut messages = Vec::new();

    if let Some(system_msg) = system_message {
        messages.push(ChatCompletionMessage {
            role: ChatCompletionMessageRole::System,
            content: Some(system_msg.to_string()),
            name: None,
            function_call: None,
            tool_call_id: None,
            tool_calls: None,
        });
    }

    messages.push(ChatCompletionMessage {
        role: ChatCompletionMessageRole::User,
        content: Some(user_message.to_string()),
        name: None,
        function_call: None,
        tool_call_id: None,
        tool_calls: None,
    });

    let request = ChatCompletion::builder(&config.model_name, messages)
        .credentials(credentials)
        .create();

    let chat_completion = call_with_timeout(config.timeout, request).await?;

    debug!("LLM API 调用成功");

    let content = chat_completion
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or(ServiceError::EmptyResponse)?;

    let content = content.trim();
    if content.is_empty() {
        return Err(ServiceError::EmptyResponse);
    }
    Ok(content.to_string())
}

/// 给一次调用加上超时，超时和调用错误都转换成 ServiceError
pub async fn call_with_timeout<T, E, F>(limit: Duration, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, E>>,
    E: fmt::Display + fmt::Debug,
{
    timeout(limit, call)
        .await
        .map_err(|_| {
            warn!("LLM API 调用超时（{:?}）", limit);
            ServiceError::Timeout(limit)
        })?
        .map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify_failure(&format!("{} {:?}", e, e))
        })
}

/// 根据错误信息区分鉴权失败（不重试）和临时故障（可重试）
pub fn classify_failure(detail: &str) -> ServiceError {
    const AUTH_MARKERS: [&str; 8] = [
        "invalid_api_key",
        "incorrect api key",
        "api key not valid",
        "api_key_invalid",
        "unauthorized",
        "permission_denied",
        "401",
        "403",
    ];

    let lowered = detail.to_lowercase();
    if AUTH_MARKERS.iter().any(|m| lowered.contains(m)) {
        ServiceError::Auth(detail.trim().to_string())
    } else {
        ServiceError::Transient(detail.trim().to_string())
    }
}

/// OpenAI 兼容接口的生成服务（Gemini 也提供该接口）
#[derive(Debug, Clone)]
pub struct OpenAiGenerationService {
    config: LlmConfig,
}

impl OpenAiGenerationService {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }
}

impl GenerationService for OpenAiGenerationService {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        ask_llm_with_config(&request.prompt, request.system_message.as_deref(), &self.config).await
    }
}

/// 重试策略：可重试错误按 attempt * base_delay 递增等待，鉴权错误立即失败
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// 给任意生成服务加上重试
#[derive(Debug, Clone)]
pub struct Retrying<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> Retrying<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<S: GenerationService> GenerationService for Retrying<S> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            info!("📤 请求生成题目 (第 {}/{} 次)", attempt, max_attempts);
            match self.inner.generate(request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.base_delay * attempt;
                    warn!("⚠️ 第 {} 次生成失败: {}，{:?} 后重试...", attempt, e, delay);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("❌ 生成失败（第 {} 次）: {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }
}
