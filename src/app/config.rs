use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::ask_llm::{LlmConfig, RetryPolicy};
use crate::error::ConfigError;
use crate::model::{QuestionType, QuizParameters};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub quiz: QuizParameters,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub upload_path: Option<PathBuf>,
    #[serde(default)]
    pub use_uploaded: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub custom_questions: Vec<CustomQuestion>,
}

/// 手动录入的题目
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CustomQuestion {
    pub question: String,
    pub answer: String,
    #[serde(rename = "type", default = "default_custom_type")]
    pub kind: QuestionType,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// 存放密钥的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl LlmSettings {
    /// 从环境变量读取密钥，缺失即启动失败
    pub fn credential(&self) -> Result<String, ConfigError> {
        let key = std::env::var(&self.api_key_env).unwrap_or_default();
        if key.trim().is_empty() {
            return Err(ConfigError::MissingCredential(self.api_key_env.clone()));
        }
        Ok(key.trim().to_string())
    }

    pub fn llm_config(&self, api_key: String) -> LlmConfig {
        LlmConfig {
            api_key,
            api_base_url: self.api_base_url.clone(),
            model_name: self.model.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = config_path.unwrap_or_else(|| Path::new("config.toml"));
        if path.exists() {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            let cfg = Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
            info!("已加载配置文件: {}", path.display());
            return Ok(cfg);
        }
        debug!("配置文件 {} 不存在，使用默认配置", path.display());
        Ok(AppConfig::default())
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            quiz: QuizParameters::default(),
            llm: LlmSettings::default(),
            upload_path: None,
            use_uploaded: false,
            output_dir: default_output_dir(),
            custom_questions: Vec::new(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_custom_type() -> QuestionType {
    QuestionType::ShortAnswer
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai/".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
