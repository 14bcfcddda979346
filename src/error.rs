use std::time::Duration;

use thiserror::Error;

/// 参数校验错误（用户可修正，阻止生成）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("请至少选择一种题型")]
    NoQuestionTypes,

    #[error("不支持的年级: {0}（可选 6-12）")]
    InvalidGrade(String),

    #[error("题目数量必须在 {min}-{max} 之间，当前为 {value}")]
    CountOutOfRange { value: u32, min: u32, max: u32 },

    #[error("评分严格度必须在 1-5 之间，当前为 {0}")]
    StrictnessOutOfRange(u8),

    #[error("每题分值必须在 1-10 之间，当前为 {0}")]
    PointsOutOfRange(u32),

    #[error("自定义题目的 {field} 不能为空")]
    EmptyField { field: &'static str },
}

/// 生成服务调用错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// 鉴权失败，不重试
    #[error("鉴权失败: {0}")]
    Auth(String),

    #[error("请求超时（{0:?}）")]
    Timeout(Duration),

    /// 网络、限流、5xx 等可重试错误
    #[error("服务暂时不可用: {0}")]
    Transient(String),

    #[error("服务返回内容为空")]
    EmptyResponse,
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Timeout(_) | ServiceError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("生成题目失败: {0}")]
    ServiceFailure(#[from] ServiceError),

    #[error("生成服务没有返回可解析的题目")]
    EmptyResult,

    #[error("生成已取消")]
    Cancelled,
}

/// 答题会话错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("当前没有进行中的测验")]
    NoActiveQuiz,

    #[error("测验已提交，不能再修改")]
    AlreadySubmitted,

    #[error("题号 {index} 超出范围（共 {total} 题）")]
    QuestionOutOfRange { index: usize, total: usize },

    #[error("测验没有题目，无法计分")]
    NoQuestions,
}

/// 文本提取的降级警告，不会中断流程
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionWarning {
    #[error("不支持的文件类型: {0}")]
    Unsupported(String),

    #[error("读取文件失败: {0}")]
    Unreadable(String),

    #[error("提取文本失败: {0}")]
    Failed(String),

    #[error("文件中没有可提取的文本")]
    NoText,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("没有可导出的内容: {0}")]
    Empty(&'static str),

    #[error("序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("写入文件失败: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("缺少环境变量 {0}，无法访问生成服务")]
    MissingCredential(String),

    #[error("读取配置文件失败: {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("解析配置文件失败: {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
