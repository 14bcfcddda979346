use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

pub const MIN_QUESTION_COUNT: u32 = 1;
pub const MAX_QUESTION_COUNT: u32 = 50;

/// 年级，只允许 6-12
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct Grade(u8);

impl Grade {
    pub const MIN: u8 = 6;
    pub const MAX: u8 = 12;

    pub fn new(value: u8) -> Result<Self, ValidationError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidGrade(value.to_string()))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl FromStr for Grade {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        trimmed
            .parse::<u8>()
            .map_err(|_| ValidationError::InvalidGrade(trimmed.to_string()))
            .and_then(Grade::new)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Grade> for String {
    fn from(grade: Grade) -> Self {
        grade.to_string()
    }
}

// 配置里年级既可能写成 "8" 也可能写成 8
impl<'de> Deserialize<'de> for Grade {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{Error, Visitor};

        struct GradeVisitor;

        impl<'de> Visitor<'de> for GradeVisitor {
            type Value = Grade;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or integer grade between 6 and 12")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                value.parse().map_err(E::custom)
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: Error,
            {
                u8::try_from(value)
                    .map_err(|_| E::custom(ValidationError::InvalidGrade(value.to_string())))
                    .and_then(|v| Grade::new(v).map_err(E::custom))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: Error,
            {
                u8::try_from(value)
                    .map_err(|_| E::custom(ValidationError::InvalidGrade(value.to_string())))
                    .and_then(|v| Grade::new(v).map_err(E::custom))
            }
        }

        deserializer.deserialize_any(GradeVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionType {
    #[serde(rename = "MCQ", alias = "mcq", alias = "multiple_choice")]
    Mcq,
    #[serde(rename = "True/False", alias = "TrueFalse", alias = "true_false")]
    TrueFalse,
    #[serde(rename = "Fill in the Blank", alias = "FillBlank", alias = "fill_blank")]
    FillBlank,
    #[serde(rename = "Short Answer", alias = "ShortAnswer", alias = "short_answer")]
    ShortAnswer,
}

impl QuestionType {
    pub fn label(&self) -> &'static str {
        match self {
            QuestionType::Mcq => "MCQ",
            QuestionType::TrueFalse => "True/False",
            QuestionType::FillBlank => "Fill in the Blank",
            QuestionType::ShortAnswer => "Short Answer",
        }
    }

    /// 宽松解析：模型返回的 type 字段写法五花八门
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "mcq" | "multiplechoice" | "choice" => Some(QuestionType::Mcq),
            "truefalse" | "tf" | "boolean" => Some(QuestionType::TrueFalse),
            "fillintheblank" | "fillblank" | "blank" => Some(QuestionType::FillBlank),
            "shortanswer" | "short" | "open" => Some(QuestionType::ShortAnswer),
            _ => None,
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 出题参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizParameters {
    #[serde(default = "default_grade")]
    pub grade: Grade,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_count")]
    pub requested_count: u32,
    #[serde(default = "default_question_types")]
    pub question_types: Vec<QuestionType>,
    #[serde(default = "default_total_duration")]
    pub total_duration_secs: u64,
    #[serde(default = "default_per_question_duration")]
    pub per_question_duration_secs: u64,
    #[serde(default = "default_strictness")]
    pub evaluation_strictness: u8,
    #[serde(default = "default_points")]
    pub points_per_question: u32,
}

impl QuizParameters {
    /// 生成前的校验
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.question_types.is_empty() {
            return Err(ValidationError::NoQuestionTypes);
        }
        if !(MIN_QUESTION_COUNT..=MAX_QUESTION_COUNT).contains(&self.requested_count) {
            return Err(ValidationError::CountOutOfRange {
                value: self.requested_count,
                min: MIN_QUESTION_COUNT,
                max: MAX_QUESTION_COUNT,
            });
        }
        if !(1..=5).contains(&self.evaluation_strictness) {
            return Err(ValidationError::StrictnessOutOfRange(self.evaluation_strictness));
        }
        if !(1..=10).contains(&self.points_per_question) {
            return Err(ValidationError::PointsOutOfRange(self.points_per_question));
        }
        Ok(())
    }

    /// 去重后的题型，保持用户选择的顺序
    pub fn distinct_types(&self) -> Vec<QuestionType> {
        let mut seen = Vec::with_capacity(self.question_types.len());
        for t in &self.question_types {
            if !seen.contains(t) {
                seen.push(*t);
            }
        }
        seen
    }

    pub fn types_list(&self) -> String {
        self.distinct_types()
            .iter()
            .map(QuestionType::label)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for QuizParameters {
    fn default() -> Self {
        Self {
            grade: default_grade(),
            subject: default_subject(),
            topic: default_topic(),
            requested_count: default_count(),
            question_types: default_question_types(),
            total_duration_secs: default_total_duration(),
            per_question_duration_secs: default_per_question_duration(),
            evaluation_strictness: default_strictness(),
            points_per_question: default_points(),
        }
    }
}

fn default_grade() -> Grade {
    Grade(8)
}

fn default_subject() -> String {
    "Science".to_string()
}

fn default_topic() -> String {
    "Photosynthesis".to_string()
}

fn default_count() -> u32 {
    5
}

fn default_question_types() -> Vec<QuestionType> {
    vec![QuestionType::Mcq]
}

fn default_total_duration() -> u64 {
    600
}

fn default_per_question_duration() -> u64 {
    30
}

fn default_strictness() -> u8 {
    3
}

fn default_points() -> u32 {
    2
}

/// 单道题目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub kind: QuestionType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub correct_answer: String,
    /// 正确答案是否由生成服务给出且与选项一致
    pub answer_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_answer: Option<String>,
}

impl Question {
    pub const PLACEHOLDER_OPTIONS: [&'static str; 4] = ["Option A", "Option B", "Option C", "Option D"];
    pub const PLACEHOLDER_ANSWER: &'static str = "Option A";

    /// 旧格式（纯文本）题目：占位选项 + 占位答案
    pub fn with_placeholders(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: QuestionType::Mcq,
            options: Self::PLACEHOLDER_OPTIONS.iter().map(|s| s.to_string()).collect(),
            correct_answer: Self::PLACEHOLDER_ANSWER.to_string(),
            answer_verified: false,
            user_answer: None,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.user_answer.is_some()
    }

    pub fn is_correct(&self) -> Option<bool> {
        self.user_answer.as_deref().map(|a| a == self.correct_answer)
    }

    /// 把用户输入解析成答案：选项字母（A-D，不区分大小写）映射到选项文本，其他原样保留
    pub fn resolve_answer(&self, input: &str) -> String {
        let trimmed = input.trim();
        let mut chars = trimmed.chars();
        if let (Some(letter), None) = (chars.next(), chars.next()) {
            let letter = letter.to_ascii_uppercase();
            if letter.is_ascii_uppercase() {
                let idx = (letter as u8 - b'A') as usize;
                if let Some(option) = self.options.get(idx) {
                    return option.clone();
                }
            }
        }
        trimmed.to_string()
    }
}

/// 错题闪卡
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub id: Uuid,
    pub question_index: usize,
    pub topic: String,
    pub front: String,
    pub back: String,
    pub created_at: DateTime<Local>,
}

impl Flashcard {
    pub fn new(question_index: usize, topic: &str, question: &Question) -> Self {
        Self {
            id: Uuid::new_v4(),
            question_index,
            topic: topic.to_string(),
            front: question.text.clone(),
            back: question.correct_answer.clone(),
            created_at: Local::now(),
        }
    }
}

/// 用户手动录入的题库条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionBankEntry {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub created_at: DateTime<Local>,
}
