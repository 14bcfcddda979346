use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{Question, QuestionType};
use crate::utils::text::clean_json_string;

/// 行首的编号或列表符号，例如 "1. "、"2) "、"- "、"* "
static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d{1,3}[.)]|[-*•])\s+").expect("list marker regex is invalid"));

#[derive(Debug, Deserialize)]
struct GeneratedQuestion {
    #[serde(alias = "text", alias = "stem")]
    question: String,
    #[serde(default, rename = "type", alias = "kind")]
    kind: Option<String>,
    #[serde(default, alias = "choices")]
    options: Vec<Value>,
    #[serde(default, alias = "correct_answer", alias = "correctAnswer")]
    answer: Option<Value>,
}

/// 选项或答案里的标量转成文本；数字按 JSON 原样输出
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
        _ => None,
    }
}

impl GeneratedQuestion {
    fn into_question(self, fallback_kind: QuestionType) -> Option<Question> {
        let text = self.question.trim().to_string();
        if text.is_empty() {
            return None;
        }

        let options: Vec<String> = self
            .options
            .iter()
            .filter_map(scalar_text)
            .filter(|o| !o.is_empty())
            .collect();

        let kind = self
            .kind
            .as_deref()
            .and_then(QuestionType::parse_loose)
            .unwrap_or(if options.is_empty() { fallback_kind } else { QuestionType::Mcq });

        let answer = self.answer.and_then(|a| resolve_structured_answer(&a, &options));

        match answer {
            Some(correct_answer) => {
                let answer_verified = options.is_empty() || options.contains(&correct_answer);
                if !answer_verified {
                    warn!("题目答案不在选项中: {}", text);
                }
                Some(Question {
                    text,
                    kind,
                    options,
                    correct_answer,
                    answer_verified,
                    user_answer: None,
                })
            }
            None => {
                warn!("题目缺少答案，使用占位答案: {}", text);
                let mut question = Question::with_placeholders(text);
                if !options.is_empty() {
                    question.correct_answer = options[0].clone();
                    question.options = options;
                }
                question.kind = kind;
                Some(question)
            }
        }
    }
}

/// 答案可以是选项文本、选项字母（"B"）或从 0 开始的下标；数字先按选项文本匹配
fn resolve_structured_answer(answer: &Value, options: &[String]) -> Option<String> {
    match answer {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if options.iter().any(|o| o == s) {
                return Some(s.to_string());
            }
            let mut chars = s.chars();
            if let (Some(letter), None) = (chars.next(), chars.next()) {
                let letter = letter.to_ascii_uppercase();
                if letter.is_ascii_uppercase() {
                    if let Some(option) = options.get((letter as u8 - b'A') as usize) {
                        return Some(option.clone());
                    }
                }
            }
            Some(s.to_string())
        }
        Value::Number(n) => {
            let text = n.to_string();
            if options.contains(&text) {
                return Some(text);
            }
            n.as_u64()
                .and_then(|idx| options.get(idx as usize).cloned())
                .or(Some(text))
        }
        Value::Bool(_) => scalar_text(answer),
        _ => None,
    }
}

/// 解析结构化 JSON 返回；内容不是 JSON 对象或数组时返回 None。
/// 单个题目格式不对只跳过该题，合法但没有可用题目时返回空列表
pub fn parse_structured(raw: &str, fallback_kind: QuestionType) -> Option<Vec<Question>> {
    let cleaned = clean_json_string(raw);
    let payload: Value = match serde_json::from_str(cleaned) {
        Ok(p) => p,
        Err(e) => {
            debug!("返回内容不是结构化题目 JSON: {}", e);
            return None;
        }
    };

    let items = match payload {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("questions") {
            Some(Value::Array(items)) => items,
            _ => {
                warn!("JSON 中没有 questions 数组");
                Vec::new()
            }
        },
        _ => return None,
    };

    Some(
        items
            .into_iter()
            .enumerate()
            .filter_map(|(idx, item)| match serde_json::from_value::<GeneratedQuestion>(item) {
                Ok(q) => q.into_question(fallback_kind),
                Err(e) => {
                    warn!("跳过第 {} 个格式不正确的题目: {}", idx + 1, e);
                    None
                }
            })
            .collect(),
    )
}

/// 旧格式：按行切分，空行、代码块标记行丢弃，去掉行首编号
pub fn parse_legacy(raw: &str) -> Vec<Question> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .map(|line| LIST_MARKER.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .map(Question::with_placeholders)
        .collect()
}

/// 先尝试结构化解析，不是 JSON 时才退回按行切分，最后截断到 requested_count
pub fn parse_questions(raw: &str, requested_count: usize, fallback_kind: QuestionType) -> Vec<Question> {
    let mut questions = match parse_structured(raw, fallback_kind) {
        Some(questions) => {
            debug!("结构化解析得到 {} 道题目", questions.len());
            questions
        }
        None => {
            warn!("未能按结构化格式解析，改用按行切分（答案为占位值）");
            parse_legacy(raw)
        }
    };
    questions.truncate(requested_count);
    questions
}
