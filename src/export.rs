use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ExportError;
use crate::model::{Flashcard, QuestionBankEntry};
use crate::quiz::{QuestionBank, QuizSession};
use crate::utils::text::sanitize_filename;

pub const MIME_JSON: &str = "application/json";
pub const MIME_TEXT: &str = "text/plain";

/// 导出条目需要一个稳定的唯一键
pub trait Keyed {
    fn key(&self) -> Uuid;
}

impl Keyed for Flashcard {
    fn key(&self) -> Uuid {
        self.id
    }
}

impl Keyed for QuestionBankEntry {
    fn key(&self) -> Uuid {
        self.id
    }
}

/// 序列化为 {id: item} 形式的 JSON 对象，键按字典序排列
pub fn serialize_to_json<T: Serialize + Keyed>(items: &[T]) -> Result<String, ExportError> {
    let mut map = Map::new();
    for item in items {
        map.insert(item.key().to_string(), serde_json::to_value(item)?);
    }
    Ok(serde_json::to_string_pretty(&Value::Object(map))?)
}

/// 交给宿主环境下载的内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPayload {
    pub filename: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ExportPayload {
    pub fn new(filename: impl Into<String>, mime_type: &'static str, content: String) -> Self {
        Self {
            filename: filename.into(),
            mime_type,
            bytes: content.into_bytes(),
        }
    }

    /// data:{mime};base64,... 形式，便于作为下载链接
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.bytes))
    }

    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(sanitize_filename(&self.filename));
        fs::write(&path, &self.bytes)?;
        info!("📥 已导出 {}", path.display());
        Ok(path)
    }
}

pub fn question_bank_json(bank: &QuestionBank) -> Result<ExportPayload, ExportError> {
    if bank.is_empty() {
        return Err(ExportError::Empty("question bank"));
    }
    let json = serialize_to_json(bank.entries())?;
    debug!("题库 JSON: {}", json);
    Ok(ExportPayload::new("question_bank.json", MIME_JSON, json))
}

pub fn flashcards_json(cards: &[Flashcard]) -> Result<ExportPayload, ExportError> {
    if cards.is_empty() {
        return Err(ExportError::Empty("flashcards"));
    }
    Ok(ExportPayload::new("flashcards.json", MIME_JSON, serialize_to_json(cards)?))
}

/// 当前测验的题目，空行分隔
pub fn question_bank_text(session: Option<&QuizSession>) -> Result<ExportPayload, ExportError> {
    let session = session
        .filter(|s| !s.questions().is_empty())
        .ok_or(ExportError::Empty("no quiz generated yet"))?;
    let content = session
        .questions()
        .iter()
        .map(|q| q.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    Ok(ExportPayload::new("question_bank.txt", MIME_TEXT, content))
}

pub fn flashcards_text(cards: &[Flashcard]) -> Result<ExportPayload, ExportError> {
    if cards.is_empty() {
        return Err(ExportError::Empty("flashcards"));
    }
    let content = cards
        .iter()
        .map(|c| format!("{} - {}", c.front, c.back))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ExportPayload::new("flashcards.txt", MIME_TEXT, content))
}
