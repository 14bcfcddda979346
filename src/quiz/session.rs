use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ask_llm::{GenerationRequest, GenerationService};
use crate::error::{GenerationError, SessionError, ValidationError};
use crate::model::{Flashcard, Question, QuestionBankEntry, QuestionType, QuizParameters};
use crate::quiz::parser::parse_questions;
use crate::quiz::scoring::{ScoreReport, build_flashcards, score};

/// 调用生成服务并解析成题目
pub async fn generate_quiz<S: GenerationService>(
    service: &S,
    request: &GenerationRequest,
    fallback_kind: QuestionType,
) -> Result<Vec<Question>, GenerationError> {
    let raw = service.generate(request).await?;
    debug!("生成服务原始返回: {}", raw);

    let questions = parse_questions(&raw, request.requested_count, fallback_kind);
    if questions.is_empty() {
        warn!("生成服务的返回中没有解析出题目");
        return Err(GenerationError::EmptyResult);
    }
    if questions.len() < request.requested_count {
        warn!("只得到 {}/{} 道题目", questions.len(), request.requested_count);
    }
    info!("✅ 生成了 {} 道题目", questions.len());
    Ok(questions)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    InProgress,
    Submitted,
}

/// 一次测验
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSession {
    pub id: Uuid,
    pub parameters: QuizParameters,
    pub created_at: DateTime<Local>,
    questions: Vec<Question>,
    status: SessionStatus,
    report: Option<ScoreReport>,
}

impl QuizSession {
    pub fn new(parameters: QuizParameters, questions: Vec<Question>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parameters,
            created_at: Local::now(),
            questions,
            status: SessionStatus::InProgress,
            report: None,
        }
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn report(&self) -> Option<&ScoreReport> {
        self.report.as_ref()
    }

    pub fn timestamp(&self) -> String {
        self.created_at.format("%Y-%m-%d %H:%M").to_string()
    }

    /// 记录答案；选项字母会被换成对应选项文本
    pub fn record_answer(&mut self, index: usize, input: &str) -> Result<&Question, SessionError> {
        if self.status == SessionStatus::Submitted {
            return Err(SessionError::AlreadySubmitted);
        }
        let total = self.questions.len();
        let question = self
            .questions
            .get_mut(index)
            .ok_or(SessionError::QuestionOutOfRange { index, total })?;
        let answer = question.resolve_answer(input);
        debug!("第 {} 题作答: {}", index + 1, answer);
        question.user_answer = Some(answer);
        Ok(question)
    }

    /// 提交并计分，只能提交一次
    pub fn submit(&mut self) -> Result<(ScoreReport, Vec<Flashcard>), SessionError> {
        if self.status == SessionStatus::Submitted {
            return Err(SessionError::AlreadySubmitted);
        }
        let report = score(&self.questions, self.parameters.points_per_question)?;
        if report.unverified_scored > 0 {
            warn!(
                "⚠️ 有 {} 道题的正确答案是占位值，成绩仅供参考",
                report.unverified_scored
            );
        }
        let flashcards = build_flashcards(&self.questions, &report, &self.parameters.topic);

        self.status = SessionStatus::Submitted;
        self.report = Some(report.clone());
        info!("📊 {}", report.summary());
        Ok((report, flashcards))
    }
}

/// 用户手动录入的题库
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionBank {
    entries: Vec<QuestionBankEntry>,
}

impl QuestionBank {
    pub fn add(&mut self, question: &str, answer: &str, kind: QuestionType) -> Result<&QuestionBankEntry, ValidationError> {
        let question = question.trim();
        let answer = answer.trim();
        if question.is_empty() {
            return Err(ValidationError::EmptyField { field: "question" });
        }
        if answer.is_empty() {
            return Err(ValidationError::EmptyField { field: "answer" });
        }
        self.entries.push(QuestionBankEntry {
            id: Uuid::new_v4(),
            question: question.to_string(),
            answer: answer.to_string(),
            kind,
            created_at: Local::now(),
        });
        debug!("题库新增条目: {}", question);
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn entries(&self) -> &[QuestionBankEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 整个交互会话的状态：当前测验、错题闪卡、题库
#[derive(Debug, Default)]
pub struct SessionState {
    quiz: Option<QuizSession>,
    flashcards: Vec<Flashcard>,
    pub question_bank: QuestionBank,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新测验，替换之前的测验
    pub fn start_quiz(&mut self, parameters: QuizParameters, questions: Vec<Question>) -> &mut QuizSession {
        if let Some(previous) = &self.quiz {
            debug!("替换旧测验 {}", previous.id);
        }
        self.quiz.insert(QuizSession::new(parameters, questions))
    }

    pub fn quiz(&self) -> Option<&QuizSession> {
        self.quiz.as_ref()
    }

    pub fn quiz_mut(&mut self) -> Result<&mut QuizSession, SessionError> {
        self.quiz.as_mut().ok_or(SessionError::NoActiveQuiz)
    }

    pub fn record_answer(&mut self, index: usize, input: &str) -> Result<&Question, SessionError> {
        self.quiz_mut()?.record_answer(index, input)
    }

    /// 提交当前测验，错题闪卡加入卡组
    pub fn submit(&mut self) -> Result<ScoreReport, SessionError> {
        let (report, flashcards) = self.quiz_mut()?.submit()?;
        self.flashcards.extend(flashcards);
        Ok(report)
    }

    pub fn flashcards(&self) -> &[Flashcard] {
        &self.flashcards
    }

    /// 清空当前测验和闪卡，保留手动录入的题库
    pub fn reset(&mut self) {
        info!("重置会话");
        self.quiz = None;
        self.flashcards.clear();
    }
}
