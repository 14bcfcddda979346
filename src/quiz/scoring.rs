use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::model::{Flashcard, Question};

/// 提交后的成绩
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub total_questions: usize,
    pub correct_count: usize,
    pub wrong_count: usize,
    pub unanswered_count: usize,
    /// 百分比
    pub accuracy: f64,
    /// 0-10 分，保留两位小数
    pub grade_score: f64,
    pub points_earned: u32,
    pub points_possible: u32,
    /// 答错题目的下标
    pub weak_areas: Vec<usize>,
    /// 参与计分但答案未经验证（占位答案）的题目数
    pub unverified_scored: usize,
}

impl ScoreReport {
    pub fn summary(&self) -> String {
        format!(
            "Score: {}/{} | Accuracy: {:.2}% | Grade: {:.2}/10 | Points: {}/{}",
            self.correct_count,
            self.total_questions,
            self.accuracy,
            self.grade_score,
            self.points_earned,
            self.points_possible
        )
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 计分：只比较已作答的题目，大小写敏感、完全匹配
pub fn score(questions: &[Question], points_per_question: u32) -> Result<ScoreReport, SessionError> {
    if questions.is_empty() {
        return Err(SessionError::NoQuestions);
    }

    let mut correct_count = 0;
    let mut wrong_count = 0;
    let mut unverified_scored = 0;
    let mut weak_areas = Vec::new();

    for (idx, question) in questions.iter().enumerate() {
        let Some(is_correct) = question.is_correct() else {
            continue;
        };
        if !question.answer_verified {
            unverified_scored += 1;
        }
        if is_correct {
            correct_count += 1;
        } else {
            wrong_count += 1;
            weak_areas.push(idx);
        }
    }

    let total_questions = questions.len();
    let accuracy = correct_count as f64 / total_questions as f64 * 100.0;
    let points_possible = u32::try_from(total_questions).unwrap_or(u32::MAX).saturating_mul(points_per_question);

    Ok(ScoreReport {
        total_questions,
        correct_count,
        wrong_count,
        unanswered_count: total_questions - correct_count - wrong_count,
        accuracy,
        grade_score: round2(accuracy / 100.0 * 10.0),
        points_earned: u32::try_from(correct_count).unwrap_or(u32::MAX).saturating_mul(points_per_question),
        points_possible,
        weak_areas,
        unverified_scored,
    })
}

/// 为答错的题目生成闪卡
pub fn build_flashcards(questions: &[Question], report: &ScoreReport, topic: &str) -> Vec<Flashcard> {
    report
        .weak_areas
        .iter()
        .filter_map(|&idx| questions.get(idx).map(|q| Flashcard::new(idx, topic, q)))
        .collect()
}
