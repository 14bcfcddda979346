pub mod parser;
pub mod scoring;
pub mod session;

pub use scoring::ScoreReport;
pub use session::{QuestionBank, QuizSession, SessionState, SessionStatus, generate_quiz};
