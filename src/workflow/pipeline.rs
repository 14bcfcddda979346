use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::app::AppConfig;
use crate::ask_llm::{GenerationRequest, GenerationService, OpenAiGenerationService, Retrying};
use crate::error::GenerationError;
use crate::export::{flashcards_json, flashcards_text, question_bank_json, question_bank_text};
use crate::extract::extract_text;
use crate::model::{Question, QuizParameters};
use crate::prompt::{build_prompt, build_system_message};
use crate::quiz::{ScoreReport, SessionState, generate_quiz};

/// 入口：读取密钥、组装生成服务，从标准输入答题
pub async fn run(app_config: AppConfig) -> Result<()> {
    let api_key = app_config.llm.credential()?;
    let client = OpenAiGenerationService::new(app_config.llm.llm_config(api_key));
    let service = Retrying::new(client, app_config.llm.retry_policy());

    let mut state = SessionState::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    let cancel = || async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("无法监听 Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    run_with(&app_config, &service, &mut stdin, &mut state, cancel).await?;
    Ok(())
}

/// 完整流程：校验 → 提取资料 → 生成 → 答题 → 计分 → 导出，可连续多轮。
/// cancel 每次调用返回一个新的取消信号，生成和每次读取输入都会与它竞争
pub async fn run_with<S, R, F, C>(
    app_config: &AppConfig,
    service: &S,
    input: &mut R,
    state: &mut SessionState,
    cancel: F,
) -> Result<ScoreReport>
where
    S: GenerationService,
    R: AsyncBufRead + Unpin,
    F: Fn() -> C,
    C: Future<Output = ()>,
{
    let params = &app_config.quiz;
    params.validate()?;

    for custom in &app_config.custom_questions {
        if let Err(e) = state.question_bank.add(&custom.question, &custom.answer, custom.kind) {
            warn!("⚠️ 跳过自定义题目: {}", e);
        }
    }

    let source_text = match (&app_config.upload_path, app_config.use_uploaded) {
        (Some(path), true) => {
            let material = extract_text(path).await;
            debug!("资料 {} 类型 {:?}，{} 字符", path.display(), material.kind, material.text.len());
            if let Some(warning) = &material.warning {
                println!("⚠️ {}，将根据参数生成题目", warning);
            }
            (!material.is_empty()).then_some(material.text)
        }
        _ => None,
    };

    let request = GenerationRequest {
        prompt: build_prompt(params, source_text.as_deref(), app_config.use_uploaded),
        system_message: Some(build_system_message(params)),
        requested_count: params.requested_count as usize,
    };
    debug!("Prompt: {}", request.prompt);

    let mut round = 1;
    loop {
        let (report, interrupted) = run_round(params, service, &request, input, state, &cancel).await?;
        export_all(app_config, state)?;
        if interrupted {
            info!("🛑 用户中断，结束测验");
            return Ok(report);
        }

        println!("\nStart another quiz? [y/N]");
        match read_input(input, None, cancel()).await? {
            Input::Line(line) if line.trim().eq_ignore_ascii_case("y") => {}
            _ => return Ok(report),
        }
        state.reset();
        round += 1;
        info!("{}", "=".repeat(60));
        info!("🔁 第 {} 轮", round);
    }
}

/// 生成并完成一轮测验；返回成绩以及作答是否被用户中断
async fn run_round<S, R, F, C>(
    params: &QuizParameters,
    service: &S,
    request: &GenerationRequest,
    input: &mut R,
    state: &mut SessionState,
    cancel: &F,
) -> Result<(ScoreReport, bool)>
where
    S: GenerationService,
    R: AsyncBufRead + Unpin,
    F: Fn() -> C,
    C: Future<Output = ()>,
{
    info!("🧪 正在生成 {} 道题目...", params.requested_count);
    let fallback_kind = params.distinct_types()[0];
    let questions = tokio::select! {
        biased;
        _ = cancel() => {
            warn!("生成被用户取消");
            Err(GenerationError::Cancelled)
        }
        result = generate_quiz(service, request, fallback_kind) => result,
    }?;

    let quiz = state.start_quiz(params.clone(), questions);
    println!("📝 Quiz ({} questions, generated {})", quiz.questions().len(), quiz.timestamp());

    let interrupted = collect_answers(state, input, params, cancel).await?;
    let report = state.submit()?;
    print_report(state);
    Ok((report, interrupted))
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

enum Input {
    Line(String),
    Eof,
    TimedOut,
    Cancelled,
}

/// 读一行输入，可选超时，并与取消信号竞争
async fn read_input<R, C>(reader: &mut R, limit: Option<Duration>, cancel: C) -> Result<Input>
where
    R: AsyncBufRead + Unpin,
    C: Future<Output = ()>,
{
    let mut line = String::new();
    let outcome = {
        let read = async {
            match limit {
                Some(limit) => timeout(limit, reader.read_line(&mut line)).await.ok(),
                None => Some(reader.read_line(&mut line).await),
            }
        };
        tokio::select! {
            biased;
            _ = cancel => return Ok(Input::Cancelled),
            outcome = read => outcome,
        }
    };

    Ok(match outcome {
        None => Input::TimedOut,
        Some(read) => match read? {
            0 => Input::Eof,
            _ => Input::Line(line),
        },
    })
}

/// 逐题读取答案；单题超时跳过，总时长用完后停止，空行表示跳过。
/// 返回 true 表示用户中断了作答
async fn collect_answers<R, F, C>(
    state: &mut SessionState,
    reader: &mut R,
    params: &QuizParameters,
    cancel: &F,
) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
    F: Fn() -> C,
    C: Future<Output = ()>,
{
    let per_question = non_zero_secs(params.per_question_duration_secs);
    let deadline = non_zero_secs(params.total_duration_secs).map(|d| Instant::now() + d);

    let questions: Vec<Question> = state.quiz_mut()?.questions().to_vec();
    let mut interrupted = false;

    for (idx, question) in questions.iter().enumerate() {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        if remaining == Some(Duration::ZERO) {
            println!("⏰ Time is up!");
            break;
        }
        let limit = match (per_question, remaining) {
            (Some(q), Some(r)) => Some(q.min(r)),
            (q, r) => q.or(r),
        };

        print_question(idx, question);

        match read_input(reader, limit, cancel()).await? {
            Input::Line(line) if line.trim().is_empty() => continue,
            Input::Line(line) => {
                state.record_answer(idx, &line)?;
            }
            Input::TimedOut => {
                println!("⏰ Time limit reached, skipping question {}", idx + 1);
            }
            Input::Eof => {
                debug!("输入结束，停止作答");
                break;
            }
            Input::Cancelled => {
                println!("🛑 Quiz interrupted, submitting the answers so far");
                interrupted = true;
                break;
            }
        }
    }

    if let Some(quiz) = state.quiz() {
        let answered = quiz.questions().iter().filter(|q| q.is_answered()).count();
        info!("共作答 {}/{} 道题", answered, quiz.questions().len());
    }
    Ok(interrupted)
}

fn print_question(idx: usize, question: &Question) {
    println!("\nQ{}: {}", idx + 1, question.text);
    if question.options.is_empty() {
        println!("   ({})", question.kind);
    }
    for (i, option) in question.options.iter().enumerate() {
        println!("   {}) {}", (b'A' + i as u8) as char, option);
    }
}

fn print_report(state: &SessionState) {
    let Some(quiz) = state.quiz() else {
        return;
    };
    let Some(report) = quiz.report() else {
        return;
    };
    println!("\n🚀 {}", report.summary());
    if report.unverified_scored > 0 {
        println!(
            "⚠️ {} answers were checked against placeholder keys; the score is not meaningful.",
            report.unverified_scored
        );
    }
    for &idx in &report.weak_areas {
        if let Some(q) = quiz.questions().get(idx) {
            println!("   ✗ Q{}: {} (answer: {})", idx + 1, q.text, q.correct_answer);
        }
    }
}

fn export_all(app_config: &AppConfig, state: &SessionState) -> Result<()> {
    let mut payloads = vec![question_bank_text(state.quiz())?];
    if !state.question_bank.is_empty() {
        payloads.push(question_bank_json(&state.question_bank)?);
    }
    if state.flashcards().is_empty() {
        info!("没有错题，不导出闪卡");
    } else {
        payloads.push(flashcards_text(state.flashcards())?);
        payloads.push(flashcards_json(state.flashcards())?);
    }

    for payload in payloads {
        let path = payload.write_to(&app_config.output_dir)?;
        debug!("{} -> {}", path.display(), payload.data_uri());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::CustomQuestion;
    use crate::ask_llm::tests::ScriptedService;
    use crate::error::{ServiceError, ValidationError};
    use crate::model::QuestionType;
    use crate::quiz::SessionStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;

    const STRUCTURED: &str = r#"{"questions": [
        {"type": "MCQ", "question": "1/2 + 1/4 = ?", "options": ["1/4", "3/4", "2/6", "1"], "answer": "3/4"},
        {"type": "MCQ", "question": "Which equals 2/4?", "options": ["1/2", "1/3", "3/4", "2/3"], "answer": "A"},
        {"type": "Short Answer", "question": "Simplify 6/9", "answer": "2/3"}
    ]}"#;

    fn config(dir: &std::path::Path) -> AppConfig {
        AppConfig {
            output_dir: dir.to_path_buf(),
            quiz: QuizParameters {
                requested_count: 3,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_run_scores_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.custom_questions.push(CustomQuestion {
            question: "What is 3/4 as a decimal?".to_string(),
            answer: "0.75".to_string(),
            kind: QuestionType::ShortAnswer,
        });
        let service = ScriptedService::ok(STRUCTURED);
        let mut state = SessionState::new();
        let mut answers: &[u8] = b"b\nc\n2/3\n";

        let report = run_with(&cfg, &service, &mut answers, &mut state, std::future::pending::<()>)
            .await
            .unwrap();

        assert_eq!(report.correct_count, 2);
        assert_eq!(report.wrong_count, 1);
        assert_eq!(report.weak_areas, vec![1]);
        assert_eq!(state.quiz().unwrap().status(), SessionStatus::Submitted);
        assert_eq!(state.flashcards().len(), 1);
        assert_eq!(state.flashcards()[0].back, "1/2");

        for file in ["question_bank.txt", "question_bank.json", "flashcards.txt", "flashcards.json"] {
            assert!(dir.path().join(file).exists(), "缺少导出文件 {}", file);
        }

        let calls = service.calls.lock().unwrap();
        assert!(calls[0].prompt.starts_with("Generate 3 MCQ questions for grade 8"));
        assert!(calls[0].system_message.as_deref().unwrap().contains("exactly 3 questions"));
    }

    #[tokio::test]
    async fn test_skipped_and_missing_answers_stay_unanswered() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScriptedService::ok(STRUCTURED);
        let mut state = SessionState::new();
        let mut answers: &[u8] = b"\nA\n";

        let report = run_with(&config(dir.path()), &service, &mut answers, &mut state, std::future::pending::<()>)
            .await
            .unwrap();

        assert_eq!(report.unanswered_count, 2);
        assert_eq!(report.correct_count, 1);
        assert!(!dir.path().join("flashcards.txt").exists());
        assert!(!dir.path().join("question_bank.json").exists());
    }

    #[tokio::test]
    async fn test_second_round_resets_deck() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScriptedService::new(vec![Ok(STRUCTURED.to_string()), Ok(STRUCTURED.to_string())]);
        let mut state = SessionState::new();
        let mut answers: &[u8] = b"b\nc\n2/3\ny\nA\nA\nA\n";

        let report = run_with(&config(dir.path()), &service, &mut answers, &mut state, std::future::pending::<()>)
            .await
            .unwrap();

        assert_eq!(service.call_count(), 2);
        assert_eq!(report.correct_count, 1);
        assert_eq!(report.weak_areas, vec![0, 2]);
        assert_eq!(state.flashcards().len(), 2);
    }

    #[tokio::test]
    async fn test_validation_blocks_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.quiz.question_types.clear();
        let service = ScriptedService::ok(STRUCTURED);
        let mut state = SessionState::new();
        let mut answers: &[u8] = b"";

        let err = run_with(&cfg, &service, &mut answers, &mut state, std::future::pending::<()>)
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<ValidationError>(), Some(&ValidationError::NoQuestionTypes));
        assert_eq!(service.call_count(), 0);
        assert!(state.quiz().is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_generation_completes() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScriptedService::ok(STRUCTURED);
        let mut state = SessionState::new();
        let mut answers: &[u8] = b"";

        let err = run_with(&config(dir.path()), &service, &mut answers, &mut state, || std::future::ready(()))
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<GenerationError>(), Some(&GenerationError::Cancelled));
        assert!(state.quiz().is_none());
    }

    #[tokio::test]
    async fn test_service_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScriptedService::new(vec![Err(ServiceError::Auth("invalid_api_key".to_string()))]);
        let mut state = SessionState::new();
        let mut answers: &[u8] = b"";

        let err = run_with(&config(dir.path()), &service, &mut answers, &mut state, std::future::pending::<()>)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GenerationError>(),
            Some(GenerationError::ServiceFailure(ServiceError::Auth(_)))
        ));
        assert!(err.to_string().contains("invalid_api_key"));
    }

    #[tokio::test]
    async fn test_unsupported_upload_falls_back_to_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let upload = dir.path().join("notes.txt");
        std::fs::write(&upload, "plain text notes").unwrap();
        let mut cfg = config(dir.path());
        cfg.upload_path = Some(upload);
        cfg.use_uploaded = true;
        let service = ScriptedService::ok("Q1\nQ2\nQ3");
        let mut state = SessionState::new();
        let mut answers: &[u8] = b"A\nA\nA\n";

        let report = run_with(&cfg, &service, &mut answers, &mut state, std::future::pending::<()>)
            .await
            .unwrap();

        assert!(service.calls.lock().unwrap()[0].prompt.starts_with("Generate 3"));
        assert_eq!(report.correct_count, 3);
        assert_eq!(report.unverified_scored, 3);
    }

    fn started_quiz(per_question_secs: u64, total_secs: u64) -> (SessionState, QuizParameters) {
        let params = QuizParameters {
            requested_count: 3,
            per_question_duration_secs: per_question_secs,
            total_duration_secs: total_secs,
            ..Default::default()
        };
        let mut state = SessionState::new();
        state.start_quiz(
            params.clone(),
            vec![
                Question::with_placeholders("Q1"),
                Question::with_placeholders("Q2"),
                Question::with_placeholders("Q3"),
            ],
        );
        (state, params)
    }

    fn user_answers(state: &SessionState) -> Vec<Option<String>> {
        state.quiz().unwrap().questions().iter().map(|q| q.user_answer.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_question_timeout_moves_to_next_question() {
        let (mut state, params) = started_quiz(30, 0);
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = BufReader::new(server);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            client.write_all(b"A\nB\n").await.unwrap();
        });

        let interrupted = collect_answers(&mut state, &mut reader, &params, &std::future::pending::<()>)
            .await
            .unwrap();

        assert!(!interrupted);
        assert_eq!(
            user_answers(&state),
            vec![None, Some("Option A".to_string()), Some("Option B".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_duration_stops_asking() {
        let (mut state, params) = started_quiz(0, 60);
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"A\n").await.unwrap();
        let mut reader = BufReader::new(server);
        let started = Instant::now();

        collect_answers(&mut state, &mut reader, &params, &std::future::pending::<()>)
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(user_answers(&state), vec![Some("Option A".to_string()), None, None]);
        drop(client);
    }

    #[tokio::test]
    async fn test_cancel_stops_unlimited_answering() {
        let (mut state, params) = started_quiz(0, 0);
        let (client, server) = tokio::io::duplex(64);
        let mut reader = BufReader::new(server);

        let interrupted = collect_answers(&mut state, &mut reader, &params, &|| std::future::ready(()))
            .await
            .unwrap();

        assert!(interrupted);
        assert_eq!(user_answers(&state), vec![None, None, None]);
        drop(client);
    }

    #[tokio::test]
    async fn test_cancel_during_answers_submits_and_ends_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.quiz.per_question_duration_secs = 0;
        cfg.quiz.total_duration_secs = 0;
        let service = ScriptedService::new(vec![Ok(STRUCTURED.to_string()), Ok(STRUCTURED.to_string())]);
        let mut state = SessionState::new();
        let (client, server) = tokio::io::duplex(64);
        let mut input = BufReader::new(server);

        // 第一次是生成阶段，不触发；之后的读取立即被取消
        let calls = AtomicUsize::new(0);
        let cancel = || {
            let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    std::future::pending::<()>().await;
                }
            }
        };

        let report = run_with(&cfg, &service, &mut input, &mut state, cancel).await.unwrap();

        assert_eq!(report.unanswered_count, 3);
        assert_eq!(service.call_count(), 1);
        assert_eq!(state.quiz().unwrap().status(), SessionStatus::Submitted);
        assert!(dir.path().join("question_bank.txt").exists());
        drop(client);
    }
}
