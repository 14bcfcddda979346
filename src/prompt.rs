use crate::model::QuizParameters;

/// 构建发送给生成服务的 prompt
///
/// 选择使用上传资料且资料非空时，直接返回资料原文；否则根据参数合成指令。
pub fn build_prompt(params: &QuizParameters, source_text: Option<&str>, use_source: bool) -> String {
    if use_source {
        if let Some(text) = source_text.filter(|t| !t.trim().is_empty()) {
            return text.to_string();
        }
    }

    format!(
        "Generate {} {} questions for grade {}, subject {}, topic {}.",
        params.requested_count,
        params.types_list(),
        params.grade,
        params.subject,
        params.topic
    )
}

/// 系统消息：要求模型按固定 JSON 结构返回，题目数量、题型、年级都写在这里
pub fn build_system_message(params: &QuizParameters) -> String {
    format!(
        r#"You are a school teacher writing quiz questions for grade {grade} students (subject: {subject}, topic: {topic}).

Return ONLY a JSON object, without markdown fences or commentary, in exactly this shape:
{{
  "questions": [
    {{
      "type": "MCQ",
      "question": "question text",
      "options": ["first option", "second option", "third option", "fourth option"],
      "answer": "the option text that is correct"
    }}
  ]
}}

Rules:
1. Produce exactly {count} questions.
2. Allowed types: {types}.
3. MCQ questions have exactly 4 options; True/False questions use the options ["True", "False"].
4. Fill in the Blank and Short Answer questions may omit "options", but must include "answer".
5. "answer" must be copied verbatim from "options" whenever options are present.
6. Evaluation strictness is {strictness}/5: the higher it is, the closer the distractors and the more precise the expected answers."#,
        grade = params.grade,
        subject = params.subject,
        topic = params.topic,
        count = params.requested_count,
        types = params.types_list(),
        strictness = params.evaluation_strictness,
    )
}
