/// 清理文件名中的非法字符
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// 清理 LLM 返回的 JSON 字符串，去除 markdown 代码块标记
pub fn clean_json_string(input: &str) -> &str {
    // 1. ```json ... ```
    if let Some(start) = input.find("```json") {
        let start_index = start + 7;
        if let Some(end_offset) = input[start_index..].rfind("```") {
            return input[start_index..start_index + end_offset].trim();
        }
    }

    // 2. 普通的 ``` ... ```
    if let Some(start) = input.find("```") {
        let start_index = start + 3;
        if let Some(end_offset) = input[start_index..].rfind("```") {
            return input[start_index..start_index + end_offset].trim();
        }
    }

    // 3. 第一个 { / [ 到最后一个 } / ]
    let open = input.find(['{', '[']);
    let close = input.rfind(['}', ']']);
    if let (Some(start), Some(end)) = (open, close) {
        if start < end {
            return input[start..=end].trim();
        }
    }

    input.trim()
}
