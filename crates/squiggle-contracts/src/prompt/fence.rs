/// Extract the animation markup from a model response.
///
/// Two-tier lookup: the first fenced block tagged `html`, then the first
/// fenced block of any kind, then the trimmed raw text unchanged. A
/// string without fences passes through, which makes the function
/// idempotent.
pub fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(body) = find_fenced_block(trimmed, Some("html")) {
        return body;
    }
    if let Some(body) = find_fenced_block(trimmed, None) {
        return body;
    }
    trimmed.to_string()
}

/// Scan for a ``` fence whose info string matches `language` (or any
/// fence when `language` is `None`) and return its trimmed body.
fn find_fenced_block(text: &str, language: Option<&str>) -> Option<String> {
    let mut cursor = 0usize;
    loop {
        let open = text[cursor..].find("```")? + cursor;
        let after_open = open + 3;
        let newline = text[after_open..].find('\n')?;
        let info = text[after_open..after_open + newline].trim();
        let body_start = after_open + newline + 1;
        let close = text[body_start..].find("```")? + body_start;

        let wanted = match language {
            Some(lang) => info.eq_ignore_ascii_case(lang),
            None => true,
        };
        if wanted {
            return Some(text[body_start..close].trim().to_string());
        }
        cursor = close + 3;
    }
}
