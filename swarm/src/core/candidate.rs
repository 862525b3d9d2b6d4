//! Normalization of replacement code returned by the code transformer.

const FENCE: &str = "```";

/// Strip a surrounding fenced code block (with or without a language tag).
///
/// Text without a fence is returned as-is apart from newline normalization.
/// The result always ends with exactly one trailing newline unless empty.
pub fn extract_code(raw: &str) -> String {
    let body = match raw.find(FENCE) {
        Some(open) => {
            let after_open = &raw[open + FENCE.len()..];
            // Skip the language tag on the opening line.
            let inner = match after_open.find('\n') {
                Some(newline) => &after_open[newline + 1..],
                None => "",
            };
            match inner.find(FENCE) {
                Some(close) => &inner[..close],
                None => inner,
            }
        }
        None => raw,
    };

    let body = body.trim_start_matches(['\n', '\r']).trim_end();
    if body.is_empty() {
        return String::new();
    }
    format!("{body}\n")
}

/// Extract code and reject degenerate output (empty or shorter than
/// `min_chars` non-whitespace-trimmed characters).
pub fn accept_candidate(raw: &str, min_chars: usize) -> Option<String> {
    let code = extract_code(raw);
    if code.trim().chars().count() < min_chars {
        return None;
    }
    Some(code)
}
