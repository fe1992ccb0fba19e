//! Lenient JSON extraction from model replies
//!
//! Models wrap JSON in prose, markdown fences, or both. Parsing tries the
//! reply as-is first, then every balanced `{...}` / `[...]` span in order of
//! appearance until one parses.

use serde_json::Value;

use crate::log_debug;

/// Parse a model reply into a JSON value, tolerating surrounding text
pub fn parse_json_value(response: &str) -> Result<Value, String> {
    let trimmed = strip_code_fence(response.trim());

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let mut first_error = None;
    for candidate in balanced_spans(trimmed) {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => {
                log_debug!("Extracted JSON span of {} chars from reply", candidate.len());
                return Ok(value);
            }
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    Err(match first_error {
        Some(e) => format!("found a JSON-like span but it is not valid JSON: {e}"),
        None if trimmed.is_empty() => "the reply was empty".to_string(),
        None => "no JSON object or array found in the reply".to_string(),
    })
}

/// First balanced JSON object or array in `text`, if any
pub fn extract_json(text: &str) -> Option<&str> {
    balanced_spans(text).next()
}

/// Remove a surrounding markdown code fence (```json ... ```)
pub fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening fence line.
    match body.find('\n') {
        Some(newline) if !body[..newline].trim_start().starts_with(['{', '[']) => {
            body[newline + 1..].trim()
        }
        _ => body.trim(),
    }
}

/// Iterate over balanced bracket spans, starting at each opener in turn
fn balanced_spans(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|(_, c)| matches!(c, '{' | '['))
        .filter_map(move |(start, _)| scan_balanced(text, start).map(|end| &text[start..=end]))
}

/// Byte index of the bracket closing the one at `start`, honoring strings
fn scan_balanced(text: &str, start: usize) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}
