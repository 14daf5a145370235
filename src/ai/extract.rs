use std::sync::LazyLock;

use regex::Regex;

static RE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("valid fence regex"));

/// Pulls one JSON object out of free-form model output.
///
/// A markdown code fence is unwrapped first; then the object is taken from the first `{` to
/// its matching `}`. Braces inside string literals are ignored. Returns the object text,
/// not a parsed value, so the caller decides which schema to apply.
pub fn extract_json(text: &str) -> Option<&str> {
    let mut text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.contains("```") {
        if let Some(inner) = RE_FENCE.captures(text).and_then(|c| c.get(1)) {
            text = inner.as_str().trim();
        }
    }

    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn fenced_object_with_chatter() {
        let text = "Here you go:\n```json\n{\"payload\": {\"x\": [1, 2]}}\n```\nAnything else?";
        assert_eq!(extract_json(text), Some(r#"{"payload": {"x": [1, 2]}}"#));
    }

    #[test]
    fn leading_prose_and_trailing_text() {
        let text = r#"Sure! {"template": "FLASH_SETORIAL", "reason": "a } in text"} thanks"#;
        assert_eq!(
            extract_json(text),
            Some(r#"{"template": "FLASH_SETORIAL", "reason": "a } in text"}"#)
        );
    }

    #[test]
    fn unbalanced_or_missing() {
        assert_eq!(extract_json(""), None);
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json(r#"{"a": {"b": 1}"#), None);
    }
}
