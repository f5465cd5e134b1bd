//! Balanced-object scanning used by the recovery stage

/// Find balanced `{...}` substrings in `text`, in order of their opening
/// brace, trying at most `max_starts` opening braces.
///
/// Braces inside JSON string literals (including escaped quotes) do not count
/// toward nesting once a candidate has started. Unbalanced starts are skipped.
pub fn balanced_objects(text: &str, max_starts: usize) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();

    let starts = bytes
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'{')
        .map(|(i, _)| i)
        .take(max_starts);

    for start in starts {
        if let Some(end) = matching_brace(bytes, start) {
            found.push(&text[start..=end]);
        }
    }

    found
}

/// Index of the brace closing the object that opens at `start`
fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
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
    fn test_no_braces() {
        assert!(balanced_objects("plain text", 16).is_empty());
    }

    #[test]
    fn test_single_object_in_prose() {
        let text = r#"Sure! Here it is: {"a": 1} Hope that helps."#;
        assert_eq!(balanced_objects(text, 16)[0], r#"{"a": 1}"#);
    }

    #[test]
    fn test_nested_object_outer_first() {
        let text = r#"x {"a": {"b": 2}} y"#;
        let found = balanced_objects(text, 16);
        assert_eq!(found, vec![r#"{"a": {"b": 2}}"#, r#"{"b": 2}"#]);
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let text = r#"{"answer": "use {curly} and \"}\" here", "n": 1}"#;
        assert_eq!(balanced_objects(text, 1), vec![text]);
    }

    #[test]
    fn test_unbalanced_start_skipped() {
        let text = r#"{ broken {"ok": true}"#;
        assert_eq!(balanced_objects(text, 16), vec![r#"{"ok": true}"#]);
    }

    #[test]
    fn test_max_starts_bounds_scan() {
        let text = "{a} {b} {c}";
        assert_eq!(balanced_objects(text, 2), vec!["{a}", "{b}"]);
    }

    #[test]
    fn test_multibyte_text() {
        let text = "réponse: {\"é\": \"ü\"} fin";
        assert_eq!(balanced_objects(text, 16), vec!["{\"é\": \"ü\"}"]);
    }
}
