// JSON Extraction from Model Output
//
// Models wrap their structured answers in prose and markdown fences, and the
// prose itself often contains braces and nested code fences. A regex cannot
// find the payload reliably (greedy matches the last fence, lazy truncates at
// the first `}` inside example content), so this module uses a brace-depth
// scanner that is string- and escape-aware.
//
// The scanner walks candidates left to right: it finds an opening `{`, scans
// to the matching `}` counting depth while skipping brace characters inside
// string literals, and tries to parse the slice. An invalid candidate moves
// the scan one byte past its opening brace, so a payload nested inside
// non-JSON brace noise is still found.

use serde_json::Value;

/// Extract the first well-formed JSON object embedded in `text`.
///
/// Markdown fencing, leading prose, and trailing prose (including nested
/// triple-backtick code blocks) are all ignored; only brace balance and
/// string boundaries matter.
///
/// # Example
///
/// ```
/// use opsloop_core::extract::extract_json_object;
///
/// let reply = r#"Here is my diagnosis: {"root_cause": "OOMKilled", "confidence": 0.9} and I can dig further."#;
/// let value = extract_json_object(reply).unwrap();
/// assert_eq!(value["root_cause"], "OOMKilled");
/// ```
pub fn extract_json_object(text: &str) -> Option<Value> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find('{') {
        let open = search_from + rel;
        if let Some(end) = balanced_end(text.as_bytes(), open) {
            let candidate = &text[open..=end];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
        // Balanced-but-invalid or unterminated candidate. Resume just past
        // the opening brace so an object nested inside brace noise is found.
        search_from = open + 1;
    }
    None
}

/// Byte offset of the `}` matching the `{` at `open`, or None if the text
/// ends before the braces balance.
///
/// Braces inside string literals do not count toward depth; `\"` inside a
/// string does not end it. Structural characters are ASCII, so scanning
/// bytes is safe in UTF-8 text.
fn balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
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
                    return Some(i);
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
    use serde_json::json;

    #[test]
    fn test_bare_object() {
        let value = extract_json_object(r#"{"status": "healthy"}"#).unwrap();
        assert_eq!(value, json!({ "status": "healthy" }));
    }

    #[test]
    fn test_object_embedded_in_prose() {
        let text = r#"Based on the pod events, here is my analysis: {"root_cause": "ImagePullBackOff", "severity": "high"}. I recommend checking the registry credentials."#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["root_cause"], "ImagePullBackOff");
    }

    #[test]
    fn test_object_inside_markdown_fence() {
        let text = "Summary below.\n\n```json\n{\"finding\": \"node disk pressure\"}\n```\n";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["finding"], "node disk pressure");
    }

    #[test]
    fn test_braces_inside_string_values() {
        let text = r#"{"summary": "container exited with {code: 137}", "nested": {"ok": true}}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["summary"], "container exited with {code: 137}");
        assert_eq!(value["nested"]["ok"], true);
    }

    #[test]
    fn test_escaped_quotes_inside_strings() {
        let text = r#"{"message": "pod \"api-7d4f\" crashed", "count": 3}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["message"], r#"pod "api-7d4f" crashed"#);
    }

    // Regression: a lazy regex stops at the first `}` inside the trailing
    // example block; a greedy one runs to the last fence. The scanner must
    // return exactly the leading payload.
    #[test]
    fn test_payload_followed_by_nested_code_fences() {
        let text = concat!(
            "{\"diagnosis\": \"config drift\", \"confidence\": 0.8}\n\n",
            "For reference, a healthy manifest looks like:\n",
            "```yaml\n",
            "metadata: {name: demo}\n",
            "```\n",
            "and the generated README would contain:\n",
            "```markdown\n",
            "run `helm install {release}` then:\n",
            "```json\n",
            "{\"this\": \"is example output\"}\n",
            "```\n",
            "```\n",
        );
        let value = extract_json_object(text).unwrap();
        assert_eq!(
            value,
            json!({ "diagnosis": "config drift", "confidence": 0.8 })
        );
    }

    #[test]
    fn test_fences_nested_inside_payload_string() {
        // README-generation shape: the payload itself carries fenced content
        // with braces inside a string field.
        let readme = "# Setup\\n```bash\\nkubectl apply -f {file}\\n```\\ndone";
        let text = format!(
            "Here you go:\n```json\n{{\"readme\": \"{readme}\", \"sections\": 2}}\n```"
        );
        let value = extract_json_object(&text).unwrap();
        assert_eq!(value["sections"], 2);
        assert!(value["readme"].as_str().unwrap().contains("kubectl apply"));
    }

    #[test]
    fn test_payload_after_brace_noise() {
        let text = r#"The pod is stuck in {CrashLoopBackOff} right now: {"restarts": 12}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["restarts"], 12);
    }

    #[test]
    fn test_payload_nested_inside_invalid_outer_braces() {
        let text = r#"{oops {"answer": 42} trailing}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["answer"], 42);
    }

    #[test]
    fn test_no_object_returns_none() {
        assert!(extract_json_object("no structured content here").is_none());
        assert!(extract_json_object("").is_none());
    }

    #[test]
    fn test_unbalanced_returns_none() {
        assert!(extract_json_object(r#"{"truncated": "mid"#).is_none());
    }

    #[test]
    fn test_balanced_but_malformed_returns_none() {
        assert!(extract_json_object("{not valid json}").is_none());
    }

    #[test]
    fn test_unicode_text_around_payload() {
        let text = "结论如下 → {\"ok\": true} ←";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["ok"], true);
    }
}
