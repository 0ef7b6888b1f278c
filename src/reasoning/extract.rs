//! JSON extraction from reasoning-backend responses.
//!
//! Models wrap JSON in markdown fences or surround it with prose more
//! often than they return it bare. This strips the wrapping before the
//! caller hands the payload to serde.

/// Extract the JSON document embedded in `raw`, tolerating markdown code
/// fences (with or without a language tag) and leading/trailing prose.
/// Returns `None` when no brace-delimited payload is present at all.
pub fn extract_json(raw: &str) -> Option<&str> {
    if let Some(inner) = fenced_block(raw) {
        return slice_braces(inner).or(Some(inner));
    }
    slice_braces(raw)
}

/// Content of the first fenced code block, language tag stripped.
fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    // The fence line may carry a language tag ("json"); skip to the newline.
    let body = match after.find('\n') {
        Some(i) => &after[i + 1..],
        None => after,
    };
    let end = body.find("```")?;
    let inner = body[..end].trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner)
    }
}

/// Narrow to the outermost `{...}` or `[...]` span.
fn slice_braces(s: &str) -> Option<&str> {
    let start = s.find(['{', '['])?;
    let end = s.rfind(['}', ']'])?;
    if end > start {
        Some(s[start..=end].trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{"overall_health_score": 85.0, "anomalies": []}"#;

    #[test]
    fn test_bare_json_passes_through() {
        assert_eq!(extract_json(PAYLOAD), Some(PAYLOAD));
    }

    #[test]
    fn test_fenced_with_language_tag() {
        let raw = format!("```json\n{PAYLOAD}\n```");
        let got = extract_json(&raw).unwrap();
        let v: serde_json::Value = serde_json::from_str(got).unwrap();
        assert_eq!(v["overall_health_score"], 85.0);
    }

    #[test]
    fn test_fenced_without_language_tag() {
        let raw = format!("```\n{PAYLOAD}\n```");
        assert!(extract_json(&raw).is_some());
        serde_json::from_str::<serde_json::Value>(extract_json(&raw).unwrap()).unwrap();
    }

    #[test]
    fn test_noisy_prefix_and_suffix() {
        let raw = format!("Here is the analysis you asked for:\n\n{PAYLOAD}\n\nLet me know if you need more detail.");
        assert_eq!(extract_json(&raw), Some(PAYLOAD));
    }

    #[test]
    fn test_prose_around_fence() {
        let raw = format!("Sure! The result is:\n```json\n{PAYLOAD}\n```\nHope that helps.");
        let got = extract_json(&raw).unwrap();
        serde_json::from_str::<serde_json::Value>(got).unwrap();
    }

    #[test]
    fn test_no_json_at_all() {
        assert_eq!(extract_json("I could not produce an analysis."), None);
        assert_eq!(extract_json(""), None);
    }

    #[test]
    fn test_array_payload() {
        let raw = "results: [1, 2, 3] end";
        assert_eq!(extract_json(raw), Some("[1, 2, 3]"));
    }
}
