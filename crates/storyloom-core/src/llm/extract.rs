//! Structured-output extraction from raw LLM text.
//!
//! Models wrap JSON in prose, fenced code blocks, or both. The extractors
//! here tolerate that: they strip a leading/trailing fence and locate the
//! first balanced JSON object or XML root element in the text. Failures
//! carry the raw text and the expected structure so callers can choose
//! between a tightened retry and failing the stage.

use crate::error::LlmError;
use serde::de::DeserializeOwned;

/// Strip a leading/trailing fenced code block (``` or ```json / ```xml).
///
/// Returns the inner text if the whole trimmed input is one fenced block;
/// otherwise returns the trimmed input unchanged.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "xml", ...) on the opening fence line.
    match body.find('\n') {
        Some(idx) => body[idx + 1..].trim(),
        None => body.trim(),
    }
}

/// Locate the first balanced JSON object in the text.
///
/// String contents and escapes are respected, so braces inside quoted
/// values do not confuse the scan.
pub fn find_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
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
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Locate the first XML root element (`<tag ...> ... </tag>`), honoring
/// nested elements of the same name.
pub fn find_xml_root(text: &str) -> Option<&str> {
    let start = text.find('<').and_then(|mut idx| {
        // Skip anything that is not an opening element (e.g. `<?xml`, `<!--`).
        loop {
            let rest = &text[idx..];
            let next = rest[1..].chars().next()?;
            if next.is_ascii_alphabetic() {
                return Some(idx);
            }
            idx += 1 + text[idx + 1..].find('<')?;
        }
    })?;

    let name_end = text[start + 1..]
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-')
        .map(|i| start + 1 + i)?;
    let name = &text[start + 1..name_end];
    if name.is_empty() {
        return None;
    }

    let open_prefix = format!("<{name}");
    let close_tag = format!("</{name}>");

    let mut depth = 0usize;
    let mut pos = start;
    while pos < text.len() {
        let rest = &text[pos..];
        let next_close = rest.find(&close_tag)?;
        match rest.find(&open_prefix) {
            Some(o) if o < next_close => {
                // Count only real opens; `<tagx` shares the prefix but is
                // a different element.
                if is_tag_boundary(rest, o, name.len()) {
                    depth += 1;
                }
                pos += o + open_prefix.len();
            }
            _ => {
                depth = depth.saturating_sub(1);
                let end = pos + next_close + close_tag.len();
                if depth == 0 {
                    return Some(&text[start..end]);
                }
                pos = end;
            }
        }
    }
    None
}

/// Whether the opening-tag match at `offset` is a real tag (followed by
/// whitespace, `>`, or `/`), not a longer name sharing the prefix.
fn is_tag_boundary(text: &str, offset: usize, name_len: usize) -> bool {
    text[offset + 1 + name_len..]
        .chars()
        .next()
        .is_some_and(|c| c.is_whitespace() || c == '>' || c == '/')
}

/// Extract and deserialize the first JSON object in the text.
///
/// `expected` describes the schema for the error path (e.g.
/// `"object with fields must, must_not, should"`).
pub fn parse_json<T: DeserializeOwned>(text: &str, expected: &str) -> Result<T, LlmError> {
    let stripped = strip_code_fence(text);
    let object = find_json_object(stripped).ok_or_else(|| LlmError::Extract {
        raw: text.to_string(),
        offset: stripped.len(),
        expected: expected.to_string(),
    })?;

    serde_json::from_str(object).map_err(|e| LlmError::Extract {
        raw: text.to_string(),
        offset: e.column(),
        expected: format!("{expected}: {e}"),
    })
}

/// Extract the first XML root element, checking it is the expected tag.
pub fn parse_xml_root<'a>(text: &'a str, expected_tag: &str) -> Result<&'a str, LlmError> {
    let stripped = strip_code_fence(text);
    let root = find_xml_root(stripped).ok_or_else(|| LlmError::Extract {
        raw: text.to_string(),
        offset: 0,
        expected: format!("<{expected_tag}> element"),
    })?;

    if !root.starts_with(&format!("<{expected_tag}"))
        || !is_tag_boundary(root, 0, expected_tag.len())
    {
        return Err(LlmError::Extract {
            raw: text.to_string(),
            offset: 0,
            expected: format!("<{expected_tag}> element"),
        });
    }
    Ok(root)
}
