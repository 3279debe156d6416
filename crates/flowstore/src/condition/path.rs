//! Field paths into a JSON payload.
//!
//! Accepts dot and bracket notation with an optional `$` root:
//! `$.order.lines[0].sku`, `customer['first name']`, `tags[2]`.

use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed path into a payload document.
///
/// # Example
///
/// ```
/// use flowstore::condition::FieldPath;
/// use serde_json::json;
///
/// let path = FieldPath::parse("$.lines[1].sku").unwrap();
/// let payload = json!({"lines": [{"sku": "a"}, {"sku": "b"}]});
/// assert_eq!(path.resolve(&payload), Some(&json!("b")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parse a path, failing with [`Error::MalformedCondition`] on bad syntax.
    pub fn parse(raw: &str) -> Result<Self> {
        let malformed = |reason: &str| Error::MalformedCondition(format!("path {raw:?}: {reason}"));

        let mut rest = raw.trim();
        if let Some(stripped) = rest.strip_prefix('$') {
            rest = stripped;
            if let Some(stripped) = rest.strip_prefix('.') {
                rest = stripped;
                if rest.is_empty() {
                    return Err(malformed("trailing '.'"));
                }
            }
        } else if rest.is_empty() {
            return Err(malformed("empty path"));
        }

        let mut segments = Vec::new();
        let chars: Vec<char> = rest.chars().collect();
        let mut i = 0;
        let mut key = String::new();
        // Set after a closing bracket, where a bare key may not follow directly.
        let mut after_bracket = false;

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    if key.is_empty() && !after_bracket {
                        return Err(malformed("empty segment"));
                    }
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    if i + 1 == chars.len() {
                        return Err(malformed("trailing '.'"));
                    }
                    after_bracket = false;
                    i += 1;
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    let close = chars[i..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|offset| i + offset)
                        .ok_or_else(|| malformed("unterminated '['"))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    segments.push(parse_bracket(&inner).ok_or_else(|| malformed("bad bracket"))?);
                    after_bracket = true;
                    i = close + 1;
                }
                ']' => return Err(malformed("unexpected ']'")),
                c => {
                    if after_bracket {
                        return Err(malformed("missing '.' after ']'"));
                    }
                    key.push(c);
                    i += 1;
                }
            }
        }
        if !key.is_empty() {
            segments.push(Segment::Key(key));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The path as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Resolve the path against a payload. Returns `None` when any segment is
    /// missing or applied to the wrong kind of value.
    pub fn resolve<'v>(&self, payload: &'v Value) -> Option<&'v Value> {
        self.segments
            .iter()
            .try_fold(payload, |value, segment| match (segment, value) {
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Index(index), Value::Array(items)) => items.get(*index),
                _ => None,
            })
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_bracket(inner: &str) -> Option<Segment> {
    let inner = inner.trim();
    for quote in ['\'', '"'] {
        if let Some(key) = inner
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Some(Segment::Key(key.to_string()));
        }
    }
    inner.parse().ok().map(Segment::Index)
}
