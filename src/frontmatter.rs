//! Front matter extraction.
//!
//! Splits a Markdown document into its leading `---` delimited YAML block and
//! the body text that follows. A missing block is not an error. A block that
//! fails to parse degrades to an empty mapping and the full original text, so
//! one malformed post never stops an indexing run.

use std::collections::BTreeMap;
use std::path::Path;

const DELIMITER: &str = "---";

/// A single front matter value after typing rules are applied.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontValue {
    Null,
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl FrontValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FrontValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

pub type FrontMatter = BTreeMap<String, FrontValue>;

/// Result of splitting a document.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub front_matter: FrontMatter,
    pub body: String,
    /// Set when a delimited block was found but could not be parsed.
    pub parse_error: Option<String>,
}

impl ParsedDocument {
    /// Declared, non-empty string value for `key`.
    pub fn declared(&self, key: &str) -> Option<&str> {
        self.front_matter
            .get(key)
            .and_then(FrontValue::as_text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Split raw document text into front matter and body.
pub fn parse(raw: &str) -> ParsedDocument {
    let Some((block, rest)) = split_block(raw) else {
        return ParsedDocument {
            front_matter: FrontMatter::new(),
            body: raw.to_string(),
            parse_error: None,
        };
    };

    match parse_block(block) {
        Ok(front_matter) => ParsedDocument {
            front_matter,
            body: rest.trim().to_string(),
            parse_error: None,
        },
        Err(e) => ParsedDocument {
            front_matter: FrontMatter::new(),
            body: raw.to_string(),
            parse_error: Some(e),
        },
    }
}

/// Locate the delimited block. Returns `(block, rest)` or `None` when the
/// document does not open with a delimiter line or never closes it.
fn split_block(raw: &str) -> Option<(&str, &str)> {
    let text = raw.strip_prefix('\u{feff}').unwrap_or(raw);

    let mut lines = text.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != DELIMITER {
        return None;
    }

    let block_start = first.len();
    let mut offset = block_start;
    for line in lines {
        if line.trim() == DELIMITER {
            let block = &text[block_start..offset];
            let rest = &text[offset + line.len()..];
            return Some((block, rest));
        }
        offset += line.len();
    }
    None
}

fn parse_block(block: &str) -> Result<FrontMatter, String> {
    if block.trim().is_empty() {
        return Ok(FrontMatter::new());
    }

    let value: serde_yaml::Value = serde_yaml::from_str(block).map_err(|e| e.to_string())?;
    let mapping = match value {
        serde_yaml::Value::Mapping(m) => m,
        serde_yaml::Value::Null => return Ok(FrontMatter::new()),
        other => {
            return Err(format!(
                "front matter is not a key/value mapping (found {})",
                yaml_kind(&other)
            ))
        }
    };

    let mut out = FrontMatter::new();
    for (key, value) in mapping {
        let Some(key) = scalar_text(&key) else {
            return Err("front matter contains a non-scalar key".to_string());
        };
        out.insert(key, type_value(value));
    }
    Ok(out)
}

fn type_value(value: serde_yaml::Value) -> FrontValue {
    use serde_yaml::Value;

    match value {
        Value::Null => FrontValue::Null,
        Value::Bool(b) => FrontValue::Bool(b),
        Value::String(s) => type_text(&s),
        Value::Number(n) => FrontValue::Text(n.to_string()),
        Value::Sequence(items) => FrontValue::List(
            items
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| scalar_text(v).unwrap_or_else(|| compact(v)))
                .collect(),
        ),
        Value::Tagged(tagged) => type_value(tagged.value),
        nested @ Value::Mapping(_) => FrontValue::Text(compact(&nested)),
    }
}

fn type_text(s: &str) -> FrontValue {
    let s = strip_quotes(s.trim());
    if s.eq_ignore_ascii_case("true") {
        FrontValue::Bool(true)
    } else if s.eq_ignore_ascii_case("false") {
        FrontValue::Bool(false)
    } else {
        FrontValue::Text(s.to_string())
    }
}

fn strip_quotes(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn scalar_text(value: &serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value;

    match value {
        Value::String(s) => Some(strip_quotes(s.trim()).to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
        _ => None,
    }
}

/// Nested structures are kept as compact JSON text.
fn compact(value: &serde_yaml::Value) -> String {
    serde_json::to_string(value)
        .or_else(|_| serde_yaml::to_string(value).map(|s| s.trim().to_string()))
        .unwrap_or_default()
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    use serde_yaml::Value;

    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Title for a document: the declared title, then the first Markdown
/// heading in the body, then the file's base name.
pub fn resolve_title(parsed: &ParsedDocument, path: &str) -> String {
    if let Some(title) = parsed.declared("title") {
        return title.to_string();
    }
    if let Some(heading) = first_heading(&parsed.body) {
        return heading;
    }
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .filter(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim())
        .find(|text| !text.is_empty())
        .map(str::to_string)
}
