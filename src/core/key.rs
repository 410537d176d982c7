use crate::domain::model::Record;
use crate::utils::error::{MonitError, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([^{}#]+)(?:#(\d+))?\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field { path: String, token: Option<usize> },
}

/// Key template such as
/// `PRODUCTION{data.task}/{data.meta_data.host}-{data.Args#1}-log.tar.gz`.
///
/// `{path}` is replaced by the string or number at `path`; `{path#N}` by the
/// N-th whitespace separated token of that string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(raw) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            push_literal(&mut segments, raw, &raw[last..whole.start])?;

            let path = caps[1].trim().to_string();
            let token = caps
                .get(2)
                .map(|m| m.as_str().parse::<usize>())
                .transpose()
                .map_err(|_| template_error(raw, "token index is too large"))?;
            segments.push(Segment::Field { path, token });
            last = whole.end;
        }
        push_literal(&mut segments, raw, &raw[last..])?;

        if !segments.iter().any(|s| matches!(s, Segment::Field { .. })) {
            return Err(template_error(raw, "template has no {field} placeholder"));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn render(&self, record: &Record) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { path, token } => {
                    let value = record
                        .get_path(path)
                        .and_then(scalar_to_key)
                        .ok_or_else(|| {
                            MonitError::matching(format!("field '{}' is missing or empty", path))
                        })?;
                    match token {
                        None => out.push_str(&value),
                        Some(n) => {
                            let part = value.split_whitespace().nth(*n).ok_or_else(|| {
                                MonitError::matching(format!(
                                    "field '{}' has no token #{} (value: '{}')",
                                    path, n, value
                                ))
                            })?;
                            out.push_str(part);
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

fn push_literal(segments: &mut Vec<Segment>, raw: &str, text: &str) -> Result<()> {
    if text.contains(['{', '}']) {
        return Err(template_error(raw, "unbalanced or empty braces"));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

fn template_error(raw: &str, reason: &str) -> MonitError {
    MonitError::InvalidConfigValueError {
        field: "key_template".to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    }
}

/// 只有非空字串與數字可以作為比對鍵
pub fn scalar_to_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// How a source's records are reduced to a join key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    field: Option<String>,
    template: Option<KeyTemplate>,
}

impl KeySpec {
    pub fn new(field: Option<String>, template: Option<KeyTemplate>) -> Result<Self> {
        if field.is_none() && template.is_none() {
            return Err(MonitError::config(
                "a source needs 'key' or 'key_template' to be matched",
            ));
        }
        Ok(Self { field, template })
    }

    pub fn field(path: &str) -> Self {
        Self {
            field: Some(path.to_string()),
            template: None,
        }
    }

    pub fn field_name(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn template(&self) -> Option<&KeyTemplate> {
        self.template.as_ref()
    }

    /// Returns the record's key. A value already present at the key field
    /// wins; otherwise the template is rendered and, when a key field is
    /// configured, written back into the record.
    pub fn resolve(&self, record: &mut Record) -> Result<String> {
        if let Some(field) = &self.field {
            if let Some(key) = record.get_path(field).and_then(scalar_to_key) {
                return Ok(key);
            }
        }

        match (&self.template, &self.field) {
            (Some(template), field) => {
                let key = template.render(record)?;
                if let Some(field) = field {
                    tracing::debug!("No '{}' on record, derived: {}", field, key);
                    if !record.set_path(field, Value::String(key.clone())) {
                        return Err(MonitError::matching(format!(
                            "cannot store derived key at '{}'",
                            field
                        )));
                    }
                }
                Ok(key)
            }
            (None, Some(field)) => Err(MonitError::matching(format!(
                "key field '{}' is missing or empty",
                field
            ))),
            (None, None) => Err(MonitError::matching("no key configured")),
        }
    }
}
