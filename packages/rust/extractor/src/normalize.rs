//! Parsing model output into canonical field values.

use serde_json::{Map, Value};
use tracing::debug;

use orgbrief_shared::{
    Described, FieldMap, FieldSpec, FieldValue, OrgBriefError, Result, UNDISCLOSED,
};

use crate::{Extractor, FieldScope};

impl Extractor {
    /// Parse formatter output and return a value for every field in `scope`.
    ///
    /// Absent or null fields become the "Undisclosed" marker; keys outside
    /// the scope are dropped.
    pub fn parse_structured(&self, raw: &str, scope: FieldScope) -> Result<FieldMap> {
        let object = parse_object(raw)?;

        let fields: FieldMap = self
            .fields(scope)
            .map(|spec| (spec.key.clone(), normalize_value(spec, object.get(&spec.key))))
            .collect();

        let unknown = object
            .keys()
            .filter(|k| !fields.contains_key(k.as_str()))
            .count();
        if unknown > 0 {
            debug!(unknown, "ignored keys outside the requested scope");
        }

        Ok(fields)
    }

    /// Parse a document-extraction response.
    ///
    /// Only fields with a real value are returned so a sparse document never
    /// overwrites internal data with placeholders.
    pub fn parse_document_fields(&self, raw: &str) -> Result<FieldMap> {
        let object = parse_object(raw)?;

        Ok(self
            .fields(FieldScope::AllGroups)
            .filter_map(|spec| {
                let value = normalize_value(spec, object.get(&spec.key));
                (!value.is_sentinel()).then(|| (spec.key.clone(), value))
            })
            .collect())
    }
}

fn parse_object(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(OrgBriefError::malformed(format!(
            "expected a JSON object, got {}",
            kind(&other)
        ))),
        Err(e) => Err(OrgBriefError::malformed(format!("invalid JSON: {e}"))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Normalize one raw JSON value for `spec`.
pub fn normalize_value(spec: &FieldSpec, raw: Option<&Value>) -> FieldValue {
    let value = match raw {
        None | Some(Value::Null) => return FieldValue::undisclosed(),
        Some(v) => v,
    };

    if spec.boolean {
        return yes_no(value);
    }

    match value {
        Value::Object(map) => described(map)
            .map(FieldValue::Described)
            .unwrap_or_else(FieldValue::undisclosed),
        Value::Array(items) => {
            let list: Vec<Described> = items.iter().filter_map(list_item).collect();
            if list.is_empty() {
                FieldValue::undisclosed()
            } else {
                FieldValue::DescribedList(list)
            }
        }
        Value::String(s) if s.trim().is_empty() => FieldValue::undisclosed(),
        Value::String(s) => FieldValue::Scalar(s.trim().to_string()),
        Value::Number(n) => FieldValue::Scalar(n.to_string()),
        Value::Bool(b) => FieldValue::Scalar(b.to_string()),
        Value::Null => FieldValue::undisclosed(),
    }
}

fn list_item(value: &Value) -> Option<Described> {
    match value {
        Value::Object(map) => described(map),
        Value::String(s) if !s.trim().is_empty() => Some(Described::new(s.trim())),
        _ => None,
    }
}

/// `{description, date?, sources[]}` → [`Described`]; `None` when empty.
fn described(map: &Map<String, Value>) -> Option<Described> {
    let description = text(map.get("description"));
    let sources: Vec<String> = match map.get("sources") {
        Some(Value::Array(items)) => items.iter().filter_map(source).collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };

    if description.is_empty() && sources.is_empty() {
        return None;
    }

    let description = match text(map.get("date")) {
        date if !date.is_empty() && !description.is_empty() => format!("{date}: {description}"),
        _ => description,
    };

    Some(Described {
        description,
        sources,
    })
}

fn source(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => ["uri", "url", "title"]
            .iter()
            .map(|k| text(map.get(*k)))
            .find(|s| !s.is_empty()),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn yes_no(value: &Value) -> FieldValue {
    let answer = match value {
        Value::Object(map) => text(map.get("description")),
        Value::Bool(true) => "yes".into(),
        Value::Bool(false) => "no".into(),
        other => text(Some(other)),
    };
    let answer = answer.to_lowercase();

    let normalized = if leading_word(&answer, "yes") {
        "Yes"
    } else if leading_word(&answer, "no") {
        "No"
    } else {
        UNDISCLOSED
    };
    FieldValue::Scalar(normalized.to_string())
}

/// Whether `text` starts with the whole word `word`.
fn leading_word(text: &str, word: &str) -> bool {
    text.strip_prefix(word)
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric()))
}
