//! Schema-validated model output.
//!
//! A schema is a fixed list of named text fields. The prompt is extended with
//! format instructions for the chosen [`FillMode`], the raw reply is parsed into
//! [`FieldValues`], and the target type validates required fields itself via
//! [`StructuredOutput::from_fields`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, Message, ProviderError};

// =============================================================================
// Schema description
// =============================================================================

/// One named text field of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
}

/// How the model is asked to lay out the fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// A single JSON object keyed by field name.
    #[default]
    Json,
    /// Each field wrapped in `<name>...</name>` tags, free text inside.
    ///
    /// Preferred for long reasoning traces, which models rarely escape
    /// correctly inside JSON strings.
    Tagged,
}

impl FillMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillMode::Json => "json",
            FillMode::Tagged => "tagged",
        }
    }
}

/// A typed result built from parsed fields.
pub trait StructuredOutput: Sized {
    /// Schema name used in errors and logs.
    const SCHEMA: &'static str;
    const FIELDS: &'static [FieldSpec];

    fn from_fields(fields: FieldValues) -> Result<Self, SchemaError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("{schema}: expected a JSON object: {message}")]
    NotAnObject {
        schema: &'static str,
        message: String,
    },
    #[error("{schema}: reply carries no field tags and no JSON object")]
    NoFields { schema: &'static str },
    #[error("{schema}: missing required field '{field}'")]
    MissingField {
        schema: &'static str,
        field: &'static str,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FillError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
}

// =============================================================================
// Parsed values
// =============================================================================

/// Field name to raw text, for the fields the reply actually contained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldValues(BTreeMap<String, String>);

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Remove a field, treating blank text as absent.
    pub fn take(&mut self, name: &str) -> Option<String> {
        self.0.remove(name).filter(|v| !v.trim().is_empty())
    }

    /// Remove a field that must be present and non-blank.
    pub fn require(
        &mut self,
        schema: &'static str,
        field: &'static str,
    ) -> Result<String, SchemaError> {
        self.take(field)
            .ok_or(SchemaError::MissingField { schema, field })
    }
}

// =============================================================================
// Instructions
// =============================================================================

/// Format instructions appended to a prompt.
pub fn output_instructions(fields: &[FieldSpec], mode: FillMode) -> String {
    let mut out = String::from("\n## Output format\n");
    match mode {
        FillMode::Json => {
            out.push_str(
                "Return a single JSON object with exactly these string fields and nothing else:\n",
            );
            for f in fields {
                out.push_str(&format!("- \"{}\": {}\n", f.name, f.description));
            }
        }
        FillMode::Tagged => {
            out.push_str(
                "Wrap each field of your answer in XML tags named after the field, in this order:\n",
            );
            for f in fields {
                out.push_str(&format!("<{0}>\n{1}\n</{0}>\n", f.name, f.description));
            }
        }
    }
    out
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse a raw reply into field values.
///
/// Single-field schemas fall back to the whole trimmed reply when the expected
/// layout is absent. Multi-field schemas in tagged mode fall back to JSON, and
/// a reply with neither tags nor a JSON object is [`SchemaError::NoFields`].
pub fn parse_fields(
    raw: &str,
    schema: &'static str,
    fields: &[FieldSpec],
    mode: FillMode,
) -> Result<FieldValues, SchemaError> {
    let parsed = match mode {
        FillMode::Tagged => {
            let tagged = parse_tagged(raw, fields);
            if !tagged.0.is_empty() || fields.len() == 1 {
                tagged
            } else {
                parse_json(raw, schema, fields).map_err(|_| SchemaError::NoFields { schema })?
            }
        }
        FillMode::Json => match parse_json(raw, schema, fields) {
            Ok(values) => values,
            Err(_) if fields.len() == 1 => FieldValues::new(),
            Err(e) => return Err(e),
        },
    };

    if parsed.0.is_empty() && fields.len() == 1 && !raw.trim().is_empty() {
        let mut values = FieldValues::new();
        values.insert(fields[0].name, raw.trim());
        return Ok(values);
    }
    Ok(parsed)
}

fn parse_tagged(raw: &str, fields: &[FieldSpec]) -> FieldValues {
    let mut values = FieldValues::new();
    for f in fields {
        if let Some(v) = extract_tag(raw, f.name) {
            values.insert(f.name, v.trim());
        }
    }
    values
}

/// Text between `<name>` and `</name>`; a missing close tag runs to the end.
fn extract_tag<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = raw.find(&open)? + open.len();
    let rest = &raw[start..];
    Some(match rest.find(&close) {
        Some(end) => &rest[..end],
        None => rest,
    })
}

fn parse_json(
    raw: &str,
    schema: &'static str,
    fields: &[FieldSpec],
) -> Result<FieldValues, SchemaError> {
    let json_str = extract_json(raw);
    let value: Value = serde_json::from_str(json_str).map_err(|e| SchemaError::NotAnObject {
        schema,
        message: e.to_string(),
    })?;
    let Value::Object(map) = value else {
        return Err(SchemaError::NotAnObject {
            schema,
            message: format!("got {}", json_kind(&value)),
        });
    };

    let mut values = FieldValues::new();
    for f in fields {
        let text = match map.get(f.name) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        values.insert(f.name, text);
    }
    Ok(values)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Extract a JSON object from potentially noisy model output.
///
/// Handles pure JSON, JSON in markdown fences, and JSON embedded in prose.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find('{') {
        let remainder = &trimmed[start..];
        if let Some(end) = find_matching_brace(remainder) {
            return &remainder[..end];
        }
    }

    trimmed
}

/// Byte offset just past the matching closing brace, ignoring braces in strings.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

// =============================================================================
// Fill
// =============================================================================

/// Model call settings for one fill.
#[derive(Debug, Clone)]
pub struct FillOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub mode: FillMode,
    pub attribution: Attribution,
}

/// A validated value plus the raw reply and what it cost.
#[derive(Debug, Clone)]
pub struct Filled<T> {
    pub value: T,
    pub raw: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
}

/// Ask the gateway for `T` and validate the reply.
pub async fn fill<T: StructuredOutput>(
    gateway: &dyn ChatGateway,
    prompt: &str,
    opts: &FillOptions,
) -> Result<Filled<T>, FillError> {
    let mut content = String::with_capacity(prompt.len() + 256);
    content.push_str(prompt);
    content.push_str(&output_instructions(T::FIELDS, opts.mode));

    let model = ChatModel::openrouter(&opts.model);
    let json_mode = opts.mode == FillMode::Json && model.supports_json_mode();

    let mut request = ChatRequest::new(model, vec![Message::user(content)], opts.attribution.clone())
        .temperature(opts.temperature);
    if let Some(max) = opts.max_tokens {
        request = request.max_tokens(max);
    }
    if json_mode {
        request = request.json();
    }

    let response = gateway.chat(request).await?;
    let fields = parse_fields(&response.content, T::SCHEMA, T::FIELDS, opts.mode)?;
    debug!(
        schema = T::SCHEMA,
        mode = opts.mode.as_str(),
        fields_found = fields.0.len(),
        "parsed structured reply"
    );
    let value = T::from_fields(fields)?;

    Ok(Filled {
        value,
        raw: response.content,
        input_tokens: response.input_tokens,
        output_tokens: response.output_tokens,
        cost_nanodollars: response.cost_nanodollars,
    })
}
