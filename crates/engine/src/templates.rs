//! Parsing of `${name}` / `${env.name}` references inside scenario strings.
//!
//! `$${` is the escape for a literal `${`. A lone `$` is ordinary text. An opening `${`
//! without a closing `}` is a syntax error.

use serde_json::Value;

/// Piece of a parsed template string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSegment<'a> {
    Literal(&'a str),
    /// Reference name with surrounding whitespace trimmed.
    Reference(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSyntaxError {
    /// `${` at the given byte offset has no closing brace.
    Unterminated { offset: usize },
    /// `${}` at the given byte offset.
    EmptyReference { offset: usize },
}

/// Prefix of references into the environment namespace.
pub const ENV_PREFIX: &str = "env.";

/// Split a string into literal text and references.
pub fn parse_template(text: &str) -> Result<Vec<TemplateSegment<'_>>, TemplateSyntaxError> {
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut cursor = 0;

    while let Some(relative) = text[cursor..].find('$') {
        let dollar = cursor + relative;
        let rest = &text[dollar..];

        if rest.starts_with("$${") {
            push_literal(&mut segments, &text[literal_start..dollar]);
            segments.push(TemplateSegment::Literal("${"));
            cursor = dollar + 3;
            literal_start = cursor;
            continue;
        }

        if rest.starts_with("${") {
            let body_start = dollar + 2;
            let Some(close) = text[body_start..].find('}') else {
                return Err(TemplateSyntaxError::Unterminated { offset: dollar });
            };
            let name = text[body_start..body_start + close].trim();
            if name.is_empty() {
                return Err(TemplateSyntaxError::EmptyReference { offset: dollar });
            }
            push_literal(&mut segments, &text[literal_start..dollar]);
            segments.push(TemplateSegment::Reference(name));
            cursor = body_start + close + 1;
            literal_start = cursor;
            continue;
        }

        cursor = dollar + 1;
    }

    push_literal(&mut segments, &text[literal_start..]);
    Ok(segments)
}

fn push_literal<'a>(segments: &mut Vec<TemplateSegment<'a>>, literal: &'a str) {
    if !literal.is_empty() {
        segments.push(TemplateSegment::Literal(literal));
    }
}

/// True when the string contains at least one reference (escapes excluded).
pub fn contains_reference(text: &str) -> bool {
    match parse_template(text) {
        Ok(segments) => segments.iter().any(|segment| matches!(segment, TemplateSegment::Reference(_))),
        Err(_) => true,
    }
}

/// Reference found while walking a JSON tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    /// Field path of the string holding the reference.
    pub source_path: String,
    pub name: String,
}

/// Collect every reference from an arbitrary JSON value tree. Strings with syntax errors
/// are skipped; substitution reports those.
pub fn collect_references_from_value(value: &Value, source_path: &str, references: &mut Vec<TemplateRef>) {
    match value {
        Value::String(text) => {
            if let Ok(segments) = parse_template(text) {
                for segment in segments {
                    if let TemplateSegment::Reference(name) = segment {
                        references.push(TemplateRef {
                            source_path: source_path.to_string(),
                            name: name.to_string(),
                        });
                    }
                }
            }
        }
        Value::Array(values) => {
            for (index, nested_value) in values.iter().enumerate() {
                collect_references_from_value(nested_value, &format!("{source_path}[{index}]"), references);
            }
        }
        Value::Object(map) => {
            for (key, nested_value) in map {
                collect_references_from_value(nested_value, &join_path(source_path, key), references);
            }
        }
        _ => {}
    }
}

/// Append a field to a dotted path.
pub fn join_path(base: &str, field: &str) -> String {
    if base.is_empty() { field.to_string() } else { format!("{base}.{field}") }
}
