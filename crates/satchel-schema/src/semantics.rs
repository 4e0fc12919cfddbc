//! Typed semantics trees (`semantics.json`).
//!
//! Every node is decoded into a closed [`FieldKind`]. A node whose type is
//! unknown, or whose constraints do not decode, becomes
//! [`FieldKind::Unsupported`] instead of failing the whole schema, so the
//! content validator can treat the matching content key as unexpected.

use crate::manifest::ManifestError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub struct SemanticsField {
    pub name: String,
    pub label: Option<String>,
    pub optional: bool,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text(TextField),
    Number(NumberField),
    Boolean,
    List(ListField),
    Group(GroupField),
    Image,
    Video,
    Audio,
    Select(SelectField),
    Library(LibraryField),
    Unsupported {
        type_name: String,
        reason: Option<String>,
    },
}

impl FieldKind {
    pub fn type_name(&self) -> &str {
        match self {
            FieldKind::Text(_) => "text",
            FieldKind::Number(_) => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::List(_) => "list",
            FieldKind::Group(_) => "group",
            FieldKind::Image => "image",
            FieldKind::Video => "video",
            FieldKind::Audio => "audio",
            FieldKind::Select(_) => "select",
            FieldKind::Library(_) => "library",
            FieldKind::Unsupported { type_name, .. } => type_name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextField {
    pub max_length: Option<usize>,
    pub regexp: Option<TextPattern>,
    pub widget: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TextPattern {
    pub pattern: String,
    /// Any of `i`, `m`, `s`, `x`.
    pub modifiers: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NumberField {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub decimals: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListField {
    #[serde(default)]
    pub max: Option<usize>,
    pub field: Box<SemanticsField>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GroupField {
    pub fields: Vec<SemanticsField>,
}

impl GroupField {
    pub fn new(fields: Vec<SemanticsField>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&SemanticsField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SelectField {
    pub options: Vec<SelectOption>,
    pub widget: Option<String>,
    pub multiple: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SelectOption {
    pub value: Value,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LibraryField {
    /// Allowed library strings, display form (`H5P.Text 1.1`).
    pub options: Vec<String>,
}

impl From<Value> for SemanticsField {
    fn from(value: Value) -> Self {
        let name = string_at(&value, "name").unwrap_or_default();
        let label = string_at(&value, "label");
        let optional = value.get("optional").and_then(Value::as_bool).unwrap_or(false);
        let type_name = string_at(&value, "type").unwrap_or_default();

        let kind = match type_name.as_str() {
            "text" => decode(value, FieldKind::Text, &type_name),
            "number" => decode(value, FieldKind::Number, &type_name),
            "boolean" => FieldKind::Boolean,
            "list" => decode(value, FieldKind::List, &type_name),
            "group" => decode(value, FieldKind::Group, &type_name),
            "image" => FieldKind::Image,
            "video" => FieldKind::Video,
            "audio" => FieldKind::Audio,
            "select" => decode(value, FieldKind::Select, &type_name),
            "library" => decode(value, FieldKind::Library, &type_name),
            _ => FieldKind::Unsupported {
                type_name,
                reason: None,
            },
        };

        Self {
            name,
            label,
            optional,
            kind,
        }
    }
}

fn string_at(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn decode<T: DeserializeOwned>(value: Value, wrap: fn(T) -> FieldKind, type_name: &str) -> FieldKind {
    match serde_json::from_value(value) {
        Ok(field) => wrap(field),
        Err(e) => FieldKind::Unsupported {
            type_name: type_name.to_owned(),
            reason: Some(e.to_string()),
        },
    }
}

/// Decode a `semantics.json` document: a list of top-level fields.
pub fn parse_semantics(input: &str) -> Result<Vec<SemanticsField>, ManifestError> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    match serde_json::from_str::<Value>(input)? {
        Value::Array(nodes) => Ok(nodes.into_iter().map(SemanticsField::from).collect()),
        _ => Err(ManifestError::InvalidSemantics),
    }
}
