//! Schema-driven sanitization of content parameters.
//!
//! Every handler takes ownership of a value and returns its sanitized
//! replacement. `None` means the value is dropped from its parent.
//! Problems are recorded as warnings; the pass never stops early.

use crate::html::{allowed_tags, escape_text, filter_html};
use crate::CoreError;
use regex::{Regex, RegexBuilder};
use satchel_schema::{
    parse_semantics, Diagnostics, FieldKind, GroupField, LibraryField, LibraryIdentity, ListField,
    NumberField, SelectField, SemanticsField, TextField, TextPattern,
};
use satchel_store::StorageProvider;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static SUB_CONTENT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\{?[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\}?$",
    )
    .expect("sub-content id pattern is valid")
});

const IMAGE_KEYS: &[&str] = &["path", "mime", "width", "height", "alt", "title", "copyright"];
const SOURCE_KEYS: &[&str] = &["path", "mime", "quality", "copyright"];

#[derive(Debug, Clone, Serialize)]
pub struct ContentReport {
    /// Sanitized parameters.
    pub params: Value,
    pub diagnostics: Diagnostics,
    /// Libraries referenced through `library` fields, plus the root library
    /// when validation started from one.
    pub libraries: BTreeSet<LibraryIdentity>,
}

pub struct ContentValidator<'a, S: StorageProvider + ?Sized> {
    provider: &'a S,
}

impl<'a, S: StorageProvider + ?Sized> ContentValidator<'a, S> {
    pub fn new(provider: &'a S) -> Self {
        Self { provider }
    }

    /// Sanitize `params` against a top-level semantics list.
    pub fn validate(&self, params: Value, semantics: &[SemanticsField]) -> ContentReport {
        let mut pass = Pass::new(self.provider);
        let params = pass.group(params, semantics, "", false);
        pass.finish(params)
    }

    /// Sanitize `params` against the semantics of an installed library.
    pub fn validate_for_library(
        &self,
        library: &LibraryIdentity,
        params: Value,
    ) -> Result<ContentReport, CoreError> {
        info!("validating content for {library}");
        let record = self
            .provider
            .load_library(library)?
            .ok_or_else(|| CoreError::MissingLibrary(library.to_string()))?;
        let raw = record
            .semantics
            .as_deref()
            .ok_or_else(|| CoreError::NoSemantics(library.to_string()))?;
        let semantics = parse_semantics(raw)?;

        let mut pass = Pass::new(self.provider);
        pass.used.insert(library.clone());
        pass.semantics
            .insert(library.to_string(), Some(Rc::new(GroupField::new(semantics.clone()))));
        let params = pass.group(params, &semantics, "", false);
        Ok(pass.finish(params))
    }
}

/// State of one validation pass. The semantics cache lives exactly as long.
struct Pass<'p, S: ?Sized> {
    provider: &'p S,
    semantics: HashMap<String, Option<Rc<GroupField>>>,
    patterns: HashMap<(String, String), Option<Regex>>,
    diags: Diagnostics,
    used: BTreeSet<LibraryIdentity>,
}

impl<'p, S: StorageProvider + ?Sized> Pass<'p, S> {
    fn new(provider: &'p S) -> Self {
        Self {
            provider,
            semantics: HashMap::new(),
            patterns: HashMap::new(),
            diags: Diagnostics::new(),
            used: BTreeSet::new(),
        }
    }

    fn finish(self, params: Option<Value>) -> ContentReport {
        info!(
            "content validated with {} findings, {} libraries used",
            self.diags.len(),
            self.used.len()
        );
        ContentReport {
            params: params.unwrap_or_else(|| Value::Object(Map::new())),
            diagnostics: self.diags,
            libraries: self.used,
        }
    }

    fn field(&mut self, value: Value, field: &SemanticsField, path: &str) -> Option<Value> {
        match &field.kind {
            FieldKind::Text(text) => Some(self.text(value, text, path)),
            FieldKind::Number(number) => Some(self.number(&value, number, path)),
            FieldKind::Boolean => Some(self.boolean(&value, path)),
            FieldKind::List(list) => Some(self.list(value, list, path)),
            FieldKind::Group(group) => self.group(value, &group.fields, path, true),
            FieldKind::Select(select) => Some(self.select(value, select, path)),
            FieldKind::Image => self.media(value, "image", IMAGE_KEYS, path),
            FieldKind::Video => self.sources(value, "video", path),
            FieldKind::Audio => self.sources(value, "audio", path),
            FieldKind::Library(library) => self.library(value, library, path),
            FieldKind::Unsupported { type_name, reason } => {
                let detail = reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default();
                self.diags.warning(
                    path,
                    format!("field of unsupported type '{type_name}' removed{detail}"),
                );
                None
            }
        }
    }

    fn text(&mut self, value: Value, field: &TextField, path: &str) -> Value {
        let raw = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => {
                self.diags
                    .warning(path, format!("expected text, got {}", type_of(&other)));
                String::new()
            }
        };

        let mut text = if field.widget.as_deref() == Some("html") {
            filter_html(&raw, &allowed_tags(&field.tags))
        } else {
            escape_text(&raw)
        };

        if let Some(max) = field.max_length {
            if text.chars().count() > max {
                text = text.chars().take(max).collect();
                self.diags
                    .warning(path, format!("text truncated to {max} characters"));
            }
        }

        if let Some(pattern) = &field.regexp {
            if let Some(re) = self.compiled(pattern, path) {
                if !re.is_match(&text) {
                    self.diags
                        .warning(path, "text does not match the required pattern and was cleared");
                    text.clear();
                }
            }
        }
        Value::String(text)
    }

    fn compiled(&mut self, pattern: &TextPattern, path: &str) -> Option<Regex> {
        let key = (pattern.pattern.clone(), pattern.modifiers.clone());
        if let Some(cached) = self.patterns.get(&key) {
            return cached.clone();
        }
        let modifiers = &pattern.modifiers;
        let built = RegexBuilder::new(&pattern.pattern)
            .case_insensitive(modifiers.contains('i'))
            .multi_line(modifiers.contains('m'))
            .dot_matches_new_line(modifiers.contains('s'))
            .ignore_whitespace(modifiers.contains('x'))
            .build();
        let compiled = match built {
            Ok(re) => Some(re),
            Err(e) => {
                self.diags
                    .warning(path, format!("pattern in semantics cannot be used: {e}"));
                None
            }
        };
        self.patterns.insert(key, compiled.clone());
        compiled
    }

    fn number(&mut self, value: &Value, field: &NumberField, path: &str) -> Value {
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        let mut number = match parsed {
            Some(n) if n.is_finite() => n,
            _ => {
                self.diags.warning(path, "not a number, set to 0");
                0.0
            }
        };

        if let Some(min) = field.min {
            number = number.max(min);
        }
        if let Some(max) = field.max {
            number = number.min(max);
        }
        if let Some(step) = field.step.filter(|s| *s > 0.0) {
            let rest = (number - field.min.unwrap_or(0.0)) % step;
            if rest != 0.0 {
                number -= rest;
            }
        }
        if let Some(decimals) = field.decimals {
            let factor = 10f64.powi(decimals.min(15) as i32);
            number = (number * factor).round() / factor;
        }

        if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 {
            Value::from(number as i64)
        } else {
            serde_json::Number::from_f64(number).map_or(Value::from(0), Value::Number)
        }
    }

    fn boolean(&mut self, value: &Value, path: &str) -> Value {
        match value {
            Value::Bool(b) => Value::Bool(*b),
            other => {
                self.diags
                    .warning(path, format!("expected a boolean, got {}", type_of(other)));
                Value::Bool(false)
            }
        }
    }

    fn select(&mut self, value: Value, field: &SelectField, path: &str) -> Value {
        if field.widget.as_deref() == Some("dynamicCheckboxes") {
            let Value::Array(items) = value else {
                self.diags.warning(path, "expected a list of choices");
                return Value::Array(Vec::new());
            };
            let escaped = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(Value::String(escape_text(&s))),
                    Value::Number(n) => Some(Value::String(n.to_string())),
                    other => {
                        self.diags
                            .warning(path, format!("choice of type {} removed", type_of(&other)));
                        None
                    }
                })
                .collect();
            return Value::Array(escaped);
        }

        if field.multiple {
            let items = match value {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                scalar => vec![scalar],
            };
            let kept = items
                .into_iter()
                .filter_map(|item| {
                    let option = matching_option(field, &item);
                    if option.is_none() {
                        self.diags
                            .warning(path, format!("invalid choice {item} removed"));
                    }
                    option
                })
                .collect();
            return Value::Array(kept);
        }

        if let Some(option) = matching_option(field, &value) {
            return option;
        }
        match field.options.first() {
            Some(first) => {
                self.diags.warning(
                    path,
                    format!("invalid choice {value}, replaced by {}", first.value),
                );
                first.value.clone()
            }
            None => {
                self.diags
                    .warning(path, format!("invalid choice {value}, no options declared"));
                Value::String(String::new())
            }
        }
    }

    fn list(&mut self, value: Value, field: &ListField, path: &str) -> Value {
        let mut items = match value {
            Value::Array(items) => items,
            other => {
                self.diags
                    .warning(path, format!("expected a list, got {}", type_of(&other)));
                return Value::Array(Vec::new());
            }
        };
        if let Some(max) = field.max {
            if items.len() > max {
                self.diags.warning(
                    path,
                    format!("list shortened from {} to {max} items", items.len()),
                );
                items.truncate(max);
            }
        }
        let validated = items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| self.field(item, &field.field, &format!("{path}[{index}]")))
            .collect();
        Value::Array(validated)
    }

    fn group(
        &mut self,
        value: Value,
        fields: &[SemanticsField],
        path: &str,
        flatten: bool,
    ) -> Option<Value> {
        if flatten && fields.len() == 1 {
            return self.field(value, &fields[0], path);
        }

        let object = match value {
            Value::Object(object) => object,
            other => {
                self.diags
                    .warning(path, format!("expected an object, got {}", type_of(&other)));
                Map::new()
            }
        };

        let mut sanitized = Map::new();
        for (key, item) in object {
            let item_path = join(path, &key);
            match fields.iter().find(|f| f.name == key) {
                Some(field) => {
                    if let Some(clean) = self.field(item, field, &item_path) {
                        sanitized.insert(key, clean);
                    }
                }
                None => {
                    debug!("removing {item_path}: not declared");
                    self.diags.warning(item_path, "unexpected field removed");
                }
            }
        }

        for field in fields {
            if !field.optional && !field.name.is_empty() && !sanitized.contains_key(&field.name) {
                self.diags.warning(
                    join(path, &field.name),
                    "no value given for mandatory field",
                );
            }
        }
        Some(Value::Object(sanitized))
    }

    fn sources(&mut self, value: Value, category: &str, path: &str) -> Option<Value> {
        let Value::Array(items) = value else {
            self.diags
                .warning(path, format!("expected a list of {category} sources, removed"));
            return None;
        };
        let sources = items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| {
                self.media(item, category, SOURCE_KEYS, &format!("{path}[{index}]"))
            })
            .collect();
        Some(Value::Array(sources))
    }

    fn media(&mut self, value: Value, category: &str, keys: &[&str], path: &str) -> Option<Value> {
        let Value::Object(object) = value else {
            self.diags
                .warning(path, format!("expected a {category} object, removed"));
            return None;
        };

        let mut sanitized = Map::new();
        for (key, item) in object {
            let item_path = join(path, &key);
            if !keys.contains(&key.as_str()) {
                self.diags.warning(item_path, "unexpected field removed");
                continue;
            }
            let clean = match (key.as_str(), item) {
                ("mime", Value::String(mime)) => {
                    if mime.starts_with(&format!("{category}/")) {
                        Some(Value::String(escape_text(&mime)))
                    } else {
                        self.diags
                            .warning(&item_path, format!("mime type {mime} is not {category}, removed"));
                        None
                    }
                }
                ("width" | "height", item) => {
                    if item.is_u64() {
                        Some(item)
                    } else {
                        self.diags.warning(&item_path, "dimension must be a whole number, removed");
                        None
                    }
                }
                ("copyright", Value::Object(fields)) => Some(escape_strings(Value::Object(fields))),
                (_, Value::String(s)) if key != "copyright" => Some(Value::String(escape_text(&s))),
                (_, other) => {
                    self.diags
                        .warning(&item_path, format!("unexpected {}, removed", type_of(&other)));
                    None
                }
            };
            if let Some(clean) = clean {
                sanitized.insert(key, clean);
            }
        }

        if !sanitized.contains_key("path") {
            self.diags.warning(path, format!("{category} without a path"));
        }
        Some(Value::Object(sanitized))
    }

    fn library(&mut self, value: Value, field: &LibraryField, path: &str) -> Option<Value> {
        let Value::Object(mut object) = value else {
            self.diags.warning(path, "expected a library reference, removed");
            return None;
        };
        let Some(name) = object.get("library").and_then(Value::as_str).map(str::to_owned) else {
            self.diags.warning(path, "library reference without a library, removed");
            return None;
        };

        if !field.options.iter().any(|option| *option == name) {
            self.diags
                .warning(path, format!("library {name} is not allowed here, left unvalidated"));
            return Some(Value::Object(object));
        }
        let identity = match LibraryIdentity::parse(&name) {
            Ok(identity) => identity,
            Err(e) => {
                self.diags.warning(path, format!("{e}, left unvalidated"));
                return Some(Value::Object(object));
            }
        };

        let params = object.remove("params").unwrap_or(Value::Null);
        let params = match self.library_semantics(&identity, &name, path) {
            Some(semantics) => {
                self.used.insert(identity);
                self.group(params, &semantics.fields, &join(path, "params"), false)
            }
            None => {
                self.diags
                    .warning(join(path, "params"), "parameters of an unavailable library removed");
                None
            }
        };

        let mut sanitized = Map::new();
        sanitized.insert("library".to_owned(), Value::String(name));
        sanitized.insert(
            "params".to_owned(),
            params.unwrap_or_else(|| Value::Object(Map::new())),
        );
        for (key, item) in object {
            let item_path = join(path, &key);
            match (key.as_str(), item) {
                ("library", _) => {}
                ("subContentId", Value::String(id)) if SUB_CONTENT_ID.is_match(&id) => {
                    sanitized.insert(key, Value::String(id));
                }
                ("metadata", Value::Object(metadata)) => {
                    sanitized.insert(key, escape_strings(Value::Object(metadata)));
                }
                _ => self.diags.warning(item_path, "unexpected field removed"),
            }
        }
        Some(Value::Object(sanitized))
    }

    /// Semantics of a sub-content library, decoded once per pass.
    fn library_semantics(
        &mut self,
        identity: &LibraryIdentity,
        key: &str,
        path: &str,
    ) -> Option<Rc<GroupField>> {
        if let Some(cached) = self.semantics.get(key) {
            return cached.clone();
        }
        let loaded = match self.provider.load_library(identity) {
            Ok(Some(record)) => match record.semantics.as_deref().map(parse_semantics) {
                Some(Ok(fields)) => Some(Rc::new(GroupField::new(fields))),
                Some(Err(e)) => {
                    self.diags
                        .warning(path, format!("semantics of {identity} cannot be read: {e}"));
                    None
                }
                None => Some(Rc::new(GroupField::default())),
            },
            Ok(None) => {
                self.diags
                    .warning(path, format!("library {identity} is not installed"));
                None
            }
            Err(e) => {
                warn!("loading {identity} failed: {e}");
                self.diags
                    .warning(path, format!("library {identity} could not be loaded: {e}"));
                None
            }
        };
        self.semantics.insert(key.to_owned(), loaded.clone());
        loaded
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Canonical option value matching `value`, compared in text form.
fn matching_option(field: &SelectField, value: &Value) -> Option<Value> {
    let wanted = scalar_text(value)?;
    field
        .options
        .iter()
        .find(|option| scalar_text(&option.value).as_deref() == Some(wanted.as_str()))
        .map(|option| option.value.clone())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn escape_strings(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(escape_text(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(escape_strings).collect()),
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .map(|(k, v)| (k, escape_strings(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_schema::{parse_manifest_str, LibraryRecord};
    use satchel_schema::{ContentId, DependencyDeclaration, Diagnostics, LibraryId};
    use satchel_store::{ContentRecord, InstalledLibrary, LibraryUsage, MemoryStorage, StoreError};
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn semantics(json: Value) -> Vec<SemanticsField> {
        parse_semantics(&json.to_string()).unwrap()
    }

    fn run(params: Value, schema: Value) -> ContentReport {
        let provider = MemoryStorage::new();
        ContentValidator::new(&provider).validate(params, &semantics(schema))
    }

    fn warned(report: &ContentReport, needle: &str) -> bool {
        report
            .diagnostics
            .iter()
            .any(|d| d.to_string().contains(needle))
    }

    fn library_with(name: &str, minor: u32, schema: Value) -> LibraryRecord {
        let manifest = parse_manifest_str(&format!(
            r#"{{"machineName": "{name}", "majorVersion": 1, "minorVersion": {minor}, "patchVersion": 0}}"#
        ))
        .unwrap();
        let mut record = LibraryRecord::from_manifest(manifest).unwrap();
        record.semantics = Some(schema.to_string());
        record
    }

    #[test]
    fn numbers_are_clamped_and_snapped() {
        let schema = json!([
            {"name": "a", "type": "number", "min": 0, "max": 5},
            {"name": "b", "type": "number"},
            {"name": "c", "type": "number", "min": 0, "step": 3},
            {"name": "d", "type": "number", "decimals": 2},
            {"name": "e", "type": "number", "min": 1, "step": 2}
        ]);
        let report = run(
            json!({"a": 7, "b": "abc", "c": 4, "d": 3.14159, "e": "6"}),
            schema,
        );
        assert_eq!(
            report.params,
            json!({"a": 5, "b": 0, "c": 3, "d": 3.14, "e": 5})
        );
        assert!(warned(&report, "b: not a number"));
    }

    #[test]
    fn html_text_keeps_whitelisted_tags() {
        let report = run(
            json!({"t": "<script>x</script>hi"}),
            json!([{"name": "t", "type": "text", "widget": "html", "tags": ["b"]}]),
        );
        assert_eq!(report.params, json!({"t": "hi"}));

        let report = run(
            json!({"t": "<b>a</b><strong>b</strong><i>c</i><p>d</p>"}),
            json!([{"name": "t", "type": "text", "widget": "html", "tags": ["b"]}]),
        );
        assert_eq!(report.params["t"], "<b>a</b><strong>b</strong>c<p>d</p>");
    }

    #[test]
    fn plain_text_is_escaped_and_truncated() {
        let report = run(
            json!({"t": "<b>Æøå & more</b>"}),
            json!([{"name": "t", "type": "text", "maxLength": 12}]),
        );
        assert_eq!(report.params["t"], "&lt;b&gt;Æøå");
        assert!(warned(&report, "truncated to 12"));
    }

    #[test]
    fn regexp_mismatch_clears_the_field() {
        let schema = json!([
            {"name": "code", "type": "text", "regexp": {"pattern": "^[a-z]+$", "modifiers": "i"}},
            {"name": "zip", "type": "text", "regexp": {"pattern": "^[0-9]{4}$"}}
        ]);
        let report = run(json!({"code": "AbC", "zip": "12a4"}), schema);
        assert_eq!(report.params, json!({"code": "AbC", "zip": ""}));
        assert!(warned(&report, "zip: text does not match"));
    }

    #[test]
    fn invalid_pattern_leaves_text() {
        let report = run(
            json!({"t": "x"}),
            json!([{"name": "t", "type": "text", "regexp": {"pattern": "(unclosed"}}]),
        );
        assert_eq!(report.params["t"], "x");
        assert!(warned(&report, "cannot be used"));
    }

    #[test]
    fn non_string_text_values() {
        let report = run(
            json!({"a": 12, "b": {"nested": true}}),
            json!([{"name": "a", "type": "text"}, {"name": "b", "type": "text"}]),
        );
        assert_eq!(report.params, json!({"a": "12", "b": ""}));
    }

    #[test]
    fn booleans_are_strict() {
        let report = run(
            json!({"a": true, "b": "true", "c": 1}),
            json!([
                {"name": "a", "type": "boolean"},
                {"name": "b", "type": "boolean"},
                {"name": "c", "type": "boolean"}
            ]),
        );
        assert_eq!(report.params, json!({"a": true, "b": false, "c": false}));
    }

    #[test]
    fn select_falls_back_to_first_option() {
        let schema = json!([{"name": "s", "type": "select",
            "options": [{"value": "grid"}, {"value": "list"}]}]);
        let report = run(json!({"s": "carousel"}), schema.clone());
        assert_eq!(report.params["s"], "grid");
        assert!(warned(&report, "invalid choice"));

        let report = run(json!({"s": "list"}), schema);
        assert_eq!(report.params["s"], "list");
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn select_matches_numbers_loosely() {
        let report = run(
            json!({"s": "2"}),
            json!([{"name": "s", "type": "select", "options": [{"value": 1}, {"value": 2}]}]),
        );
        assert_eq!(report.params["s"], 2);
    }

    #[test]
    fn multiple_select_drops_invalid_choices() {
        let report = run(
            json!({"s": ["a", "zzz", "c"]}),
            json!([{"name": "s", "type": "select", "multiple": true,
                "options": [{"value": "a"}, {"value": "b"}, {"value": "c"}]}]),
        );
        assert_eq!(report.params["s"], json!(["a", "c"]));
    }

    #[test]
    fn dynamic_checkboxes_are_escaped_not_checked() {
        let report = run(
            json!({"s": ["<b>", "any", 3]}),
            json!([{"name": "s", "type": "select", "widget": "dynamicCheckboxes"}]),
        );
        assert_eq!(report.params["s"], json!(["&lt;b&gt;", "any", "3"]));
    }

    #[test]
    fn list_is_truncated_then_validated() {
        let report = run(
            json!({"l": [1, 20, 3, 4]}),
            json!([{"name": "l", "type": "list", "max": 3,
                "field": {"name": "n", "type": "number", "max": 10}}]),
        );
        assert_eq!(report.params["l"], json!([1, 10, 3]));
        assert!(warned(&report, "shortened from 4 to 3"));
    }

    #[test]
    fn unexpected_group_fields_are_removed() {
        let report = run(
            json!({"known": 1, "rogue": 2}),
            json!([{"name": "known", "type": "number"}]),
        );
        assert_eq!(report.params, json!({"known": 1}));
        assert!(warned(&report, "rogue: unexpected field removed"));
    }

    #[test]
    fn single_field_groups_flatten() {
        let schema = json!([
            {"name": "answers", "type": "list", "field": {
                "name": "answer", "type": "group",
                "fields": [{"name": "text", "type": "text"}]
            }},
            {"name": "pair", "type": "group", "fields": [
                {"name": "a", "type": "boolean"},
                {"name": "b", "type": "boolean", "optional": true}
            ]}
        ]);
        let report = run(
            json!({"answers": ["<i>yes</i>", "no"], "pair": {"a": true}}),
            schema,
        );
        assert_eq!(
            report.params,
            json!({"answers": ["&lt;i&gt;yes&lt;/i&gt;", "no"], "pair": {"a": true}})
        );
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn missing_mandatory_fields_are_reported() {
        let report = run(
            json!({}),
            json!([{"name": "title", "type": "text"}, {"name": "extra", "type": "text", "optional": true}]),
        );
        assert_eq!(report.params, json!({}));
        assert_eq!(report.diagnostics.len(), 1);
        assert!(warned(&report, "title: no value given"));
    }

    #[test]
    fn unsupported_types_are_unexpected() {
        let report = run(
            json!({"h": "x", "n": 1}),
            json!([{"name": "h", "type": "hologram"}, {"name": "n", "type": "number"}]),
        );
        assert_eq!(report.params, json!({"n": 1}));
        assert!(warned(&report, "unsupported type 'hologram'"));
    }

    #[test]
    fn media_fields_are_sanitized() {
        let schema = json!([
            {"name": "img", "type": "image"},
            {"name": "clip", "type": "video"},
            {"name": "song", "type": "audio"}
        ]);
        let report = run(
            json!({
                "img": {"path": "images/a\".png", "mime": "text/html", "width": 640,
                        "height": "tall", "alt": "<x>", "onload": "evil()"},
                "clip": [{"path": "v.mp4", "mime": "video/mp4", "quality": {"level": 1}}, "junk"],
                "song": {"path": "a.mp3"}
            }),
            schema,
        );
        assert_eq!(
            report.params,
            json!({
                "img": {"path": "images/a&quot;.png", "width": 640, "alt": "&lt;x&gt;"},
                "clip": [{"path": "v.mp4", "mime": "video/mp4"}]
            })
        );
        assert!(warned(&report, "img.mime: mime type text/html is not image"));
        assert!(warned(&report, "img.onload: unexpected field removed"));
        assert!(warned(&report, "expected a list of audio sources"));
    }

    #[test]
    fn library_fields_recurse_into_installed_semantics() {
        let provider = MemoryStorage::new().with_library(library_with(
            "H5P.Text",
            1,
            json!([{"name": "text", "type": "text", "widget": "html"}]),
        ));
        let schema = semantics(json!([{"name": "items", "type": "list", "field": {
            "name": "item", "type": "library", "options": ["H5P.Text 1.1"]
        }}]));
        let params = json!({"items": [
            {"library": "H5P.Text 1.1", "params": {"text": "<p onclick='x'>a</p>", "junk": 1},
             "subContentId": "6f1d1c2e-7f1b-4b63-9a57-1f6f3b0a2c11", "metadata": {"title": "<t>"}, "extra": 1},
            {"library": "H5P.Text 1.1", "params": {"text": "b"}, "subContentId": "not-a-uuid"},
            {"library": "H5P.Evil 1.0", "params": {"x": "<script>"}}
        ]});

        let report = ContentValidator::new(&provider).validate(params, &schema);
        assert_eq!(
            report.params,
            json!({"items": [
                {"library": "H5P.Text 1.1", "params": {"text": "<p>a</p>"},
                 "subContentId": "6f1d1c2e-7f1b-4b63-9a57-1f6f3b0a2c11", "metadata": {"title": "&lt;t&gt;"}},
                {"library": "H5P.Text 1.1", "params": {"text": "b"}},
                {"library": "H5P.Evil 1.0", "params": {"x": "<script>"}}
            ]})
        );
        assert!(warned(&report, "items[0].params.junk: unexpected field removed"));
        assert!(warned(&report, "items[0].extra"));
        assert!(warned(&report, "H5P.Evil 1.0 is not allowed"));
        assert_eq!(
            report.libraries.into_iter().collect::<Vec<_>>(),
            vec![LibraryIdentity::new("H5P.Text", 1, 1)]
        );
    }

    /// Counts `load_library` calls and forwards everything to the wrapped store.
    struct CountingStorage {
        inner: MemoryStorage,
        loads: AtomicUsize,
    }

    impl StorageProvider for CountingStorage {
        fn name(&self) -> &str {
            "counting"
        }
        fn installed_library(
            &self,
            id: &LibraryIdentity,
        ) -> Result<Option<InstalledLibrary>, StoreError> {
            self.inner.installed_library(id)
        }
        fn is_patched_library(&self, candidate: &LibraryRecord) -> Result<bool, StoreError> {
            self.inner.is_patched_library(candidate)
        }
        fn may_update_library(&self, id: &LibraryIdentity) -> bool {
            self.inner.may_update_library(id)
        }
        fn load_library(&self, id: &LibraryIdentity) -> Result<Option<LibraryRecord>, StoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load_library(id)
        }
        fn validate_content_files(&self, dir: &Path) -> Result<Diagnostics, StoreError> {
            self.inner.validate_content_files(dir)
        }
        fn save_library(
            &self,
            record: &LibraryRecord,
            dependencies: &[DependencyDeclaration],
            files: Option<&Path>,
        ) -> Result<LibraryId, StoreError> {
            self.inner.save_library(record, dependencies, files)
        }
        fn library_dependencies(
            &self,
            id: &LibraryIdentity,
        ) -> Result<Vec<DependencyDeclaration>, StoreError> {
            self.inner.library_dependencies(id)
        }
        fn list_libraries(&self) -> Result<Vec<InstalledLibrary>, StoreError> {
            self.inner.list_libraries()
        }
        fn save_content(
            &self,
            content: &ContentRecord,
            usage: &[LibraryUsage],
            files: Option<&Path>,
        ) -> Result<ContentId, StoreError> {
            self.inner.save_content(content, usage, files)
        }
        fn load_content(&self, id: &ContentId) -> Result<ContentRecord, StoreError> {
            self.inner.load_content(id)
        }
        fn delete_content(&self, id: &ContentId) -> Result<(), StoreError> {
            self.inner.delete_content(id)
        }
        fn content_usage(&self, id: &ContentId) -> Result<Vec<LibraryUsage>, StoreError> {
            self.inner.content_usage(id)
        }
        fn copy_content_usage(&self, from: &ContentId, to: &ContentId) -> Result<(), StoreError> {
            self.inner.copy_content_usage(from, to)
        }
    }

    #[test]
    fn sub_library_semantics_load_once_per_pass() {
        let provider = CountingStorage {
            inner: MemoryStorage::new().with_library(library_with(
                "H5P.Text",
                1,
                json!([{"name": "text", "type": "text"}]),
            )),
            loads: AtomicUsize::new(0),
        };
        let schema = semantics(json!([{"name": "items", "type": "list", "field": {
            "name": "item", "type": "library", "options": ["H5P.Text 1.1"]
        }}]));
        let items: Vec<Value> = (0..5)
            .map(|i| json!({"library": "H5P.Text 1.1", "params": {"text": format!("t{i}")}}))
            .collect();
        let validator = ContentValidator::new(&provider);

        let report = validator.validate(json!({ "items": items.clone() }), &schema);
        assert_eq!(report.params["items"][4]["params"]["text"], "t4");
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);

        validator.validate(json!({ "items": items }), &schema);
        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_sub_library_drops_params() {
        let provider = MemoryStorage::new();
        let schema = semantics(json!([{"name": "sub", "type": "library", "options": ["H5P.Gone 1.0"]}]));
        let report = ContentValidator::new(&provider).validate(
            json!({"sub": {"library": "H5P.Gone 1.0", "params": {"x": 1}}}),
            &schema,
        );
        assert_eq!(report.params, json!({"sub": {"library": "H5P.Gone 1.0", "params": {}}}));
        assert!(warned(&report, "not installed"));
    }

    #[test]
    fn validate_for_library_uses_root_semantics() {
        let provider = MemoryStorage::new().with_library(library_with(
            "H5P.Quiz",
            0,
            json!([{"name": "score", "type": "number", "max": 10}]),
        ));
        let report = ContentValidator::new(&provider)
            .validate_for_library(&LibraryIdentity::new("H5P.Quiz", 1, 0), json!({"score": 50}))
            .unwrap();
        assert_eq!(report.params, json!({"score": 10}));
        assert!(report.libraries.contains(&LibraryIdentity::new("H5P.Quiz", 1, 0)));

        assert!(matches!(
            ContentValidator::new(&provider)
                .validate_for_library(&LibraryIdentity::new("H5P.Nope", 1, 0), json!({})),
            Err(CoreError::MissingLibrary(_))
        ));
    }

    #[test]
    fn hostile_shapes_do_not_panic() {
        let schema = json!([
            {"name": "g", "type": "group", "fields": [{"name": "a", "type": "text"}, {"name": "b", "type": "number"}]},
            {"name": "l", "type": "list", "field": {"name": "x", "type": "image"}},
            {"name": "lib", "type": "library", "options": []}
        ]);
        for params in [
            json!(null),
            json!([1, 2, 3]),
            json!({"g": [], "l": {"a": 1}, "lib": 7}),
            json!({"g": {"a": null, "b": [1]}, "l": [null, 1, "x"], "lib": {"params": 1}}),
        ] {
            let report = run(params, schema.clone());
            assert!(report.params.is_object());
        }
    }
}
