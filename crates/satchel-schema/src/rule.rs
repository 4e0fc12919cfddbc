use regex::Regex;
use serde_json::Value;

/// How one manifest field is checked.
#[derive(Debug, Clone)]
pub enum SchemaRule {
    /// String or integer whose textual form must match the pattern.
    Pattern(Regex),
    /// Strict JSON boolean.
    Boolean,
    /// Scalar or list; every element must be one of these literals.
    Options(Vec<Value>),
    /// An object, or a list of objects, each checked against every rule of the sub-schema.
    Nested(Schema),
}

impl SchemaRule {
    /// Compile a pattern rule. Only for patterns known at build time.
    pub fn pattern(pattern: &str) -> Self {
        SchemaRule::Pattern(Regex::new(pattern).expect("built-in schema pattern is valid"))
    }

    pub fn options<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Value>,
    {
        SchemaRule::Options(values.into_iter().map(Into::into).collect())
    }
}

/// Ordered field-name → rule table. Order decides diagnostic order.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    rules: Vec<(String, SchemaRule)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, rule: SchemaRule) -> Self {
        self.rules.push((key.into(), rule));
        self
    }

    pub fn get(&self, key: &str) -> Option<&SchemaRule> {
        self.rules
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, rule)| rule)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaRule)> {
        self.rules.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
