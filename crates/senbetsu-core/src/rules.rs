//! Rule compilation: macro-expanded fragments become typed conditions.

pub mod macros;

use regex::{Regex, RegexBuilder};
use toml::Value;

use crate::entry::EntryField;
use crate::error::{ConfigError, RuleList};
use crate::info::{coerce_int, InfoKey};

pub use macros::{Expanded, MacroSet};

/// A literal value from the config, compared in its stringified form.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn from_value(selector: &str, value: &Value) -> Result<Self, ConfigError> {
        Ok(match value {
            Value::String(s) => Self::Str(s.clone()),
            Value::Integer(n) => Self::Int(*n),
            Value::Float(f) => Self::Float(*f),
            Value::Boolean(b) => Self::Bool(*b),
            Value::Datetime(d) => Self::Str(d.to_string()),
            other => {
                return Err(ConfigError::InvalidValue {
                    selector: selector.to_string(),
                    reason: format!("expected a scalar, got {}", other.type_str()),
                })
            }
        })
    }

    /// Integer form used when comparing against numeric Info keys.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(s) => coerce_int(s),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// What a set or regex condition reads: an entry field or a capture group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Field(EntryField),
    Capture(String),
}

impl Target {
    fn resolve(key: &str) -> Self {
        match EntryField::from_name(key) {
            Some(field) => Self::Field(field),
            None => Self::Capture(key.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Field(field) => field.name(),
            Self::Capture(name) => name,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Condition {
    /// Entry field equals a literal.
    LiteralMatch { field: EntryField, value: Scalar },
    /// Target equals one of several literals.
    SetMatch { target: Target, values: Vec<Scalar> },
    /// Target matches a regex; the match supplies named captures.
    RegexMatch { target: Target, regex: Regex },
    /// A non-field key with a literal, checked against captures and Info.
    CaptureGate { name: String, value: Scalar },
}

impl Condition {
    pub fn selector(&self) -> &str {
        match self {
            Self::LiteralMatch { field, .. } => field.name(),
            Self::SetMatch { target, .. } | Self::RegexMatch { target, .. } => target.name(),
            Self::CaptureGate { name, .. } => name,
        }
    }

    fn reads_field(&self) -> bool {
        match self {
            Self::LiteralMatch { .. } => true,
            Self::SetMatch { target, .. } | Self::RegexMatch { target, .. } => {
                matches!(target, Target::Field(_))
            }
            Self::CaptureGate { .. } => false,
        }
    }
}

/// A fully expanded, compiled rule. All conditions must hold.
#[derive(Debug, Clone)]
pub struct Rule {
    pub conditions: Vec<Condition>,
}

impl Rule {
    /// Compile one raw fragment after macro expansion.
    pub fn compile(macros: &MacroSet, fragment: &Value) -> Result<Self, ConfigError> {
        match macros.expand(fragment)? {
            Expanded::Title(pattern) => Ok(Self {
                conditions: vec![Condition::RegexMatch {
                    target: Target::Field(EntryField::Title),
                    regex: compile_regex("title", &pattern)?,
                }],
            }),
            Expanded::Table(table) => {
                let mut conditions = table
                    .iter()
                    .map(|(key, value)| compile_condition(key, value))
                    .collect::<Result<Vec<_>, _>>()?;
                // Field conditions first so the title match is recorded before
                // any capture is consulted. The sort is stable.
                conditions.sort_by_key(|c| !c.reads_field());
                Ok(Self { conditions })
            }
        }
    }

    /// The regex applied to the title, if any.
    pub fn title_regex(&self) -> Option<&Regex> {
        self.conditions.iter().find_map(|c| match c {
            Condition::RegexMatch {
                target: Target::Field(EntryField::Title),
                regex,
            } => Some(regex),
            _ => None,
        })
    }
}

/// Compile a whole rule list, tagging errors with the list and index.
pub fn compile_rules(
    macros: &MacroSet,
    fragments: &[Value],
    list: RuleList,
) -> Result<Vec<Rule>, ConfigError> {
    fragments
        .iter()
        .enumerate()
        .map(|(index, fragment)| {
            Rule::compile(macros, fragment).map_err(|e| ConfigError::Rule {
                list,
                index,
                source: Box::new(e),
            })
        })
        .collect()
}

fn compile_condition(key: &str, value: &Value) -> Result<Condition, ConfigError> {
    if key == EntryField::Title.name() {
        let pattern = match value {
            Value::String(s) => s.clone(),
            other => Scalar::from_value(key, other)?.to_string(),
        };
        return Ok(Condition::RegexMatch {
            target: Target::Field(EntryField::Title),
            regex: compile_regex(key, &pattern)?,
        });
    }

    match value {
        Value::String(s) if split_regex_literal(s).is_some() => Ok(Condition::RegexMatch {
            target: Target::resolve(key),
            regex: compile_regex(key, s)?,
        }),
        Value::Array(items) => Ok(Condition::SetMatch {
            target: Target::resolve(key),
            values: items
                .iter()
                .map(|v| Scalar::from_value(key, v))
                .collect::<Result<_, _>>()?,
        }),
        Value::Table(_) => Err(ConfigError::InvalidValue {
            selector: key.to_string(),
            reason: "nested table is not a macro".into(),
        }),
        scalar => {
            let value = Scalar::from_value(key, scalar)?;
            match EntryField::from_name(key) {
                Some(field) => Ok(Condition::LiteralMatch { field, value }),
                None => {
                    if InfoKey::from_name(key).is_some_and(InfoKey::is_numeric)
                        && value.as_int().is_none()
                    {
                        return Err(ConfigError::InvalidValue {
                            selector: key.to_string(),
                            reason: format!("`{value}` is not an integer"),
                        });
                    }
                    Ok(Condition::CaptureGate {
                        name: key.to_string(),
                        value,
                    })
                }
            }
        }
    }
}

/// Split `/pattern/flags` into its parts. Flags are limited to `imsx`.
fn split_regex_literal(s: &str) -> Option<(&str, &str)> {
    let rest = s.strip_prefix('/')?;
    let close = rest.rfind('/')?;
    let (pattern, flags) = (&rest[..close], &rest[close + 1..]);
    flags
        .chars()
        .all(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .then_some((pattern, flags))
}

/// Compile a selector value as a regex, honouring `/.../flags` when present.
pub fn compile_regex(selector: &str, source: &str) -> Result<Regex, ConfigError> {
    let (pattern, flags) = split_regex_literal(source).unwrap_or((source, ""));
    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
        .map_err(|source| ConfigError::Regex {
            selector: selector.to_string(),
            source,
        })
}
