//! Macro expansion for rule fragments.
//!
//! A macro is a named template: either a bare string (a title pattern) or a
//! table (a partial rule). Using a macro name as a key inside a fragment
//! splices the template in place of that key, with `$1`..`$9` replaced by the
//! key's value. A string template short-circuits the whole fragment into a
//! title-only rule.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use toml::{Table, Value};

use crate::error::ConfigError;

/// Upper bound on nested macro calls.
pub const MAX_EXPANSION_DEPTH: usize = 32;

static RE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\\)?\$([1-9])").unwrap());
static RE_WHOLE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$([1-9])$").unwrap());

/// Result of expanding one fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Expanded {
    /// A string macro consumed the fragment; only a title pattern is left.
    Title(String),
    /// A table with no macro names left among its keys.
    Table(Table),
}

#[derive(Debug, Clone, Default)]
pub struct MacroSet {
    defs: HashMap<String, Value>,
}

impl MacroSet {
    /// Build from the configured `[filter.macros]` table.
    pub fn new(table: &Table) -> Result<Self, ConfigError> {
        let mut defs = HashMap::with_capacity(table.len());
        for (name, def) in table {
            match def {
                Value::String(_) | Value::Table(_) => {
                    defs.insert(name.clone(), def.clone());
                }
                _ => return Err(ConfigError::MalformedMacro(name.clone())),
            }
        }
        Ok(Self { defs })
    }

    /// Expand a raw rule fragment. A bare string is treated as `{title = ...}`.
    pub fn expand(&self, fragment: &Value) -> Result<Expanded, ConfigError> {
        let wrapped;
        let table = match fragment {
            Value::String(s) => {
                wrapped = Table::from_iter([("title".to_string(), Value::String(s.clone()))]);
                &wrapped
            }
            Value::Table(t) => t,
            other => return Err(ConfigError::InvalidRule(other.type_str())),
        };
        self.expand_table(table, &[], &mut Vec::new())
    }

    fn expand_table(
        &self,
        table: &Table,
        args: &[Value],
        active: &mut Vec<String>,
    ) -> Result<Expanded, ConfigError> {
        if active.len() > MAX_EXPANSION_DEPTH {
            return Err(ConfigError::ExpansionTooDeep(MAX_EXPANSION_DEPTH));
        }

        let mut out = Table::new();
        for (key, value) in table {
            // Outer arguments first, so a macro can forward its own `$n` to another.
            let value = substitute(value, args)?;
            let Some(def) = self.defs.get(key) else {
                out.insert(key.clone(), value);
                continue;
            };

            if active.iter().any(|name| name == key) {
                let mut chain = active.clone();
                chain.push(key.clone());
                return Err(ConfigError::MacroCycle(chain));
            }

            let call_args = arguments(&value);
            match def {
                Value::String(template) => {
                    return substitute_str(template, &call_args).map(Expanded::Title);
                }
                Value::Table(body) => {
                    active.push(key.clone());
                    let inner = self.expand_table(body, &call_args, active)?;
                    active.pop();
                    match inner {
                        Expanded::Title(title) => return Ok(Expanded::Title(title)),
                        Expanded::Table(fields) => {
                            for (k, v) in fields {
                                out.insert(k, v);
                            }
                        }
                    }
                }
                _ => return Err(ConfigError::MalformedMacro(key.clone())),
            }
        }
        Ok(Expanded::Table(out))
    }
}

/// A scalar argument is a one-element list.
fn arguments(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Replace placeholders throughout a value. A string that is exactly `$n`
/// takes the argument as-is, keeping its type.
pub fn substitute(value: &Value, args: &[Value]) -> Result<Value, ConfigError> {
    Ok(match value {
        Value::String(s) => match RE_WHOLE_PLACEHOLDER.captures(s) {
            Some(caps) => argument(args, placeholder_index(&caps[1]))?.clone(),
            None => Value::String(substitute_str(s, args)?),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute(v, args))
                .collect::<Result<_, _>>()?,
        ),
        Value::Table(table) => {
            let mut out = Table::new();
            for (k, v) in table {
                out.insert(k.clone(), substitute(v, args)?);
            }
            Value::Table(out)
        }
        other => other.clone(),
    })
}

/// Textual placeholder replacement. `\$n` is left alone.
pub fn substitute_str(template: &str, args: &[Value]) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in RE_PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        if caps.get(1).is_some() {
            continue;
        }
        let index = placeholder_index(&caps[2]);
        out.push_str(&template[last..whole.start()]);
        out.push_str(&splice_text(argument(args, index)?, index)?);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

fn placeholder_index(digit: &str) -> usize {
    digit.parse().unwrap_or(0)
}

fn argument(args: &[Value], index: usize) -> Result<&Value, ConfigError> {
    index
        .checked_sub(1)
        .and_then(|i| args.get(i))
        .ok_or(ConfigError::MissingArgument {
            index,
            supplied: args.len(),
        })
}

fn splice_text(value: &Value, index: usize) -> Result<String, ConfigError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Integer(n) => Ok(n.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Datetime(d) => Ok(d.to_string()),
        other => Err(ConfigError::InvalidValue {
            selector: format!("${index}"),
            reason: format!("cannot splice {} into text", other.type_str()),
        }),
    }
}
