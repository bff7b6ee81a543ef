//! Classification derived from a rule's named captures.
//!
//! An [`Info`] says which logical content an entry carries (`name` + `ep`)
//! and which rendition of it (`ver`, `res`, `bit`, ...). Two entries with the
//! same identity are ranked against each other with a [`TieBreakOrder`] that
//! the caller passes in explicitly.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::RangeInclusive;

use serde::Serialize;

use crate::error::ConfigError;

/// Value used for numeric keys the capture did not provide.
pub const MISSING: i64 = -1;

/// Keys an [`Info`] exposes to rules and to the tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoKey {
    Name,
    Ep,
    EndEp,
    Eps,
    Ver,
    Crc,
    Group,
    Res,
    Bit,
}

impl InfoKey {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "name" => Self::Name,
            "ep" => Self::Ep,
            "endep" => Self::EndEp,
            "eps" => Self::Eps,
            "ver" => Self::Ver,
            "crc" => Self::Crc,
            "group" => Self::Group,
            "res" => Self::Res,
            "bit" => Self::Bit,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Ep => "ep",
            Self::EndEp => "endep",
            Self::Eps => "eps",
            Self::Ver => "ver",
            Self::Crc => "crc",
            Self::Group => "group",
            Self::Res => "res",
            Self::Bit => "bit",
        }
    }

    /// Whether rule values for this key are compared as integers.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Ep | Self::EndEp | Self::Eps | Self::Ver | Self::Res | Self::Bit
        )
    }
}

impl std::fmt::Display for InfoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single Info attribute, typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoValue<'a> {
    Text(Option<&'a str>),
    Int(i64),
    Range(RangeInclusive<i64>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Info {
    pub name: String,
    pub ep: i64,
    pub endep: i64,
    pub ver: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub res: i64,
    pub bit: i64,
}

impl Info {
    /// Build from capture text keyed by group name. Numeric keys that were
    /// not captured default to [`MISSING`]; `endep` defaults to `ep`.
    pub fn from_captures(captures: &HashMap<String, Option<String>>) -> Self {
        let text = |key: InfoKey| -> Option<&str> {
            captures
                .get(key.name())
                .and_then(|v| v.as_deref())
                .map(str::trim)
        };
        let int = |key: InfoKey| text(key).and_then(coerce_int);

        let ep = int(InfoKey::Ep).unwrap_or(MISSING);
        Self {
            name: text(InfoKey::Name).unwrap_or_default().to_string(),
            ep,
            endep: int(InfoKey::EndEp).unwrap_or(ep),
            ver: int(InfoKey::Ver).unwrap_or(MISSING),
            crc: text(InfoKey::Crc).map(str::to_string),
            group: text(InfoKey::Group).map(str::to_string),
            res: int(InfoKey::Res).unwrap_or(MISSING),
            bit: int(InfoKey::Bit).unwrap_or(MISSING),
        }
    }

    /// Whether a `name` was captured. Only such Info is attached to entries.
    pub fn has_identity(&self) -> bool {
        !self.name.is_empty()
    }

    /// Inclusive episode range covered by this release.
    pub fn eps(&self) -> RangeInclusive<i64> {
        self.ep..=self.endep
    }

    /// Grouping identity for version selection.
    pub fn identity(&self) -> (&str, i64) {
        (&self.name, self.ep)
    }

    pub fn get(&self, key: InfoKey) -> InfoValue<'_> {
        match key {
            InfoKey::Name => InfoValue::Text(Some(&self.name)),
            InfoKey::Ep => InfoValue::Int(self.ep),
            InfoKey::EndEp => InfoValue::Int(self.endep),
            InfoKey::Eps => InfoValue::Range(self.eps()),
            InfoKey::Ver => InfoValue::Int(self.ver),
            InfoKey::Crc => InfoValue::Text(self.crc.as_deref()),
            InfoKey::Group => InfoValue::Text(self.group.as_deref()),
            InfoKey::Res => InfoValue::Int(self.res),
            InfoKey::Bit => InfoValue::Int(self.bit),
        }
    }

    /// Compare `name`, then `ep`, then each tie-break key in order.
    pub fn compare(&self, other: &Self, order: &TieBreakOrder) -> Ordering {
        self.name
            .cmp(&other.name)
            .then(self.ep.cmp(&other.ep))
            .then_with(|| {
                order
                    .keys()
                    .iter()
                    .map(|&key| compare_values(self.get(key), other.get(key)))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            })
    }
}

fn compare_values(a: InfoValue<'_>, b: InfoValue<'_>) -> Ordering {
    match (a, b) {
        (InfoValue::Text(a), InfoValue::Text(b)) => a.cmp(&b),
        (InfoValue::Int(a), InfoValue::Int(b)) => a.cmp(&b),
        (InfoValue::Range(a), InfoValue::Range(b)) => a
            .start()
            .cmp(b.start())
            .then(a.end().cmp(b.end())),
        // Same key always yields the same variant.
        _ => Ordering::Equal,
    }
}

/// Leading-integer parse: "05" → 5, "2v" → 2, "v2" → None.
pub fn coerce_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Ordered Info keys used to rank releases that share `(name, ep)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TieBreakOrder(Vec<InfoKey>);

impl TieBreakOrder {
    pub fn new(keys: Vec<InfoKey>) -> Self {
        Self(keys)
    }

    /// Resolve configured key names, rejecting anything that is not an Info key.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        names
            .iter()
            .map(|n| {
                let n = n.as_ref();
                InfoKey::from_name(n).ok_or_else(|| ConfigError::UnknownTieBreakKey(n.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn keys(&self) -> &[InfoKey] {
        &self.0
    }
}
