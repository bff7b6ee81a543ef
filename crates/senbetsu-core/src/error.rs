use thiserror::Error;

/// Which rule list a compiled rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleList {
    Deny,
    Accept,
}

impl std::fmt::Display for RuleList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deny => write!(f, "deny"),
            Self::Accept => write!(f, "accept"),
        }
    }
}

/// A broken rule set or config file. Always fatal for the reload that hit it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("macro cycle: {}", .0.join(" -> "))]
    MacroCycle(Vec<String>),

    #[error("macro expansion nested deeper than {0} levels")]
    ExpansionTooDeep(usize),

    #[error("placeholder ${index} has no argument ({supplied} supplied)")]
    MissingArgument { index: usize, supplied: usize },

    #[error("macro `{0}` must be a string or a table")]
    MalformedMacro(String),

    #[error("invalid regex for `{selector}`: {source}")]
    Regex {
        selector: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid value for `{selector}`: {reason}")]
    InvalidValue { selector: String, reason: String },

    #[error("rule must be a string or a table, got {0}")]
    InvalidRule(&'static str),

    #[error("selector `{0}` is neither an entry field nor a named capture")]
    UnknownSelector(String),

    #[error("unknown tie-break key `{0}`")]
    UnknownTieBreakKey(String),

    #[error("{list} rule #{index}: {source}")]
    Rule {
        list: RuleList,
        index: usize,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("{list} rule #{index} on entry {entry}: {source}")]
    Evaluation {
        list: RuleList,
        index: usize,
        entry: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A feed item that cannot be turned into a usable entry.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("guid `{guid}` carries no numeric id")]
    MissingId { guid: String },
}

#[derive(Debug, Error)]
pub enum SenbetsuError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
