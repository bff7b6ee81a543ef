pub mod config;
pub mod dedup;
pub mod entry;
pub mod error;
pub mod feed;
pub mod filter;
pub mod info;
pub mod pipeline;
pub mod rules;

pub use config::{AppConfig, FilterConfig};
pub use entry::{Entry, RawItem};
pub use error::{ConfigError, ExtractionError, SenbetsuError};
pub use feed::FeedState;
pub use filter::RuleSet;
pub use info::{Info, InfoKey, TieBreakOrder};
pub use pipeline::{EntrySink, Pipeline, RefreshReport};
