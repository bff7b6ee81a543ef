use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::entry::{Entry, RawItem};

/// Entries seen during this session and the watermark gating what counts as new.
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    entries: Vec<Entry>,
    watermark: u64,
    previous_watermark: u64,
    categories: BTreeMap<String, Vec<Entry>>,
}

impl FeedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a fetched batch and return the entries above the old watermark,
    /// sorted by id.
    ///
    /// Items without an id are skipped. Re-ingesting ids at or below the
    /// watermark is a no-op, so feeding the same batch twice only has an
    /// effect the first time.
    pub fn update(&mut self, items: &[RawItem]) -> Vec<Entry> {
        let old = self.watermark;
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();

        for item in items {
            let entry = match Entry::extract_with_id(item) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(title = %item.title, error = %e, "Skipping feed item");
                    continue;
                }
            };
            let Some(id) = entry.id else { continue };
            if id <= old || !seen.insert(id) {
                continue;
            }
            fresh.push(entry);
        }
        fresh.sort_by_key(|e| e.id);

        self.previous_watermark = old;
        if let Some(max) = fresh.last().and_then(|e| e.id) {
            self.watermark = max;
        }

        for entry in &fresh {
            self.categories
                .entry(entry.category.clone())
                .or_default()
                .push(entry.clone());
        }
        self.entries.extend(fresh.iter().cloned());
        self.entries.sort_by_key(|e| e.id);

        debug!(
            fresh = fresh.len(),
            watermark = self.watermark,
            previous = self.previous_watermark,
            "Feed state updated"
        );
        fresh
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Watermark before the most recent [`FeedState::update`].
    pub fn previous_watermark(&self) -> u64 {
        self.previous_watermark
    }

    pub fn categories(&self) -> &BTreeMap<String, Vec<Entry>> {
        &self.categories
    }

    pub fn category(&self, key: &str) -> &[Entry] {
        self.categories.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}
