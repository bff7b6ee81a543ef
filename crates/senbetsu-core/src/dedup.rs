use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::entry::Entry;
use crate::info::{Info, TieBreakOrder};

/// Keep the best release of every `(name, ep)` group.
///
/// Entries without Info pass through untouched. Within a group the entry
/// whose Info compares greatest under `order` survives; on a full tie the
/// one seen last in `entries` wins. Output is sorted by id.
pub fn select_versions(entries: Vec<Entry>, order: &TieBreakOrder) -> Vec<Entry> {
    let mut selected: Vec<Entry> = Vec::with_capacity(entries.len());
    let mut groups: HashMap<(String, i64), (Info, Entry)> = HashMap::new();

    for mut entry in entries {
        let Some(info) = entry.info.take() else {
            selected.push(entry);
            continue;
        };
        let (name, ep) = info.identity();
        let key = (name.to_string(), ep);

        let winner = match groups.remove(&key) {
            None => (info, entry),
            Some(best) => pick(best, (info, entry), order),
        };
        groups.insert(key, winner);
    }

    selected.extend(groups.into_values().map(|(info, mut entry)| {
        entry.info = Some(info);
        entry
    }));
    selected.sort_by_key(|e| e.id);
    selected
}

/// The better of two releases; `challenger` wins ties.
fn pick(best: (Info, Entry), challenger: (Info, Entry), order: &TieBreakOrder) -> (Info, Entry) {
    match challenger.0.compare(&best.0, order) {
        Ordering::Less => {
            debug!(kept = %best.1.label(), dropped = %challenger.1.label(), "Older version dropped");
            best
        }
        Ordering::Greater => {
            debug!(kept = %challenger.1.label(), dropped = %best.1.label(), "Superseded version dropped");
            challenger
        }
        Ordering::Equal => {
            debug!(
                kept = %challenger.1.label(),
                dropped = %best.1.label(),
                "Versions tie on every key, keeping the later one"
            );
            challenger
        }
    }
}
