//! Per-tab history of matched actions
//!
//! Each tab maps to its records in chronological order. A tab without records
//! is absent from the map. Only navigation compaction removes individual
//! records; everything else appends or drops the whole sequence.

use std::collections::HashMap;

use crate::types::{TabId, TabRecord};

#[derive(Debug, Default)]
pub struct TabRecordStore {
    tabs: HashMap<TabId, Vec<TabRecord>>,
}

impl TabRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return the tab's new record count.
    pub fn add(&mut self, tab_id: TabId, record: TabRecord) -> usize {
        let records = self.tabs.entry(tab_id).or_default();
        records.push(record);
        records.len()
    }

    pub fn has(&self, tab_id: TabId) -> bool {
        self.tabs.contains_key(&tab_id)
    }

    /// Current records of a tab, oldest first. Empty for unknown tabs.
    pub fn get(&self, tab_id: TabId) -> &[TabRecord] {
        self.tabs.get(&tab_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, tab_id: TabId) -> usize {
        self.get(tab_id).len()
    }

    pub fn remove_tab_records(&mut self, tab_id: TabId) {
        self.tabs.remove(&tab_id);
    }

    /// Replace a tab's records. An empty sequence removes the tab.
    pub fn set_tab_records(&mut self, tab_id: TabId, records: Vec<TabRecord>) {
        if records.is_empty() {
            self.tabs.remove(&tab_id);
        } else {
            self.tabs.insert(tab_id, records);
        }
    }

    pub fn tab_ids(&self) -> impl Iterator<Item = TabId> + '_ {
        self.tabs.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn clear(&mut self) {
        self.tabs.clear();
    }

    /// Records that still explain a navigation to `url`, without modifying
    /// the store. Always a suffix of the tab's records.
    pub fn last_redirect_records(&self, tab_id: TabId, url: &str, is_server_redirect: bool) -> &[TabRecord] {
        let records = self.get(tab_id);
        &records[surviving_start(records, url, is_server_redirect)..]
    }

    /// Trim a tab's records to those explaining the navigation that just
    /// committed and return the survivors. An empty result means the tab was
    /// removed from the store.
    pub fn compact_on_navigation(&mut self, tab_id: TabId, url: &str, is_server_redirect: bool) -> &[TabRecord] {
        let kept = self.last_redirect_records(tab_id, url, is_server_redirect).to_vec();
        self.set_tab_records(tab_id, kept);
        self.get(tab_id)
    }
}

/// Index where the suffix of `records` explaining a commit to `url` starts.
/// `records.len()` when nothing survives.
///
/// The newest record must target `url`. A client-side commit keeps the run of
/// records targeting `url` directly. A server redirect keeps following the
/// chain backwards while each record's target is the url of the hop after it.
fn surviving_start(records: &[TabRecord], url: &str, is_server_redirect: bool) -> usize {
    let last = match records.last() {
        Some(last) if last.target.as_deref() == Some(url) => last,
        _ => return records.len(),
    };

    let mut start = records.len() - 1;
    let mut hop = last.url.as_str();

    while start > 0 {
        let prev = &records[start - 1];
        let target = match prev.target.as_deref() {
            Some(target) => target,
            None => break,
        };
        let links = if is_server_redirect {
            target == hop || target == url
        } else {
            target == url
        };
        if !links {
            break;
        }
        if target == hop {
            hop = prev.url.as_str();
        }
        start -= 1;
    }

    start
}
