use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::dolist::DoListItem;
use crate::keyspace::KeyRange;
use crate::protocol::WorkerNameList;

use super::types::{NetworkAddress, WorkerRecord};

/// One worker as cached by a peer worker.
///
/// Entries are created from the master's name-list push knowing nothing but
/// the name; address and range arrive later through a per-name record fetch.
pub struct WorkerEntry {
    name: u32,
    info: Mutex<Option<(NetworkAddress, KeyRange)>>,
    /// The do-list item fetching this entry's record from the master.
    fetch_item: Mutex<Option<Arc<dyn DoListItem>>>,
}

impl WorkerEntry {
    fn new(name: u32) -> Arc<Self> {
        Arc::new(WorkerEntry {
            name,
            info: Mutex::new(None),
            fetch_item: Mutex::new(None),
        })
    }

    pub fn name(&self) -> u32 {
        self.name
    }

    pub fn address(&self) -> Option<NetworkAddress> {
        self.info.lock().unwrap().as_ref().map(|(a, _)| a.clone())
    }

    pub fn range(&self) -> Option<KeyRange> {
        self.info.lock().unwrap().as_ref().map(|(_, r)| r.clone())
    }

    pub fn record(&self) -> Option<WorkerRecord> {
        self.info
            .lock()
            .unwrap()
            .as_ref()
            .map(|(address, range)| WorkerRecord {
                name: self.name,
                address: address.clone(),
                range: range.clone(),
            })
    }

    pub fn set_fetch_item(&self, item: Arc<dyn DoListItem>) {
        *self.fetch_item.lock().unwrap() = Some(item);
    }

    fn update(&self, address: NetworkAddress, range: KeyRange) {
        *self.info.lock().unwrap() = Some((address, range));
        if let Some(item) = self.fetch_item.lock().unwrap().as_ref() {
            item.core().info_received();
        }
    }
}

/// A worker's cache of the cluster directory.
///
/// Eventually consistent: it holds whatever subset of the master's list has
/// reached this worker so far. Request routing tolerates the lag by dropping
/// what it cannot route and letting the client retry.
pub struct WorkerDirectory {
    entries: DashMap<u32, Arc<WorkerEntry>>,
    /// Worker count according to the master; may exceed the entry count
    /// while records are still being fetched.
    total_workers: AtomicU32,
}

impl WorkerDirectory {
    pub fn new() -> Self {
        WorkerDirectory {
            entries: DashMap::new(),
            total_workers: AtomicU32::new(0),
        }
    }

    /// Merges a name-list push from the master. Returns the entries that are
    /// new to this cache so the caller can arm record fetches for them.
    pub fn receive_name_list(&self, list: &WorkerNameList) -> Vec<Arc<WorkerEntry>> {
        self.total_workers.store(list.total, Ordering::Relaxed);

        let mut fresh = Vec::new();
        for &name in &list.names {
            if !self.entries.contains_key(&name) {
                let entry = WorkerEntry::new(name);
                self.entries.insert(name, entry.clone());
                fresh.push(entry);
            }
        }
        if !fresh.is_empty() {
            tracing::info!(
                "Worker list grew by {} entries ({} known, {} total per master)",
                fresh.len(),
                self.entries.len(),
                list.total
            );
        }
        fresh
    }

    /// Applies one full worker record, creating the entry if the list push
    /// has not arrived yet.
    pub fn apply_record(&self, record: &WorkerRecord) -> Arc<WorkerEntry> {
        let entry = self
            .entries
            .entry(record.name)
            .or_insert_with(|| WorkerEntry::new(record.name))
            .clone();
        entry.update(record.address.clone(), record.range.clone());
        tracing::debug!("Directory cache updated: {}", record);
        entry
    }

    pub fn get(&self, name: u32) -> Option<Arc<WorkerEntry>> {
        self.entries.get(&name).map(|e| e.value().clone())
    }

    /// The worker whose valid range covers `key`, if this cache knows one.
    pub fn find_worker_for_key(&self, key: &str) -> Option<WorkerRecord> {
        for entry in self.entries.iter() {
            if let Some(record) = entry.value().record() {
                if record.range.in_range(key) {
                    return Some(record);
                }
            }
        }
        None
    }

    /// The known names, for convergence checks between caches.
    pub fn name_set(&self) -> BTreeSet<u32> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_workers(&self) -> u32 {
        self.total_workers.load(Ordering::Relaxed)
    }
}

impl Default for WorkerDirectory {
    fn default() -> Self {
        Self::new()
    }
}
