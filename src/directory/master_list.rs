use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::dolist::DoListItem;
use crate::keyspace::KeyRange;

use super::types::{NetworkAddress, WorkerRecord};

/// One worker as the master sees it.
pub struct MasterEntry {
    name: u32,
    address: NetworkAddress,
    range: Mutex<KeyRange>,
    last_contact: Mutex<Instant>,
    /// The do-list item that pushes the worker list to this worker. Its
    /// needs-info flag is the entry's needs-push flag.
    push_item: Mutex<Option<Arc<dyn DoListItem>>>,
}

impl MasterEntry {
    fn new(name: u32, address: NetworkAddress) -> Arc<Self> {
        Arc::new(MasterEntry {
            name,
            address,
            range: Mutex::new(KeyRange::default()),
            last_contact: Mutex::new(Instant::now()),
            push_item: Mutex::new(None),
        })
    }

    pub fn name(&self) -> u32 {
        self.name
    }

    pub fn address(&self) -> &NetworkAddress {
        &self.address
    }

    pub fn range(&self) -> KeyRange {
        self.range.lock().unwrap().clone()
    }

    pub fn set_range(&self, range: KeyRange) {
        *self.range.lock().unwrap() = range;
    }

    /// Bootstrap: hand this worker the whole keyspace.
    pub fn set_all_inclusive_range(&self) {
        self.range.lock().unwrap().set_all_inclusive();
        tracing::info!("Set all-inclusive range for name={}", self.name);
    }

    pub fn record(&self) -> WorkerRecord {
        WorkerRecord {
            name: self.name,
            address: self.address.clone(),
            range: self.range(),
        }
    }

    /// Attaches the list-push do-list item once the master service creates it.
    pub fn set_push_item(&self, item: Arc<dyn DoListItem>) {
        *self.push_item.lock().unwrap() = Some(item);
    }

    /// Raises the needs-push flag.
    pub fn flag_push(&self) {
        if let Some(item) = self.push_item.lock().unwrap().as_ref() {
            item.core().set_needs_info();
        }
    }

    /// The push is assumed delivered once sent; the worker will ask again if
    /// it was not.
    pub fn push_sent(&self) {
        if let Some(item) = self.push_item.lock().unwrap().as_ref() {
            item.core().info_received();
        }
    }

    /// Stamps the entry as freshly heard from.
    pub fn touch(&self) {
        *self.last_contact.lock().unwrap() = Instant::now();
    }

    pub fn last_contact(&self) -> Instant {
        *self.last_contact.lock().unwrap()
    }
}

impl std::fmt::Display for MasterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "name={} address={} range={}",
            self.name,
            self.address,
            self.range()
        )
    }
}

struct DirInner {
    name_map: BTreeMap<u32, Arc<MasterEntry>>,
    addr_map: HashMap<NetworkAddress, Arc<MasterEntry>>,
    next_name: u32,
}

/// The authoritative worker list.
///
/// Two maps point at the same entries so both name and address lookups are
/// direct; one lock keeps them consistent. Names come from a monotonic
/// counter and are never reused or reassigned.
pub struct MasterDirectory {
    inner: Mutex<DirInner>,
}

impl MasterDirectory {
    pub fn new() -> Self {
        MasterDirectory {
            inner: Mutex::new(DirInner {
                name_map: BTreeMap::new(),
                addr_map: HashMap::new(),
                next_name: 1,
            }),
        }
    }

    /// Registers a worker. A fresh address gets a new name and entry; a
    /// known address is rejected so a re-registering worker keeps its name.
    pub fn add_worker(&self, address: NetworkAddress) -> Option<Arc<MasterEntry>> {
        let entry = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(existing) = inner.addr_map.get(&address) {
                tracing::warn!(
                    "Could not add worker, address already registered as name={}: {}",
                    existing.name(),
                    address
                );
                existing.touch();
                return None;
            }
            let name = inner.next_name;
            inner.next_name += 1;
            let entry = MasterEntry::new(name, address.clone());
            inner.name_map.insert(name, entry.clone());
            inner.addr_map.insert(address, entry.clone());
            entry
        };
        tracing::info!("Added worker {}", entry);
        self.flag_list_changed();
        Some(entry)
    }

    pub fn get_named(&self, name: u32) -> Option<Arc<MasterEntry>> {
        self.inner.lock().unwrap().name_map.get(&name).cloned()
    }

    pub fn get_by_address(&self, address: &NetworkAddress) -> Option<Arc<MasterEntry>> {
        self.inner.lock().unwrap().addr_map.get(address).cloned()
    }

    pub fn entries(&self) -> Vec<Arc<MasterEntry>> {
        self.inner
            .lock()
            .unwrap()
            .name_map
            .values()
            .cloned()
            .collect()
    }

    /// Names in ascending order, ready for a list push.
    pub fn names(&self) -> Vec<u32> {
        self.inner.lock().unwrap().name_map.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().name_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().name_map.is_empty()
    }

    /// Raises the needs-push flag on every entry. Called whenever the list
    /// (or anything the list conveys, like a range) changes.
    pub fn flag_list_changed(&self) {
        for entry in self.entries() {
            entry.flag_push();
        }
    }
}

impl Default for MasterDirectory {
    fn default() -> Self {
        Self::new()
    }
}
