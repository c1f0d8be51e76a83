//! Directory Tests
//!
//! ## Test Scopes
//! - **Master view**: name allocation, duplicate-address rejection, push
//!   flagging.
//! - **Worker view**: list merging, record application, and key routing.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::directory::{MasterDirectory, NetworkAddress, WorkerDirectory, WorkerRecord};
    use crate::dolist::{DoListItem, ItemCore};
    use crate::keyspace::KeyRange;
    use crate::protocol::WorkerNameList;
    use crate::transport::Command;

    struct FlagItem {
        core: ItemCore,
    }

    impl FlagItem {
        fn new() -> Arc<Self> {
            let item = Arc::new(FlagItem {
                core: ItemCore::new(std::time::Duration::from_secs(1)),
            });
            item.core.info_received();
            item
        }
    }

    impl DoListItem for FlagItem {
        fn core(&self) -> &ItemCore {
            &self.core
        }

        fn create_command(&self) -> Option<Command> {
            None
        }
    }

    // ============================================================
    // MASTER VIEW
    // ============================================================

    #[test]
    fn test_name_allocation_is_monotonic() {
        let dir = MasterDirectory::new();

        let a = dir
            .add_worker(NetworkAddress::new("127.0.0.1", 10043))
            .unwrap();
        let b = dir
            .add_worker(NetworkAddress::new("127.0.0.1", 10044))
            .unwrap();

        assert!(b.name() > a.name());
        assert_eq!(dir.names(), vec![a.name(), b.name()]);
    }

    #[test]
    fn test_duplicate_address_rejected_without_renaming() {
        let dir = MasterDirectory::new();
        let addr = NetworkAddress::new("127.0.0.1", 10043);

        let first = dir.add_worker(addr.clone()).unwrap();
        assert!(dir.add_worker(addr.clone()).is_none());

        // The original entry is untouched.
        let entry = dir.get_by_address(&addr).unwrap();
        assert_eq!(entry.name(), first.name());
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_registered_addresses_are_unique() {
        let dir = MasterDirectory::new();
        for port in 10050..10060 {
            dir.add_worker(NetworkAddress::new("127.0.0.1", port));
        }

        let entries = dir.entries();
        for a in &entries {
            for b in &entries {
                if a.name() != b.name() {
                    assert_ne!(a.address(), b.address());
                }
            }
        }
    }

    #[test]
    fn test_list_change_raises_push_flags() {
        let dir = MasterDirectory::new();
        let a = dir
            .add_worker(NetworkAddress::new("127.0.0.1", 10043))
            .unwrap();
        let push_a = FlagItem::new();
        a.set_push_item(push_a.clone() as Arc<dyn DoListItem>);
        assert!(!push_a.core().needs_info());

        // A second registration must re-raise every entry's push flag.
        dir.add_worker(NetworkAddress::new("127.0.0.1", 10044))
            .unwrap();
        assert!(push_a.core().needs_info());

        a.push_sent();
        assert!(!push_a.core().needs_info());
    }

    #[test]
    fn test_bootstrap_range_on_entry() {
        let dir = MasterDirectory::new();
        let a = dir
            .add_worker(NetworkAddress::new("127.0.0.1", 10043))
            .unwrap();
        assert!(!a.range().is_valid());

        a.set_all_inclusive_range();
        let record = a.record();
        assert!(record.range.is_valid());
        assert!(record.range.is_unlimited());
        assert_eq!(record.range.min(), "");
    }

    // ============================================================
    // WORKER VIEW
    // ============================================================

    #[test]
    fn test_name_list_merge_reports_fresh_entries() {
        let dir = WorkerDirectory::new();

        let fresh = dir.receive_name_list(&WorkerNameList {
            total: 2,
            names: vec![1, 2],
        });
        assert_eq!(fresh.len(), 2);
        assert_eq!(dir.len(), 2);

        // A repeat push brings nothing new.
        let fresh = dir.receive_name_list(&WorkerNameList {
            total: 2,
            names: vec![1, 2],
        });
        assert!(fresh.is_empty());
        assert_eq!(dir.total_workers(), 2);
    }

    #[test]
    fn test_stub_entry_has_no_record() {
        let dir = WorkerDirectory::new();
        dir.receive_name_list(&WorkerNameList {
            total: 1,
            names: vec![5],
        });

        let entry = dir.get(5).unwrap();
        assert!(entry.record().is_none());
        assert!(entry.address().is_none());
    }

    #[test]
    fn test_apply_record_fills_entry_and_clears_fetch() {
        let dir = WorkerDirectory::new();
        dir.receive_name_list(&WorkerNameList {
            total: 1,
            names: vec![5],
        });
        let entry = dir.get(5).unwrap();
        let fetch = FlagItem::new();
        fetch.core().set_needs_info();
        entry.set_fetch_item(fetch.clone() as Arc<dyn DoListItem>);

        let mut range = KeyRange::default();
        range.set_all_inclusive();
        dir.apply_record(&WorkerRecord {
            name: 5,
            address: NetworkAddress::new("127.0.0.1", 10043),
            range,
        });

        assert!(entry.record().is_some());
        assert!(!fetch.core().needs_info(), "record receipt clears the fetch");
    }

    #[test]
    fn test_find_worker_for_key_by_range() {
        let dir = WorkerDirectory::new();

        let mut low = KeyRange::default();
        low.set_min_max("", "m", false);
        dir.apply_record(&WorkerRecord {
            name: 1,
            address: NetworkAddress::new("127.0.0.1", 10043),
            range: low,
        });

        let mut high = KeyRange::default();
        high.set_min_max("m", "", true);
        dir.apply_record(&WorkerRecord {
            name: 2,
            address: NetworkAddress::new("127.0.0.1", 10044),
            range: high,
        });

        assert_eq!(dir.find_worker_for_key("alpha").unwrap().name, 1);
        assert_eq!(dir.find_worker_for_key("zulu").unwrap().name, 2);
    }

    #[test]
    fn test_find_worker_ignores_invalid_ranges() {
        let dir = WorkerDirectory::new();
        dir.apply_record(&WorkerRecord {
            name: 1,
            address: NetworkAddress::new("127.0.0.1", 10043),
            range: KeyRange::default(),
        });

        assert!(dir.find_worker_for_key("anything").is_none());
    }

    #[test]
    fn test_name_set_equality_across_caches() {
        let a = WorkerDirectory::new();
        let b = WorkerDirectory::new();
        let list = WorkerNameList {
            total: 3,
            names: vec![1, 2, 3],
        };
        a.receive_name_list(&list);
        b.receive_name_list(&WorkerNameList {
            total: 3,
            names: vec![3, 1, 2],
        });

        assert_eq!(a.name_set(), b.name_set());
    }
}
