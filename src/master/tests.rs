//! Master Controller Tests
//!
//! ## Test Scopes
//! - **Registration**: name assignment, first-worker bootstrap range,
//!   duplicate addresses.
//! - **Dispatch**: unknown and unexpected kinds produce parse-error replies
//!   and count against the process error counter.

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use crate::codec::{MsgBuffer, MsgEnvelope};
    use crate::directory::NetworkAddress;
    use crate::keyspace::KeyRange;
    use crate::master::MasterService;
    use crate::protocol::{retrieve_payload, MsgKind, MsgReceivedInfo, MsgStatus};
    use crate::transport::MsgHandler;

    fn fake_src() -> SocketAddr {
        "127.0.0.1:49999".parse().unwrap()
    }

    // ============================================================
    // REGISTRATION
    // ============================================================

    #[tokio::test]
    async fn test_first_worker_gets_all_inclusive_range() {
        let master = MasterService::new("127.0.0.1", 0).await.unwrap();

        master
            .add_worker(NetworkAddress::new("127.0.0.1", 10043))
            .await;
        master
            .add_worker(NetworkAddress::new("127.0.0.1", 10044))
            .await;

        let entries = master.directory().entries();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert!(first.range().is_valid());
        assert!(first.range().is_unlimited());

        let second = &entries[1];
        assert!(!second.range().is_valid(), "only the first worker is seeded");
    }

    #[tokio::test]
    async fn test_reregistration_keeps_name_and_range() {
        let master = MasterService::new("127.0.0.1", 0).await.unwrap();
        let addr = NetworkAddress::new("127.0.0.1", 10043);

        master.add_worker(addr.clone()).await;
        let name = master.directory().get_by_address(&addr).unwrap().name();

        // Workers re-send registration until they learn their name.
        master.add_worker(addr.clone()).await;
        let entry = master.directory().get_by_address(&addr).unwrap();
        assert_eq!(entry.name(), name);
        assert!(entry.range().is_unlimited());
        assert_eq!(master.directory().len(), 1);
    }

    #[tokio::test]
    async fn test_set_worker_range() {
        let master = MasterService::new("127.0.0.1", 0).await.unwrap();
        master
            .add_worker(NetworkAddress::new("127.0.0.1", 10043))
            .await;
        let name = master.directory().names()[0];

        let mut range = KeyRange::default();
        range.set_min_max("", "m", false);
        assert!(master.set_worker_range(name, range.clone()));
        assert_eq!(master.directory().get_named(name).unwrap().range(), range);

        assert!(!master.set_worker_range(name + 100, range));
    }

    // ============================================================
    // DISPATCH
    // ============================================================

    #[tokio::test]
    async fn test_unknown_kind_counts_and_replies_parse_err() {
        let master = MasterService::new("127.0.0.1", 0).await.unwrap();
        let env = MsgEnvelope::new(60200, 17, "127.0.0.1", 49999);

        let reply = master
            .handle_msg(env, MsgBuffer::new(), fake_src())
            .await
            .expect("unknown kind must be answered");
        assert_eq!(master.err_count(), 1);

        let mut reply = reply;
        let out_env = MsgEnvelope::parse_from(&mut reply).unwrap();
        assert_eq!(out_env.kind, MsgKind::MsgReceived as u16);
        let info: MsgReceivedInfo = retrieve_payload(&mut reply).unwrap();
        assert_eq!(info.status, MsgStatus::ParseErr);
        assert_eq!(info.original_id, 17);
        assert_eq!(info.original_kind, 60200);
    }

    #[tokio::test]
    async fn test_worker_only_kind_rejected_at_master() {
        let master = MasterService::new("127.0.0.1", 0).await.unwrap();
        let env = MsgEnvelope::new(MsgKind::KeyInfo as u16, 3, "127.0.0.1", 49999);

        let reply = master.handle_msg(env, MsgBuffer::new(), fake_src()).await;
        assert!(reply.is_some());
        assert_eq!(master.err_count(), 1);
    }

    #[tokio::test]
    async fn test_garbled_registration_payload() {
        let master = MasterService::new("127.0.0.1", 0).await.unwrap();
        let env = MsgEnvelope::new(MsgKind::MastWorkerAddReq as u16, 4, "127.0.0.1", 49999);

        // No payload element at all.
        let reply = master.handle_msg(env, MsgBuffer::new(), fake_src()).await;
        assert!(reply.is_some());
        assert_eq!(master.err_count(), 1);
        assert!(master.directory().is_empty());
    }

    #[tokio::test]
    async fn test_msg_received_is_absorbed() {
        let master = MasterService::new("127.0.0.1", 0).await.unwrap();
        let env = MsgEnvelope::new(MsgKind::MsgReceived as u16, 5, "127.0.0.1", 49999);

        let reply = master.handle_msg(env, MsgBuffer::new(), fake_src()).await;
        assert!(reply.is_none(), "acks never generate replies");
    }
}
