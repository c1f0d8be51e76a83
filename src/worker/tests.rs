//! Worker Service Tests
//!
//! ## Test Scopes
//! - **Identity**: name and range adoption from master records.
//! - **Routing**: local serve vs forward vs silent drop.
//! - **Key operations**: insert acks, duplicate reporting, lookup replies.

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::codec::{MsgBuffer, MsgEnvelope};
    use crate::directory::{NetworkAddress, WorkerRecord};
    use crate::keyspace::{ChunkSubchunk, KeyRange};
    use crate::protocol::{
        build_message, retrieve_payload, KeyInfo, KeyInsertAck, KeyInsertReq, KeyLookupReq,
        MsgKind, MsgStatus,
    };
    use crate::transport::MsgHandler;
    use crate::worker::WorkerService;

    fn fake_src() -> SocketAddr {
        "127.0.0.1:49999".parse().unwrap()
    }

    async fn test_worker() -> Arc<WorkerService> {
        // The master address only needs to be somewhere sends cannot loop
        // back to the worker itself.
        WorkerService::new("127.0.0.1", 0, NetworkAddress::new("127.0.0.1", 1))
            .await
            .unwrap()
    }

    /// A bare socket standing in for a client, with its address ready to be
    /// embedded as the requester.
    async fn test_requester() -> (tokio::net::UdpSocket, NetworkAddress) {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = NetworkAddress::new("127.0.0.1", socket.local_addr().unwrap().port());
        (socket, addr)
    }

    async fn recv_msg(socket: &tokio::net::UdpSocket) -> (MsgEnvelope, MsgBuffer) {
        let mut raw = vec![0u8; 6000];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut raw))
            .await
            .expect("no datagram within timeout")
            .unwrap();
        raw.truncate(len);
        let mut buf = MsgBuffer::from_datagram(raw);
        let env = MsgEnvelope::parse_from(&mut buf).unwrap();
        (env, buf)
    }

    // ============================================================
    // IDENTITY
    // ============================================================

    #[tokio::test]
    async fn test_record_with_our_address_sets_name_and_range() {
        let worker = test_worker().await;
        assert!(worker.our_name().is_none());
        assert!(!worker.range().is_valid());

        let record = WorkerRecord {
            name: 1,
            address: worker.local_addr().clone(),
            range: KeyRange::all_inclusive(),
        };
        let msg = build_message(MsgKind::MastWorkerInfo, 1, &record.address, &record).unwrap();
        let mut data = MsgBuffer::from_datagram(msg.as_slice().to_vec());
        let env = MsgEnvelope::parse_from(&mut data).unwrap();
        worker.handle_msg(env, data, fake_src()).await;

        assert_eq!(worker.our_name(), Some(1));
        assert!(worker.range().is_unlimited());
        assert_eq!(worker.directory().len(), 1);
    }

    #[tokio::test]
    async fn test_record_does_not_overwrite_valid_range() {
        let worker = test_worker().await;
        let mut owned = KeyRange::default();
        owned.set_min_max("", "m", false);
        worker.set_range(owned.clone());

        let record = WorkerRecord {
            name: 1,
            address: worker.local_addr().clone(),
            range: KeyRange::all_inclusive(),
        };
        let msg = build_message(MsgKind::MastWorkerInfo, 1, &record.address, &record).unwrap();
        let mut data = MsgBuffer::from_datagram(msg.as_slice().to_vec());
        let env = MsgEnvelope::parse_from(&mut data).unwrap();
        worker.handle_msg(env, data, fake_src()).await;

        assert_eq!(worker.range(), owned, "bootstrap only fills an empty range");
    }

    #[tokio::test]
    async fn test_foreign_record_only_updates_cache() {
        let worker = test_worker().await;
        let record = WorkerRecord {
            name: 9,
            address: NetworkAddress::new("127.0.0.1", 59999),
            range: KeyRange::all_inclusive(),
        };
        let msg = build_message(MsgKind::MastWorkerInfo, 1, &record.address, &record).unwrap();
        let mut data = MsgBuffer::from_datagram(msg.as_slice().to_vec());
        let env = MsgEnvelope::parse_from(&mut data).unwrap();
        worker.handle_msg(env, data, fake_src()).await;

        assert!(worker.our_name().is_none());
        assert_eq!(worker.directory().get(9).unwrap().record().unwrap(), record);
    }

    // ============================================================
    // KEY OPERATIONS
    // ============================================================

    #[tokio::test]
    async fn test_local_insert_acks_requester() {
        let worker = test_worker().await;
        worker.set_range(KeyRange::all_inclusive());
        let (socket, requester) = test_requester().await;

        let req = KeyInsertReq {
            requester,
            key: "object42".to_string(),
            chunk: 7,
            subchunk: 3,
        };
        let msg = build_message(MsgKind::WorkerInsertKeyReq, 11, &req.requester, &req).unwrap();
        let mut data = MsgBuffer::from_datagram(msg.as_slice().to_vec());
        let env = MsgEnvelope::parse_from(&mut data).unwrap();
        let reply = worker.handle_msg(env, data, fake_src()).await;
        assert!(reply.is_none(), "the ack goes to the requester, not back");

        let (env, mut buf) = recv_msg(&socket).await;
        assert_eq!(env.kind, MsgKind::KeyInsertComplete as u16);
        let ack: KeyInsertAck = retrieve_payload(&mut buf).unwrap();
        assert_eq!(ack.status, MsgStatus::Success);
        assert_eq!((ack.chunk, ack.subchunk), (7, 3));

        assert_eq!(
            worker.key_map().lookup("object42"),
            Some(ChunkSubchunk::new(7, 3))
        );
    }

    #[tokio::test]
    async fn test_duplicate_insert_reports_stored_mapping() {
        let worker = test_worker().await;
        worker.set_range(KeyRange::all_inclusive());
        worker.key_map().insert("object42", ChunkSubchunk::new(7, 3));
        let (socket, requester) = test_requester().await;

        let req = KeyInsertReq {
            requester,
            key: "object42".to_string(),
            chunk: 9,
            subchunk: 9,
        };
        let msg = build_message(MsgKind::WorkerInsertKeyReq, 12, &req.requester, &req).unwrap();
        let mut data = MsgBuffer::from_datagram(msg.as_slice().to_vec());
        let env = MsgEnvelope::parse_from(&mut data).unwrap();
        worker.handle_msg(env, data, fake_src()).await;

        let (_, mut buf) = recv_msg(&socket).await;
        let ack: KeyInsertAck = retrieve_payload(&mut buf).unwrap();
        assert_eq!(ack.status, MsgStatus::DuplicateKey);
        assert_eq!((ack.chunk, ack.subchunk), (7, 3), "the stored mapping wins");

        assert_eq!(
            worker.key_map().lookup("object42"),
            Some(ChunkSubchunk::new(7, 3))
        );
    }

    #[tokio::test]
    async fn test_lookup_miss_replies_not_found() {
        let worker = test_worker().await;
        worker.set_range(KeyRange::all_inclusive());
        let (socket, requester) = test_requester().await;

        let req = KeyLookupReq {
            requester,
            key: "missing".to_string(),
        };
        let msg = build_message(MsgKind::KeyInfoReq, 13, &req.requester, &req).unwrap();
        let mut data = MsgBuffer::from_datagram(msg.as_slice().to_vec());
        let env = MsgEnvelope::parse_from(&mut data).unwrap();
        worker.handle_msg(env, data, fake_src()).await;

        let (env, mut buf) = recv_msg(&socket).await;
        assert_eq!(env.kind, MsgKind::KeyInfo as u16);
        let info: KeyInfo = retrieve_payload(&mut buf).unwrap();
        assert!(!info.success);
        assert_eq!((info.chunk, info.subchunk), (0, 0));
    }

    // ============================================================
    // ROUTING
    // ============================================================

    #[tokio::test]
    async fn test_out_of_range_without_target_drops_silently() {
        let worker = test_worker().await;
        let mut range = KeyRange::default();
        range.set_min_max("", "m", false);
        worker.set_range(range);
        let (socket, requester) = test_requester().await;

        let req = KeyLookupReq {
            requester,
            key: "zulu".to_string(),
        };
        let msg = build_message(MsgKind::KeyInfoReq, 14, &req.requester, &req).unwrap();
        let mut data = MsgBuffer::from_datagram(msg.as_slice().to_vec());
        let env = MsgEnvelope::parse_from(&mut data).unwrap();
        let reply = worker.handle_msg(env, data, fake_src()).await;
        assert!(reply.is_none());

        // Nothing may reach the requester; the client's do-list retries.
        let mut raw = vec![0u8; 6000];
        let res =
            tokio::time::timeout(Duration::from_millis(300), socket.recv_from(&mut raw)).await;
        assert!(res.is_err(), "dropped request must not produce a reply");
    }

    #[tokio::test]
    async fn test_out_of_range_forwards_to_owner() {
        let worker = test_worker().await;
        let mut range = KeyRange::default();
        range.set_min_max("", "m", false);
        worker.set_range(range);

        // A bare socket plays the owning worker.
        let (owner_socket, owner_addr) = test_requester().await;
        let mut owner_range = KeyRange::default();
        owner_range.set_min_max("m", "", true);
        worker.directory().apply_record(&WorkerRecord {
            name: 2,
            address: owner_addr,
            range: owner_range,
        });

        let (_client_socket, requester) = test_requester().await;
        let req = KeyInsertReq {
            requester: requester.clone(),
            key: "zulu".to_string(),
            chunk: 4,
            subchunk: 5,
        };
        let msg = build_message(MsgKind::WorkerInsertKeyReq, 15, &requester, &req).unwrap();
        let mut data = MsgBuffer::from_datagram(msg.as_slice().to_vec());
        let env = MsgEnvelope::parse_from(&mut data).unwrap();
        worker.handle_msg(env, data, fake_src()).await;

        // The owner receives the request unchanged, requester included.
        let (env, mut buf) = recv_msg(&owner_socket).await;
        assert_eq!(env.kind, MsgKind::WorkerInsertKeyReq as u16);
        assert_eq!(env.sender_port, worker.local_addr().port);
        let forwarded: KeyInsertReq = retrieve_payload(&mut buf).unwrap();
        assert_eq!(forwarded, req);

        // And nothing landed in the forwarding worker's map.
        assert!(worker.key_map().is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_kind_counts_and_replies() {
        let worker = test_worker().await;
        let env = MsgEnvelope::new(MsgKind::MastWorkerAddReq as u16, 16, "127.0.0.1", 49999);

        let reply = worker.handle_msg(env, MsgBuffer::new(), fake_src()).await;
        assert!(reply.is_some());
        assert_eq!(worker.err_count(), 1);
    }
}
