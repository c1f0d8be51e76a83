//! Client Tests
//!
//! ## Test Scopes
//! - **Retry**: an unacknowledged request re-sends on the do-list cadence.
//! - **Completion**: acks resolve the waiting channel and clear the table.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::client::ClientService;
    use crate::codec::{MsgBuffer, MsgEnvelope};
    use crate::directory::NetworkAddress;
    use crate::protocol::{
        build_message, retrieve_payload, KeyInfo, KeyInsertAck, KeyInsertReq, KeyLookupReq,
        MsgKind, MsgStatus,
    };

    /// A bare socket standing in for the worker the client talks to.
    async fn fake_worker() -> (tokio::net::UdpSocket, NetworkAddress) {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = NetworkAddress::new("127.0.0.1", socket.local_addr().unwrap().port());
        (socket, addr)
    }

    async fn recv_msg(socket: &tokio::net::UdpSocket) -> (MsgEnvelope, MsgBuffer) {
        let mut raw = vec![0u8; 6000];
        let (len, _) = tokio::time::timeout(Duration::from_secs(3), socket.recv_from(&mut raw))
            .await
            .expect("no datagram within timeout")
            .unwrap();
        raw.truncate(len);
        let mut buf = MsgBuffer::from_datagram(raw);
        let env = MsgEnvelope::parse_from(&mut buf).unwrap();
        (env, buf)
    }

    // ============================================================
    // RETRY
    // ============================================================

    #[tokio::test]
    async fn test_insert_resends_until_acked() {
        let (worker_socket, worker_addr) = fake_worker().await;
        let master_addr = NetworkAddress::new("127.0.0.1", 1);
        let client = ClientService::new("127.0.0.1", 0, worker_addr, master_addr)
            .await
            .unwrap();
        client.start();

        let mut rx = client.key_insert("object42", 7, 3).await;
        assert_eq!(client.pending(), 1);

        // First send arrives promptly.
        let (_, mut buf) = recv_msg(&worker_socket).await;
        let req: KeyInsertReq = retrieve_payload(&mut buf).unwrap();
        assert_eq!(req.key, "object42");
        assert_eq!(req.requester, *client.local_addr());

        // No ack: the one-shot fires again on the next sweep.
        let (env, mut buf) = recv_msg(&worker_socket).await;
        assert_eq!(env.kind, MsgKind::WorkerInsertKeyReq as u16);
        let retry: KeyInsertReq = retrieve_payload(&mut buf).unwrap();
        assert_eq!(retry.key, "object42");
        assert!(rx.try_recv().is_err(), "nothing resolved yet");

        // Ack it; the channel resolves and the waiter is gone.
        let ack = KeyInsertAck {
            key: "object42".to_string(),
            chunk: 7,
            subchunk: 3,
            status: MsgStatus::Success,
        };
        let msg = build_message(MsgKind::KeyInsertComplete, env.id, &req.requester, &ack).unwrap();
        worker_socket
            .send_to(
                msg.as_slice(),
                ("127.0.0.1", client.local_addr().port),
            )
            .await
            .unwrap();

        let resolved = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("ack must resolve the insert")
            .unwrap();
        assert_eq!(resolved, ack);
        assert_eq!(client.pending(), 0);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_lookup_resolves_not_found() {
        let (worker_socket, worker_addr) = fake_worker().await;
        let master_addr = NetworkAddress::new("127.0.0.1", 1);
        let client = ClientService::new("127.0.0.1", 0, worker_addr, master_addr)
            .await
            .unwrap();
        client.start();

        let rx = client.key_lookup("zulu").await;

        let (env, mut buf) = recv_msg(&worker_socket).await;
        assert_eq!(env.kind, MsgKind::KeyInfoReq as u16);
        let req: KeyLookupReq = retrieve_payload(&mut buf).unwrap();
        assert_eq!(req.key, "zulu");

        let info = KeyInfo::not_found("zulu");
        let msg = build_message(MsgKind::KeyInfo, env.id, &req.requester, &info).unwrap();
        worker_socket
            .send_to(
                msg.as_slice(),
                ("127.0.0.1", client.local_addr().port),
            )
            .await
            .unwrap();

        let resolved = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("reply must resolve the lookup")
            .unwrap();
        assert!(!resolved.success);
        assert_eq!((resolved.chunk, resolved.subchunk), (0, 0));

        client.shutdown().await;
    }

    // ============================================================
    // COMPLETION EDGE CASES
    // ============================================================

    #[tokio::test]
    async fn test_stray_ack_is_ignored() {
        let (worker_socket, worker_addr) = fake_worker().await;
        let master_addr = NetworkAddress::new("127.0.0.1", 1);
        let client = ClientService::new("127.0.0.1", 0, worker_addr, master_addr)
            .await
            .unwrap();
        client.start();

        // An ack for a key nobody asked about: logged and dropped, no reply,
        // no error counted.
        let ack = KeyInsertAck {
            key: "phantom".to_string(),
            chunk: 1,
            subchunk: 1,
            status: MsgStatus::Success,
        };
        let sender = NetworkAddress::new("127.0.0.1", 50000);
        let msg = build_message(MsgKind::KeyInsertComplete, 1, &sender, &ack).unwrap();
        worker_socket
            .send_to(
                msg.as_slice(),
                ("127.0.0.1", client.local_addr().port),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.pending(), 0);
        assert_eq!(client.err_count(), 0);

        client.shutdown().await;
    }
}
