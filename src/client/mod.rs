//! Client Collaborator
//!
//! Submits inserts and lookups to a worker and retries them through one-shot
//! do-list items until the cluster acknowledges. Retries are safe: inserts
//! are idempotent on the same triple and duplicates never mutate the map, so
//! the worst a lost ack costs is seeing a duplicate-key completion instead
//! of a success.

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{oneshot, watch};

use crate::codec::{MsgBuffer, MsgEnvelope};
use crate::directory::NetworkAddress;
use crate::dolist::{DoList, DoListItem, ItemCore};
use crate::protocol::{
    build_message, build_msg_received, retrieve_payload, KeyInfo, KeyInsertAck, KeyInsertReq,
    KeyLookupReq, MsgKind, MsgReceivedInfo, MsgStatus,
};
use crate::transport::{Command, CommandPool, MsgHandler, UdpServer, DEFAULT_POOL_WORKERS};

/// Spacing between re-sends of an unacknowledged request.
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub struct ClientService {
    server: Arc<UdpServer>,
    pool: Arc<CommandPool>,
    dolist: Arc<DoList>,
    worker_addr: NetworkAddress,
    master_addr: NetworkAddress,
    sequence: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    self_weak: Weak<ClientService>,
    waiting_inserts: DashMap<String, Arc<KeyInsertOneShot>>,
    waiting_lookups: DashMap<String, Arc<KeyLookupOneShot>>,
}

impl ClientService {
    pub async fn new(
        host: &str,
        port: u16,
        worker_addr: NetworkAddress,
        master_addr: NetworkAddress,
    ) -> Result<Arc<Self>> {
        let server = UdpServer::bind(host, port).await?;
        let pool = CommandPool::new(DEFAULT_POOL_WORKERS);
        let dolist = DoList::new(pool.clone());
        let (shutdown_tx, _) = watch::channel(false);

        let service = Arc::new_cyclic(|self_weak| ClientService {
            server,
            pool,
            dolist,
            worker_addr,
            master_addr,
            sequence: AtomicU64::new(1),
            shutdown_tx,
            self_weak: self_weak.clone(),
            waiting_inserts: DashMap::new(),
            waiting_lookups: DashMap::new(),
        });

        tracing::info!(
            "Client ready on {} (worker {}, master {})",
            service.local_addr(),
            service.worker_addr,
            service.master_addr
        );
        Ok(service)
    }

    pub fn start(self: &Arc<Self>) {
        let handler = self.clone() as Arc<dyn MsgHandler>;
        tokio::spawn(self.server.clone().run(
            handler,
            self.pool.clone(),
            self.shutdown_tx.subscribe(),
        ));
        tokio::spawn(self.dolist.clone().run(self.shutdown_tx.subscribe()));
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.pool.shutdown().await;
        tracing::info!("Client on {} shut down", self.local_addr());
    }

    pub fn local_addr(&self) -> &NetworkAddress {
        self.server.local_addr()
    }

    pub fn err_count(&self) -> u64 {
        self.server.err_count()
    }

    pub fn next_msg_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Submits an insert. The returned channel resolves once some worker
    /// acknowledges the key, with either a success or, on a repeat of an
    /// existing key, the mapping that is actually stored.
    pub async fn key_insert(
        self: &Arc<Self>,
        key: &str,
        chunk: i32,
        subchunk: i32,
    ) -> oneshot::Receiver<KeyInsertAck> {
        let (tx, rx) = oneshot::channel();
        let item = KeyInsertOneShot::new(self.self_weak.clone(), key, chunk, subchunk, tx);
        if self
            .waiting_inserts
            .insert(key.to_string(), item.clone())
            .is_some()
        {
            tracing::warn!("Replacing pending insert for key {}", key);
        }
        self.dolist
            .run_and_add_item(&(item as Arc<dyn DoListItem>))
            .await;
        rx
    }

    /// Submits a lookup, resolved the same way as [`Self::key_insert`].
    pub async fn key_lookup(self: &Arc<Self>, key: &str) -> oneshot::Receiver<KeyInfo> {
        let (tx, rx) = oneshot::channel();
        let item = KeyLookupOneShot::new(self.self_weak.clone(), key, tx);
        if self
            .waiting_lookups
            .insert(key.to_string(), item.clone())
            .is_some()
        {
            tracing::warn!("Replacing pending lookup for key {}", key);
        }
        self.dolist
            .run_and_add_item(&(item as Arc<dyn DoListItem>))
            .await;
        rx
    }

    /// Number of requests still waiting for an ack.
    pub fn pending(&self) -> usize {
        self.waiting_inserts.len() + self.waiting_lookups.len()
    }

    async fn send_insert(&self, key: &str, chunk: i32, subchunk: i32) {
        let req = KeyInsertReq {
            requester: self.local_addr().clone(),
            key: key.to_string(),
            chunk,
            subchunk,
        };
        let msg = match build_message(
            MsgKind::WorkerInsertKeyReq,
            self.next_msg_id(),
            self.local_addr(),
            &req,
        ) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!("Failed to serialize insert of {}: {}", key, e);
                return;
            }
        };
        tracing::debug!("Sending insert of {} to {}", key, self.worker_addr);
        if let Err(e) = self.server.send_buffer_to(&self.worker_addr, &msg).await {
            tracing::warn!("Insert send failed, will retry: {}", e);
        }
    }

    async fn send_lookup(&self, key: &str) {
        let req = KeyLookupReq {
            requester: self.local_addr().clone(),
            key: key.to_string(),
        };
        let msg = match build_message(
            MsgKind::KeyInfoReq,
            self.next_msg_id(),
            self.local_addr(),
            &req,
        ) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!("Failed to serialize lookup of {}: {}", key, e);
                return;
            }
        };
        tracing::debug!("Sending lookup of {} to {}", key, self.worker_addr);
        if let Err(e) = self.server.send_buffer_to(&self.worker_addr, &msg).await {
            tracing::warn!("Lookup send failed, will retry: {}", e);
        }
    }

    fn insert_ack_received(&self, ack: KeyInsertAck) {
        let Some((_, item)) = self.waiting_inserts.remove(&ack.key) else {
            tracing::debug!("Ack for key {} with no waiter (late retry?)", ack.key);
            return;
        };
        if ack.status == MsgStatus::DuplicateKey {
            tracing::warn!(
                "Insert of {} completed as duplicate; stored mapping is ({}, {})",
                ack.key,
                ack.chunk,
                ack.subchunk
            );
        } else {
            tracing::info!("Insert of {} complete ({}, {})", ack.key, ack.chunk, ack.subchunk);
        }
        item.complete(ack);
    }

    fn key_info_received(&self, info: KeyInfo) {
        let Some((_, item)) = self.waiting_lookups.remove(&info.key) else {
            tracing::debug!("Lookup reply for {} with no waiter", info.key);
            return;
        };
        tracing::info!(
            "Lookup of {} complete: success={} ({}, {})",
            info.key,
            info.success,
            info.chunk,
            info.subchunk
        );
        item.complete(info);
    }

    fn handle_msg_received(&self, env: &MsgEnvelope, data: &mut MsgBuffer) {
        match retrieve_payload::<MsgReceivedInfo>(data) {
            Ok(info) if info.status != MsgStatus::Success => {
                tracing::warn!(
                    "Peer {}:{} reported {:?} for id={} kind={}: {}",
                    env.sender_host,
                    env.sender_port,
                    info.status,
                    info.original_id,
                    info.original_kind,
                    info.err_msg
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Garbled MSG_RECEIVED from {}: {}", env.sender_host, e),
        }
    }

    fn parse_err_reply(&self, env: &MsgEnvelope, err_msg: &str) -> Option<MsgBuffer> {
        let count = self.server.bump_err_count();
        tracing::error!("{} (errCount={})", err_msg, count);
        build_msg_received(self.local_addr(), env, MsgStatus::ParseErr, err_msg).ok()
    }
}

#[async_trait]
impl MsgHandler for ClientService {
    async fn handle_msg(
        &self,
        env: MsgEnvelope,
        mut data: MsgBuffer,
        _src: SocketAddr,
    ) -> Option<MsgBuffer> {
        let kind = match MsgKind::try_from(env.kind) {
            Ok(kind) => kind,
            Err(_) => return self.parse_err_reply(&env, "unknownMsgKind"),
        };

        match kind {
            MsgKind::KeyInsertComplete => {
                match retrieve_payload::<KeyInsertAck>(&mut data) {
                    Ok(ack) => self.insert_ack_received(ack),
                    Err(e) => return self.parse_err_reply(&env, &format!("keyInsertAck: {e}")),
                }
                None
            }
            MsgKind::KeyInfo => {
                match retrieve_payload::<KeyInfo>(&mut data) {
                    Ok(info) => self.key_info_received(info),
                    Err(e) => return self.parse_err_reply(&env, &format!("keyInfo: {e}")),
                }
                None
            }
            MsgKind::MsgReceived => {
                self.handle_msg_received(&env, &mut data);
                None
            }
            _ => self.parse_err_reply(&env, "unexpected kind at client"),
        }
    }
}

/// Small random delay so a herd of retries does not tick in lockstep.
async fn retry_jitter() {
    let jitter = rand::random::<u64>() % 50;
    tokio::time::sleep(Duration::from_millis(jitter)).await;
}

/// Re-sends one insert until its `KEY_INSERT_COMPLETE` arrives, then leaves
/// the do-list.
struct KeyInsertOneShot {
    core: ItemCore,
    client: Weak<ClientService>,
    key: String,
    chunk: i32,
    subchunk: i32,
    tx: Mutex<Option<oneshot::Sender<KeyInsertAck>>>,
}

impl KeyInsertOneShot {
    fn new(
        client: Weak<ClientService>,
        key: &str,
        chunk: i32,
        subchunk: i32,
        tx: oneshot::Sender<KeyInsertAck>,
    ) -> Arc<Self> {
        Arc::new(KeyInsertOneShot {
            core: ItemCore::one_shot(RETRY_INTERVAL),
            client,
            key: key.to_string(),
            chunk,
            subchunk,
            tx: Mutex::new(Some(tx)),
        })
    }

    fn complete(&self, ack: KeyInsertAck) {
        self.core.info_received();
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(ack);
        }
    }
}

impl DoListItem for KeyInsertOneShot {
    fn core(&self) -> &ItemCore {
        &self.core
    }

    fn create_command(&self) -> Option<Command> {
        let client = self.client.upgrade()?;
        let key = self.key.clone();
        let (chunk, subchunk) = (self.chunk, self.subchunk);
        Some(Box::pin(async move {
            retry_jitter().await;
            client.send_insert(&key, chunk, subchunk).await;
        }))
    }
}

/// The lookup twin of [`KeyInsertOneShot`].
struct KeyLookupOneShot {
    core: ItemCore,
    client: Weak<ClientService>,
    key: String,
    tx: Mutex<Option<oneshot::Sender<KeyInfo>>>,
}

impl KeyLookupOneShot {
    fn new(client: Weak<ClientService>, key: &str, tx: oneshot::Sender<KeyInfo>) -> Arc<Self> {
        Arc::new(KeyLookupOneShot {
            core: ItemCore::one_shot(RETRY_INTERVAL),
            client,
            key: key.to_string(),
            tx: Mutex::new(Some(tx)),
        })
    }

    fn complete(&self, info: KeyInfo) {
        self.core.info_received();
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(info);
        }
    }
}

impl DoListItem for KeyLookupOneShot {
    fn core(&self) -> &ItemCore {
        &self.core
    }

    fn create_command(&self) -> Option<Command> {
        let client = self.client.upgrade()?;
        let key = self.key.clone();
        Some(Box::pin(async move {
            retry_jitter().await;
            client.send_lookup(&key).await;
        }))
    }
}
