//! Worker Service
//!
//! A worker owns a contiguous string range of the keyspace and the key map
//! behind it. Requests for keys in its range are served locally and answered
//! straight to the requester address carried in the payload; everything else
//! is forwarded to the worker whose range covers the key, or dropped if the
//! directory cache does not know one yet (the client's do-list retries).
//!
//! ## Lifecycle
//! A fresh worker has no name and no range. A do-list item re-sends the
//! registration to the master until a record naming our own address comes
//! back; adopting that record sets our name and, for the first worker in the
//! cluster, hands us the all-inclusive range.

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

use crate::codec::{MsgBuffer, MsgEnvelope};
use crate::directory::{NetworkAddress, WorkerDirectory, WorkerEntry, WorkerRecord};
use crate::dolist::{DoList, DoListItem, ItemCore};
use crate::keyspace::{ChunkSubchunk, InsertOutcome, KeyMap, KeyRange};
use crate::protocol::{
    build_message, build_msg_received, retrieve_payload, KeyInfo, KeyInsertAck, KeyInsertReq,
    KeyLookupReq, MsgKind, MsgReceivedInfo, MsgStatus, WorkerInfoReq, WorkerNameList,
};
use crate::transport::{Command, CommandPool, MsgHandler, UdpServer, DEFAULT_POOL_WORKERS};

/// Spacing between registration attempts while we are still nameless.
const REGISTER_INTERVAL: Duration = Duration::from_secs(1);

/// Spacing between list requests, and how old a list may get before the
/// refresh item re-arms itself.
const LIST_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
const LIST_STALE_AFTER: Duration = Duration::from_secs(4);

/// Same pair for per-name record fetches. Records go stale on the same
/// cadence so range changes propagate within a few seconds.
const RECORD_FETCH_INTERVAL: Duration = Duration::from_secs(1);
const RECORD_STALE_AFTER: Duration = Duration::from_secs(4);

pub struct WorkerService {
    server: Arc<UdpServer>,
    pool: Arc<CommandPool>,
    dolist: Arc<DoList>,
    master_addr: NetworkAddress,
    directory: WorkerDirectory,
    range: Mutex<KeyRange>,
    key_map: KeyMap,
    our_name: Mutex<Option<u32>>,
    sequence: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    self_weak: Weak<WorkerService>,
    register_item: Mutex<Option<Arc<RegisterWithMaster>>>,
    refresh_item: Mutex<Option<Arc<RefreshWorkerList>>>,
}

impl WorkerService {
    pub async fn new(host: &str, port: u16, master_addr: NetworkAddress) -> Result<Arc<Self>> {
        let server = UdpServer::bind(host, port).await?;
        let pool = CommandPool::new(DEFAULT_POOL_WORKERS);
        let dolist = DoList::new(pool.clone());
        let (shutdown_tx, _) = watch::channel(false);

        let service = Arc::new_cyclic(|self_weak| WorkerService {
            server,
            pool,
            dolist,
            master_addr,
            directory: WorkerDirectory::new(),
            range: Mutex::new(KeyRange::default()),
            key_map: KeyMap::new(),
            our_name: Mutex::new(None),
            sequence: AtomicU64::new(1),
            shutdown_tx,
            self_weak: self_weak.clone(),
            register_item: Mutex::new(None),
            refresh_item: Mutex::new(None),
        });

        tracing::info!(
            "Worker ready on {} (master {})",
            service.local_addr(),
            service.master_addr
        );
        Ok(service)
    }

    /// Spawns the receive loop and do-list sweep, and arms registration and
    /// list refresh.
    pub async fn start(self: &Arc<Self>) {
        let handler = self.clone() as Arc<dyn MsgHandler>;
        tokio::spawn(self.server.clone().run(
            handler,
            self.pool.clone(),
            self.shutdown_tx.subscribe(),
        ));
        tokio::spawn(self.dolist.clone().run(self.shutdown_tx.subscribe()));

        let register = RegisterWithMaster::new(self.self_weak.clone());
        *self.register_item.lock().unwrap() = Some(register.clone());
        self.dolist
            .run_and_add_item(&(register as Arc<dyn DoListItem>))
            .await;

        let refresh = RefreshWorkerList::new(self.self_weak.clone());
        *self.refresh_item.lock().unwrap() = Some(refresh.clone());
        self.dolist.add_item(&(refresh as Arc<dyn DoListItem>));
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.pool.shutdown().await;
        tracing::info!("Worker on {} shut down", self.local_addr());
    }

    pub fn local_addr(&self) -> &NetworkAddress {
        self.server.local_addr()
    }

    pub fn err_count(&self) -> u64 {
        self.server.err_count()
    }

    pub fn directory(&self) -> &WorkerDirectory {
        &self.directory
    }

    pub fn key_map(&self) -> &KeyMap {
        &self.key_map
    }

    pub fn our_name(&self) -> Option<u32> {
        *self.our_name.lock().unwrap()
    }

    pub fn range(&self) -> KeyRange {
        self.range.lock().unwrap().clone()
    }

    /// Replaces the owned range. Only this worker (or the master at
    /// bootstrap, through record adoption) changes it.
    pub fn set_range(&self, range: KeyRange) {
        tracing::info!("Range set to {}", range);
        *self.range.lock().unwrap() = range;
    }

    pub fn next_msg_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn set_our_name(&self, name: u32) {
        let mut our_name = self.our_name.lock().unwrap();
        match *our_name {
            None => {
                tracing::info!("Adopting name {}", name);
                *our_name = Some(name);
                if let Some(item) = self.register_item.lock().unwrap().as_ref() {
                    item.core().info_received();
                }
            }
            Some(current) if current != name => {
                tracing::error!(
                    "Master says our name is {} but we already hold {}",
                    name,
                    current
                );
            }
            Some(_) => {}
        }
    }

    async fn send_registration(&self) {
        let msg = match build_message(
            MsgKind::MastWorkerAddReq,
            self.next_msg_id(),
            self.local_addr(),
            self.local_addr(),
        ) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!("Failed to serialize registration: {}", e);
                return;
            }
        };
        tracing::info!("Registering with master {}", self.master_addr);
        if let Err(e) = self.server.send_buffer_to(&self.master_addr, &msg).await {
            tracing::warn!("Registration send failed: {}", e);
        }
    }

    async fn send_list_request(&self) {
        let msg = match build_message(
            MsgKind::MastWorkerListReq,
            self.next_msg_id(),
            self.local_addr(),
            self.local_addr(),
        ) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!("Failed to serialize list request: {}", e);
                return;
            }
        };
        if let Err(e) = self.server.send_buffer_to(&self.master_addr, &msg).await {
            tracing::warn!("List request send failed: {}", e);
        }
    }

    async fn send_record_request(&self, name: u32) {
        let req = WorkerInfoReq {
            requester: self.local_addr().clone(),
            name,
        };
        let msg = match build_message(
            MsgKind::MastWorkerInfoReq,
            self.next_msg_id(),
            self.local_addr(),
            &req,
        ) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!("Failed to serialize record request: {}", e);
                return;
            }
        };
        if let Err(e) = self.server.send_buffer_to(&self.master_addr, &msg).await {
            tracing::warn!("Record request send failed: {}", e);
        }
    }

    /// A name-list push from the master: create stubs for new names and arm
    /// a record fetch for each.
    fn name_list_received(&self, list: &WorkerNameList) {
        let fresh = self.directory.receive_name_list(list);
        for entry in fresh {
            self.arm_record_fetch(&entry);
        }
        if let Some(item) = self.refresh_item.lock().unwrap().as_ref() {
            item.core().info_received();
        }
    }

    fn arm_record_fetch(&self, entry: &Arc<WorkerEntry>) {
        let item = FetchRecord::new(self.self_weak.clone(), entry.name());
        entry.set_fetch_item(item.clone() as Arc<dyn DoListItem>);
        self.dolist.add_item(&(item as Arc<dyn DoListItem>));
    }

    /// A full record from the master. If it names our own address, it is the
    /// master telling us who we are; the bootstrap range rides along the
    /// first time.
    fn record_received(&self, record: &WorkerRecord) {
        if &record.address == self.local_addr() {
            self.set_our_name(record.name);

            if record.range.is_valid() {
                let mut range = self.range.lock().unwrap();
                if !range.is_valid() {
                    tracing::info!("Adopting range {}", record.range);
                    *range = record.range.clone();
                }
            }
        }

        self.directory.apply_record(record);
    }

    async fn handle_key_insert(
        &self,
        env: &MsgEnvelope,
        data: &mut MsgBuffer,
    ) -> Option<MsgBuffer> {
        let req: KeyInsertReq = match retrieve_payload(data) {
            Ok(req) => req,
            Err(e) => return self.parse_err_reply(env, &format!("keyInsertReq: {e}")),
        };

        let in_range = self.range.lock().unwrap().in_range(&req.key);
        if !in_range {
            self.forward_insert(env, req).await;
            return None;
        }

        let requested = ChunkSubchunk::new(req.chunk, req.subchunk);
        let ack = match self.key_map.insert(&req.key, requested) {
            InsertOutcome::Inserted => {
                tracing::info!("Key inserted: {} ({})", req.key, requested);
                KeyInsertAck {
                    key: req.key.clone(),
                    chunk: req.chunk,
                    subchunk: req.subchunk,
                    status: MsgStatus::Success,
                }
            }
            InsertOutcome::Duplicate(existing) => {
                tracing::warn!(
                    "Duplicate insert for {}: stored ({}), requested ({})",
                    req.key,
                    existing,
                    requested
                );
                KeyInsertAck {
                    key: req.key.clone(),
                    chunk: existing.chunk,
                    subchunk: existing.subchunk,
                    status: MsgStatus::DuplicateKey,
                }
            }
        };

        self.send_to_requester(MsgKind::KeyInsertComplete, env.id, &req.requester, &ack)
            .await;
        None
    }

    async fn handle_key_lookup(
        &self,
        env: &MsgEnvelope,
        data: &mut MsgBuffer,
    ) -> Option<MsgBuffer> {
        let req: KeyLookupReq = match retrieve_payload(data) {
            Ok(req) => req,
            Err(e) => return self.parse_err_reply(env, &format!("keyInfoReq: {e}")),
        };

        let in_range = self.range.lock().unwrap().in_range(&req.key);
        if !in_range {
            self.forward_lookup(env, req).await;
            return None;
        }

        let info = match self.key_map.lookup(&req.key) {
            Some(found) => {
                tracing::info!("Key lookup hit: {} ({})", req.key, found);
                KeyInfo::found(&req.key, found)
            }
            None => {
                tracing::info!("Key lookup miss: {}", req.key);
                KeyInfo::not_found(&req.key)
            }
        };

        self.send_to_requester(MsgKind::KeyInfo, env.id, &req.requester, &info)
            .await;
        None
    }

    async fn forward_insert(&self, env: &MsgEnvelope, req: KeyInsertReq) {
        let Some(target) = self.route_target(&req.key) else {
            return;
        };
        // Re-serialize the request unchanged; the requester address inside it
        // is what lets the owner answer the client directly.
        match build_message(MsgKind::WorkerInsertKeyReq, env.id, self.local_addr(), &req) {
            Ok(msg) => {
                tracing::debug!("Forwarding insert of {} to name={}", req.key, target.name);
                if let Err(e) = self.server.send_buffer_to(&target.address, &msg).await {
                    tracing::warn!("Forward to {} failed: {}", target.address, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize forwarded insert: {}", e),
        }
    }

    async fn forward_lookup(&self, env: &MsgEnvelope, req: KeyLookupReq) {
        let Some(target) = self.route_target(&req.key) else {
            return;
        };
        match build_message(MsgKind::KeyInfoReq, env.id, self.local_addr(), &req) {
            Ok(msg) => {
                tracing::debug!("Forwarding lookup of {} to name={}", req.key, target.name);
                if let Err(e) = self.server.send_buffer_to(&target.address, &msg).await {
                    tracing::warn!("Forward to {} failed: {}", target.address, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize forwarded lookup: {}", e),
        }
    }

    /// Picks the forwarding target for an out-of-range key. `None` drops the
    /// request: either the cache lags the cluster or it still claims the key
    /// is ours, and in both cases the client's retry is the recovery path.
    fn route_target(&self, key: &str) -> Option<WorkerRecord> {
        match self.directory.find_worker_for_key(key) {
            Some(record) if Some(record.name) == self.our_name() => {
                tracing::debug!(
                    "Cache still maps {} to ourselves while our range moved on; dropping",
                    key
                );
                None
            }
            Some(record) => Some(record),
            None => {
                tracing::debug!("No known worker covers {}; dropping", key);
                None
            }
        }
    }

    async fn send_to_requester<T: serde::Serialize>(
        &self,
        kind: MsgKind,
        id: u64,
        requester: &NetworkAddress,
        payload: &T,
    ) {
        match build_message(kind, id, self.local_addr(), payload) {
            Ok(msg) => {
                if let Err(e) = self.server.send_buffer_to(requester, &msg).await {
                    tracing::warn!("Failed to answer requester {}: {}", requester, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize reply: {}", e),
        }
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

    /// Fires an envelope with an arbitrary kind and no payload at `target`.
    /// Exists for protocol testing; a healthy peer answers with a
    /// parse-error MSG_RECEIVED.
    pub async fn send_unknown_kind(&self, kind: u16, target: &NetworkAddress) -> Result<()> {
        let mut buf = MsgBuffer::new();
        MsgEnvelope::new(
            kind,
            self.next_msg_id(),
            self.local_addr().host.clone(),
            self.local_addr().port,
        )
        .serialize_to(&mut buf)?;
        self.server.send_buffer_to(target, &buf).await
    }
}

#[async_trait]
impl MsgHandler for WorkerService {
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
            MsgKind::MastWorkerList => {
                match retrieve_payload::<WorkerNameList>(&mut data) {
                    Ok(list) => self.name_list_received(&list),
                    Err(e) => return self.parse_err_reply(&env, &format!("workerList: {e}")),
                }
                None
            }
            MsgKind::MastWorkerInfo => {
                match retrieve_payload::<WorkerRecord>(&mut data) {
                    Ok(record) => self.record_received(&record),
                    Err(e) => return self.parse_err_reply(&env, &format!("workerInfo: {e}")),
                }
                None
            }
            MsgKind::WorkerInsertKeyReq => self.handle_key_insert(&env, &mut data).await,
            MsgKind::KeyInfoReq => self.handle_key_lookup(&env, &mut data).await,
            MsgKind::MsgReceived => {
                self.handle_msg_received(&env, &mut data);
                None
            }
            // Master- and client-bound kinds have no business arriving here.
            MsgKind::MastInfoReq
            | MsgKind::MastInfo
            | MsgKind::MastWorkerAddReq
            | MsgKind::MastWorkerListReq
            | MsgKind::MastWorkerInfoReq
            | MsgKind::KeyInsertComplete
            | MsgKind::KeyInfo => self.parse_err_reply(&env, "unexpected kind at worker"),
        }
    }
}

/// Re-sends the registration until the master's record gives us a name.
struct RegisterWithMaster {
    core: ItemCore,
    worker: Weak<WorkerService>,
}

impl RegisterWithMaster {
    fn new(worker: Weak<WorkerService>) -> Arc<Self> {
        Arc::new(RegisterWithMaster {
            core: ItemCore::one_shot(REGISTER_INTERVAL),
            worker,
        })
    }
}

impl DoListItem for RegisterWithMaster {
    fn core(&self) -> &ItemCore {
        &self.core
    }

    fn create_command(&self) -> Option<Command> {
        let worker = self.worker.upgrade()?;
        Some(Box::pin(async move {
            worker.send_registration().await;
        }))
    }
}

/// Keeps asking the master for the worker list while ours is stale.
struct RefreshWorkerList {
    core: ItemCore,
    worker: Weak<WorkerService>,
}

impl RefreshWorkerList {
    fn new(worker: Weak<WorkerService>) -> Arc<Self> {
        Arc::new(RefreshWorkerList {
            core: ItemCore::with_refresh(LIST_REFRESH_INTERVAL, LIST_STALE_AFTER),
            worker,
        })
    }
}

impl DoListItem for RefreshWorkerList {
    fn core(&self) -> &ItemCore {
        &self.core
    }

    fn create_command(&self) -> Option<Command> {
        let worker = self.worker.upgrade()?;
        Some(Box::pin(async move {
            worker.send_list_request().await;
        }))
    }
}

/// Fetches one named worker's record, and re-fetches as it goes stale so
/// range changes reach the routing cache.
struct FetchRecord {
    core: ItemCore,
    worker: Weak<WorkerService>,
    name: u32,
}

impl FetchRecord {
    fn new(worker: Weak<WorkerService>, name: u32) -> Arc<Self> {
        Arc::new(FetchRecord {
            core: ItemCore::with_refresh(RECORD_FETCH_INTERVAL, RECORD_STALE_AFTER),
            worker,
            name,
        })
    }
}

impl DoListItem for FetchRecord {
    fn core(&self) -> &ItemCore {
        &self.core
    }

    fn create_command(&self) -> Option<Command> {
        let worker = self.worker.upgrade()?;
        let name = self.name;
        Some(Box::pin(async move {
            worker.send_record_request(name).await;
        }))
    }
}
