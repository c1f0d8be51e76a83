//! Master Controller
//!
//! The single coordinator of the cluster. It accepts worker registrations,
//! allocates names, seeds the first worker with the all-inclusive range, and
//! keeps every worker's view of the list fresh by pushing it through the
//! do-list whenever it changes.
//!
//! Registration gets no direct reply: the worker learns its name from the
//! list push and record fetch that follow.

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

use crate::codec::{MsgBuffer, MsgEnvelope};
use crate::directory::{MasterDirectory, MasterEntry, NetworkAddress};
use crate::dolist::{DoList, DoListItem, ItemCore};
use crate::keyspace::KeyRange;
use crate::protocol::{
    build_message, build_msg_received, build_worker_info, retrieve_payload, MastInfo, MsgKind,
    MsgReceivedInfo, MsgStatus, WorkerInfoReq, WorkerNameList,
};
use crate::transport::{Command, CommandPool, MsgHandler, UdpServer, DEFAULT_POOL_WORKERS};

/// Minimum spacing between list pushes to one worker.
const PUSH_INTERVAL: Duration = Duration::from_secs(2);

pub struct MasterService {
    server: Arc<UdpServer>,
    pool: Arc<CommandPool>,
    dolist: Arc<DoList>,
    directory: MasterDirectory,
    first_worker_registered: AtomicBool,
    sequence: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    self_weak: Weak<MasterService>,
}

impl MasterService {
    pub async fn new(host: &str, port: u16) -> Result<Arc<Self>> {
        let server = UdpServer::bind(host, port).await?;
        let pool = CommandPool::new(DEFAULT_POOL_WORKERS);
        let dolist = DoList::new(pool.clone());
        let (shutdown_tx, _) = watch::channel(false);

        let service = Arc::new_cyclic(|self_weak| MasterService {
            server,
            pool,
            dolist,
            directory: MasterDirectory::new(),
            first_worker_registered: AtomicBool::new(false),
            sequence: AtomicU64::new(1),
            shutdown_tx,
            self_weak: self_weak.clone(),
        });

        tracing::info!("Master ready on {}", service.local_addr());
        Ok(service)
    }

    /// Spawns the receive loop and the do-list sweep.
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
        tracing::info!("Master on {} shut down", self.local_addr());
    }

    pub fn local_addr(&self) -> &NetworkAddress {
        self.server.local_addr()
    }

    pub fn err_count(&self) -> u64 {
        self.server.err_count()
    }

    pub fn directory(&self) -> &MasterDirectory {
        &self.directory
    }

    pub fn next_msg_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a worker address. The first worker ever registered gets the
    /// all-inclusive range; everyone gets a list-push do-list item.
    pub async fn add_worker(&self, address: NetworkAddress) {
        let Some(entry) = self.directory.add_worker(address) else {
            return;
        };

        if !self.first_worker_registered.swap(true, Ordering::SeqCst) {
            entry.set_all_inclusive_range();
        }

        let item = SendListToWorker::new(self.self_weak.clone(), Arc::downgrade(&entry));
        entry.set_push_item(item.clone() as Arc<dyn DoListItem>);
        self.dolist
            .run_and_add_item(&(item as Arc<dyn DoListItem>))
            .await;
    }

    /// Administrative range assignment. The change fans out through the next
    /// round of record fetches.
    pub fn set_worker_range(&self, name: u32, range: KeyRange) -> bool {
        match self.directory.get_named(name) {
            Some(entry) => {
                entry.set_range(range);
                self.directory.flag_list_changed();
                true
            }
            None => false,
        }
    }

    /// Serializes the current name list and sends it to `address`.
    async fn send_list_to(&self, address: &NetworkAddress) {
        let names = self.directory.names();
        let list = WorkerNameList {
            total: names.len() as u32,
            names,
        };
        let msg = match build_message(
            MsgKind::MastWorkerList,
            self.next_msg_id(),
            self.local_addr(),
            &list,
        ) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!("Failed to serialize worker list: {}", e);
                return;
            }
        };
        if let Err(e) = self.server.send_buffer_to(address, &msg).await {
            tracing::warn!("Failed to send worker list to {}: {}", address, e);
            return;
        }
        tracing::debug!("Sent worker list ({} names) to {}", list.total, address);

        // Delivery is assumed; the worker asks again if the datagram is lost.
        if let Some(entry) = self.directory.get_by_address(address) {
            entry.push_sent();
            entry.touch();
        }
    }

    async fn handle_worker_add(&self, env: &MsgEnvelope, data: &mut MsgBuffer) -> Option<MsgBuffer> {
        let address: NetworkAddress = match retrieve_payload(data) {
            Ok(addr) => addr,
            Err(e) => return self.parse_err_reply(env, &format!("workerAddRequest: {e}")),
        };
        tracing::info!("Registration request from {}", address);
        self.add_worker(address).await;
        None
    }

    async fn handle_list_request(&self, env: &MsgEnvelope, data: &mut MsgBuffer) -> Option<MsgBuffer> {
        let requester: NetworkAddress = match retrieve_payload(data) {
            Ok(addr) => addr,
            Err(e) => return self.parse_err_reply(env, &format!("workerListRequest: {e}")),
        };
        self.send_list_to(&requester).await;
        None
    }

    async fn handle_info_request(&self, env: &MsgEnvelope, data: &mut MsgBuffer) -> Option<MsgBuffer> {
        let req: WorkerInfoReq = match retrieve_payload(data) {
            Ok(req) => req,
            Err(e) => return self.parse_err_reply(env, &format!("workerInfoRequest: {e}")),
        };

        let Some(entry) = self.directory.get_named(req.name) else {
            // Stale caches ask for names we no longer (or never) had; the
            // requester's do-list will come back around.
            tracing::warn!("Record requested for unknown name={}", req.name);
            return None;
        };

        let record = entry.record();
        match build_worker_info(self.local_addr(), self.next_msg_id(), &record) {
            Ok(msg) => {
                if let Err(e) = self.server.send_buffer_to(&req.requester, &msg).await {
                    tracing::warn!("Failed to send record to {}: {}", req.requester, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize record {}: {}", record, e),
        }
        None
    }

    async fn handle_mast_info_request(
        &self,
        env: &MsgEnvelope,
        data: &mut MsgBuffer,
    ) -> Option<MsgBuffer> {
        let requester: NetworkAddress = match retrieve_payload(data) {
            Ok(addr) => addr,
            Err(e) => return self.parse_err_reply(env, &format!("mastInfoRequest: {e}")),
        };
        let info = MastInfo {
            worker_count: self.directory.len() as u32,
            err_count: self.err_count(),
        };
        match build_message(MsgKind::MastInfo, self.next_msg_id(), self.local_addr(), &info) {
            Ok(msg) => {
                if let Err(e) = self.server.send_buffer_to(&requester, &msg).await {
                    tracing::warn!("Failed to send master info to {}: {}", requester, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize master info: {}", e),
        }
        None
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
impl MsgHandler for MasterService {
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
            MsgKind::MastWorkerAddReq => self.handle_worker_add(&env, &mut data).await,
            MsgKind::MastWorkerListReq => self.handle_list_request(&env, &mut data).await,
            MsgKind::MastWorkerInfoReq => self.handle_info_request(&env, &mut data).await,
            MsgKind::MastInfoReq => self.handle_mast_info_request(&env, &mut data).await,
            MsgKind::MsgReceived => {
                self.handle_msg_received(&env, &mut data);
                None
            }
            // Worker- and client-bound kinds have no business arriving here.
            MsgKind::MastInfo
            | MsgKind::MastWorkerList
            | MsgKind::MastWorkerInfo
            | MsgKind::WorkerInsertKeyReq
            | MsgKind::KeyInsertComplete
            | MsgKind::KeyInfoReq
            | MsgKind::KeyInfo => self.parse_err_reply(&env, "unexpected kind at master"),
        }
    }
}

/// Do-list item that pushes the worker list to one registered worker while
/// its needs-push flag is raised. Holds its entry weakly; the entry holds
/// this item, and back-pointers must not keep either alive.
struct SendListToWorker {
    core: ItemCore,
    master: Weak<MasterService>,
    entry: Weak<MasterEntry>,
}

impl SendListToWorker {
    fn new(master: Weak<MasterService>, entry: Weak<MasterEntry>) -> Arc<Self> {
        Arc::new(SendListToWorker {
            core: ItemCore::new(PUSH_INTERVAL),
            master,
            entry,
        })
    }
}

impl DoListItem for SendListToWorker {
    fn core(&self) -> &ItemCore {
        &self.core
    }

    fn create_command(&self) -> Option<Command> {
        let master = self.master.upgrade()?;
        let address = self.entry.upgrade()?.address().clone();
        Some(Box::pin(async move {
            master.send_list_to(&address).await;
        }))
    }
}
