//! Cluster Wire Protocol
//!
//! Defines the message kinds, status codes, and payload structures exchanged
//! between master, workers, and clients.
//!
//! A datagram is an envelope (kind, id, sender address) followed by one
//! payload structure, bincode-encoded inside a single string element. The
//! carrying element is length-prefixed, so a reader always knows where the
//! payload ends before it starts decoding.


use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, MsgBuffer, MsgElement, MsgEnvelope};
use crate::directory::types::{NetworkAddress, WorkerRecord};
use crate::keyspace::ChunkSubchunk;

/// Every message kind on the wire. The discriminants are the `u16` values
/// carried in the envelope.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgKind {
    /// Generic ack / error report for a previously received message.
    MsgReceived = 100,
    /// Ask the master for liveness and counters.
    MastInfoReq = 200,
    /// The master's liveness/counters reply.
    MastInfo = 201,
    /// A worker registering itself with the master.
    MastWorkerAddReq = 210,
    /// Ask the master for the current worker name list.
    MastWorkerListReq = 220,
    /// The master pushing its worker name list.
    MastWorkerList = 221,
    /// Ask the master for one worker's full record.
    MastWorkerInfoReq = 230,
    /// The master's reply carrying one worker record.
    MastWorkerInfo = 231,
    /// Insert a key into the directory (client to worker, or forwarded
    /// worker to worker).
    WorkerInsertKeyReq = 300,
    /// Insert acknowledgment, success or duplicate, sent to the requester.
    KeyInsertComplete = 301,
    /// Look a key up (client to worker, or forwarded worker to worker).
    KeyInfoReq = 310,
    /// Lookup reply sent to the requester.
    KeyInfo = 311,
}

impl TryFrom<u16> for MsgKind {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, CodecError> {
        match value {
            100 => Ok(MsgKind::MsgReceived),
            200 => Ok(MsgKind::MastInfoReq),
            201 => Ok(MsgKind::MastInfo),
            210 => Ok(MsgKind::MastWorkerAddReq),
            220 => Ok(MsgKind::MastWorkerListReq),
            221 => Ok(MsgKind::MastWorkerList),
            230 => Ok(MsgKind::MastWorkerInfoReq),
            231 => Ok(MsgKind::MastWorkerInfo),
            300 => Ok(MsgKind::WorkerInsertKeyReq),
            301 => Ok(MsgKind::KeyInsertComplete),
            310 => Ok(MsgKind::KeyInfoReq),
            311 => Ok(MsgKind::KeyInfo),
            other => Err(CodecError::Parse(format!("unknown message kind {other}"))),
        }
    }
}

/// Outcome codes carried in acks and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgStatus {
    Success,
    ParseErr,
    DuplicateKey,
    OutOfRange,
}

// --- Payload structures ---

/// Ack / error report for an earlier message. Sent with
/// [`MsgKind::MsgReceived`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgReceivedInfo {
    pub original_id: u64,
    pub original_kind: u16,
    pub status: MsgStatus,
    pub err_msg: String,
}

/// The master's stats reply. Sent with [`MsgKind::MastInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MastInfo {
    pub worker_count: u32,
    pub err_count: u64,
}

/// The names the master currently has registered, pushed with
/// [`MsgKind::MastWorkerList`]. Carries names only; receivers fetch full
/// records per name. `total` may exceed `names.len()` once lists outgrow a
/// single datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerNameList {
    pub total: u32,
    pub names: Vec<u32>,
}

/// Request for one worker's record. Sent with [`MsgKind::MastWorkerInfoReq`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfoReq {
    pub requester: NetworkAddress,
    pub name: u32,
}

/// Key insertion request. Sent with [`MsgKind::WorkerInsertKeyReq`], either
/// by a client or re-sent verbatim by a worker forwarding to the owner.
/// `requester` is where the final ack goes, no matter how many hops the
/// request takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInsertReq {
    pub requester: NetworkAddress,
    pub key: String,
    pub chunk: i32,
    pub subchunk: i32,
}

/// Insert acknowledgment. Sent with [`MsgKind::KeyInsertComplete`].
///
/// `status` is `Success` for the first insert of a key. A repeat insert gets
/// `DuplicateKey` and the mapping that is actually stored, which may differ
/// from what the repeat asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInsertAck {
    pub key: String,
    pub chunk: i32,
    pub subchunk: i32,
    pub status: MsgStatus,
}

/// Key lookup request. Sent with [`MsgKind::KeyInfoReq`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLookupReq {
    pub requester: NetworkAddress,
    pub key: String,
}

/// Lookup reply. Sent with [`MsgKind::KeyInfo`]. A miss is
/// `success = false` with zeroed chunk and subchunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key: String,
    pub chunk: i32,
    pub subchunk: i32,
    pub success: bool,
}

impl KeyInfo {
    pub fn found(key: impl Into<String>, info: ChunkSubchunk) -> Self {
        KeyInfo {
            key: key.into(),
            chunk: info.chunk,
            subchunk: info.subchunk,
            success: true,
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        KeyInfo {
            key: key.into(),
            chunk: 0,
            subchunk: 0,
            success: false,
        }
    }
}

// --- Encoding helpers ---

/// Appends `payload` to `buf` as one bincode-encoded string element.
pub fn append_payload<T: Serialize>(payload: &T, buf: &mut MsgBuffer) -> Result<(), CodecError> {
    let bytes =
        bincode::serialize(payload).map_err(|e| CodecError::Parse(format!("encode: {e}")))?;
    MsgElement::Str(bytes).append_to(buf)
}

/// Retrieves the next string element from `buf` and bincode-decodes it.
pub fn retrieve_payload<T: for<'de> Deserialize<'de>>(
    buf: &mut MsgBuffer,
) -> Result<T, CodecError> {
    let saved = buf.read_pos();
    let elem = MsgElement::retrieve_from(buf)?;
    let bytes = match elem {
        MsgElement::Str(bytes) => bytes,
        other => {
            buf.set_read_pos(saved);
            return Err(CodecError::Parse(format!(
                "expected payload element, found {}",
                other.type_name()
            )));
        }
    };
    bincode::deserialize(&bytes).map_err(|e| {
        buf.set_read_pos(saved);
        CodecError::Parse(format!("decode: {e}"))
    })
}

/// Builds a complete datagram: envelope plus one payload element.
pub fn build_message<T: Serialize>(
    kind: MsgKind,
    id: u64,
    sender: &NetworkAddress,
    payload: &T,
) -> Result<MsgBuffer, CodecError> {
    let mut buf = MsgBuffer::new();
    MsgEnvelope::new(kind as u16, id, sender.host.clone(), sender.port).serialize_to(&mut buf)?;
    append_payload(payload, &mut buf)?;
    Ok(buf)
}

/// Builds the standard [`MsgKind::MsgReceived`] ack/error reply for `in_env`.
pub fn build_msg_received(
    sender: &NetworkAddress,
    in_env: &MsgEnvelope,
    status: MsgStatus,
    err_msg: &str,
) -> Result<MsgBuffer, CodecError> {
    let info = MsgReceivedInfo {
        original_id: in_env.id,
        original_kind: in_env.kind,
        status,
        err_msg: err_msg.to_string(),
    };
    build_message(MsgKind::MsgReceived, in_env.id, sender, &info)
}

/// Builds a [`MsgKind::MastWorkerInfo`] reply carrying one worker record.
pub fn build_worker_info(
    sender: &NetworkAddress,
    id: u64,
    record: &WorkerRecord,
) -> Result<MsgBuffer, CodecError> {
    build_message(MsgKind::MastWorkerInfo, id, sender, record)
}
