use super::CodecError;

/// Largest datagram the cluster will send or accept, in bytes.
///
/// Reading from a UDP socket silently truncates anything larger than the
/// receive buffer, so every process reads into a buffer of exactly this size
/// and every serializer rejects messages that would not fit.
pub const MAX_MSG_SIZE: usize = 6000;

/// A bounded write-and-read byte buffer.
///
/// The buffer keeps two independent cursors: writes append at the end of the
/// written region, reads advance through it. The capacity is fixed at
/// construction; appends that would exceed it fail whole rather than writing
/// partially.
#[derive(Debug, Clone)]
pub struct MsgBuffer {
    data: Vec<u8>,
    limit: usize,
    read_pos: usize,
}

impl MsgBuffer {
    /// A fresh buffer with the standard datagram capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_MSG_SIZE)
    }

    pub fn with_capacity(limit: usize) -> Self {
        MsgBuffer {
            data: Vec::with_capacity(limit),
            limit,
            read_pos: 0,
        }
    }

    /// Wraps the bytes of a received datagram. The write cursor sits at the
    /// end of the data and the read cursor at the start.
    pub fn from_datagram(data: Vec<u8>) -> Self {
        let limit = data.len().max(MAX_MSG_SIZE);
        MsgBuffer {
            data,
            limit,
            read_pos: 0,
        }
    }

    /// Bytes written so far (the sendable region).
    pub fn written(&self) -> usize {
        self.data.len()
    }

    /// Room left for appends.
    pub fn remaining_capacity(&self) -> usize {
        self.limit - self.data.len()
    }

    /// Bytes between the read cursor and the write cursor.
    pub fn readable(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// The whole written region, for handing to the socket.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Appends `bytes` whole, or fails without writing anything.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() > self.remaining_capacity() {
            return Err(CodecError::BufferFull {
                needed: bytes.len(),
                remaining: self.remaining_capacity(),
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Reads exactly `len` bytes, advancing the read cursor.
    pub fn read_exact(&mut self, len: usize) -> Result<&[u8], CodecError> {
        if len > self.readable() {
            return Err(CodecError::parse(format!(
                "read of {len} bytes over-runs buffer ({} readable)",
                self.readable()
            )));
        }
        let start = self.read_pos;
        self.read_pos += len;
        Ok(&self.data[start..self.read_pos])
    }

    /// Current read cursor, for save/restore around fallible parses.
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Restores a previously saved read cursor.
    pub fn set_read_pos(&mut self, pos: usize) {
        debug_assert!(pos <= self.data.len());
        self.read_pos = pos.min(self.data.len());
    }
}

impl Default for MsgBuffer {
    fn default() -> Self {
        Self::new()
    }
}
