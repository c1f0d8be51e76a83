use super::{buffer::MsgBuffer, element::MsgElement, CodecError};

/// The header every datagram starts with.
///
/// `sender_host`/`sender_port` identify the logical origin of the message and
/// are where replies go. They are authoritative over the UDP source endpoint:
/// a forwarded request still names the node that built the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgEnvelope {
    pub kind: u16,
    pub id: u64,
    pub sender_host: String,
    pub sender_port: u16,
}

impl MsgEnvelope {
    pub fn new(kind: u16, id: u64, sender_host: impl Into<String>, sender_port: u16) -> Self {
        MsgEnvelope {
            kind,
            id,
            sender_host: sender_host.into(),
            sender_port,
        }
    }

    /// Serializes the envelope elements, in order, onto `buf`.
    pub fn serialize_to(&self, buf: &mut MsgBuffer) -> Result<(), CodecError> {
        MsgElement::U16(self.kind).append_to(buf)?;
        MsgElement::U64(self.id).append_to(buf)?;
        MsgElement::from_str(&self.sender_host).append_to(buf)?;
        MsgElement::U16(self.sender_port).append_to(buf)?;
        Ok(())
    }

    /// Parses an envelope off the front of `buf`, leaving the read cursor at
    /// the first payload element. On failure the cursor does not move.
    pub fn parse_from(buf: &mut MsgBuffer) -> Result<MsgEnvelope, CodecError> {
        let saved = buf.read_pos();
        match Self::parse_inner(buf) {
            Ok(env) => Ok(env),
            Err(e) => {
                buf.set_read_pos(saved);
                Err(e)
            }
        }
    }

    fn parse_inner(buf: &mut MsgBuffer) -> Result<MsgEnvelope, CodecError> {
        let kind = match MsgElement::retrieve_from(buf)? {
            MsgElement::U16(v) => v,
            other => {
                return Err(CodecError::parse(format!(
                    "envelope kind: expected u16, found {}",
                    other.type_name()
                )))
            }
        };
        let id = match MsgElement::retrieve_from(buf)? {
            MsgElement::U64(v) => v,
            other => {
                return Err(CodecError::parse(format!(
                    "envelope id: expected u64, found {}",
                    other.type_name()
                )))
            }
        };
        let host_elem = MsgElement::retrieve_from(buf)?;
        let sender_host = host_elem.as_str()?.to_string();
        let sender_port = match MsgElement::retrieve_from(buf)? {
            MsgElement::U16(v) => v,
            other => {
                return Err(CodecError::parse(format!(
                    "envelope port: expected u16, found {}",
                    other.type_name()
                )))
            }
        };
        Ok(MsgEnvelope {
            kind,
            id,
            sender_host,
            sender_port,
        })
    }
}

impl std::fmt::Display for MsgEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "kind={} id={} sender={}:{}",
            self.kind, self.id, self.sender_host, self.sender_port
        )
    }
}
