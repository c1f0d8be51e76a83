use super::{buffer::MsgBuffer, CodecError};

/// Type tags. One byte on the wire, ahead of every element payload.
pub const TAG_U16: u8 = 1;
pub const TAG_U32: u8 = 2;
pub const TAG_U64: u8 = 3;
pub const TAG_STRING: u8 = 4;

/// A single typed element of a framed message.
///
/// Numeric payloads are fixed-width big-endian. `Str` carries a raw byte
/// string prefixed by a big-endian `u16` length; text and opaque payloads
/// (bincode-encoded structures) both travel in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgElement {
    U16(u16),
    U32(u32),
    U64(u64),
    Str(Vec<u8>),
}

impl MsgElement {
    pub fn from_str(s: &str) -> Self {
        MsgElement::Str(s.as_bytes().to_vec())
    }

    /// Views a `Str` element as UTF-8 text.
    pub fn as_str(&self) -> Result<&str, CodecError> {
        match self {
            MsgElement::Str(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| CodecError::parse(format!("string element is not UTF-8: {e}"))),
            other => Err(CodecError::parse(format!(
                "expected string element, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            MsgElement::U16(_) => "u16",
            MsgElement::U32(_) => "u32",
            MsgElement::U64(_) => "u64",
            MsgElement::Str(_) => "string",
        }
    }

    /// Encoded size on the wire, tag byte included.
    pub fn encoded_len(&self) -> usize {
        match self {
            MsgElement::U16(_) => 1 + 2,
            MsgElement::U32(_) => 1 + 4,
            MsgElement::U64(_) => 1 + 8,
            MsgElement::Str(bytes) => 1 + 2 + bytes.len(),
        }
    }

    /// Serializes this element onto `buf`. The write is all-or-nothing: if
    /// the element does not fit, the buffer is left exactly as it was.
    pub fn append_to(&self, buf: &mut MsgBuffer) -> Result<(), CodecError> {
        if let MsgElement::Str(bytes) = self {
            if bytes.len() > u16::MAX as usize {
                return Err(CodecError::StringTooLong(bytes.len()));
            }
        }
        let needed = self.encoded_len();
        if needed > buf.remaining_capacity() {
            return Err(CodecError::BufferFull {
                needed,
                remaining: buf.remaining_capacity(),
            });
        }
        match self {
            MsgElement::U16(v) => {
                buf.append_bytes(&[TAG_U16])?;
                buf.append_bytes(&v.to_be_bytes())?;
            }
            MsgElement::U32(v) => {
                buf.append_bytes(&[TAG_U32])?;
                buf.append_bytes(&v.to_be_bytes())?;
            }
            MsgElement::U64(v) => {
                buf.append_bytes(&[TAG_U64])?;
                buf.append_bytes(&v.to_be_bytes())?;
            }
            MsgElement::Str(bytes) => {
                buf.append_bytes(&[TAG_STRING])?;
                buf.append_bytes(&(bytes.len() as u16).to_be_bytes())?;
                buf.append_bytes(bytes)?;
            }
        }
        Ok(())
    }

    /// Parses the next element from `buf`. On any failure the read cursor is
    /// restored to where it was before the call.
    pub fn retrieve_from(buf: &mut MsgBuffer) -> Result<MsgElement, CodecError> {
        let saved = buf.read_pos();
        match Self::retrieve_inner(buf) {
            Ok(elem) => Ok(elem),
            Err(e) => {
                buf.set_read_pos(saved);
                Err(e)
            }
        }
    }

    fn retrieve_inner(buf: &mut MsgBuffer) -> Result<MsgElement, CodecError> {
        let tag = buf.read_exact(1)?[0];
        match tag {
            TAG_U16 => {
                let raw: [u8; 2] = buf.read_exact(2)?.try_into().unwrap();
                Ok(MsgElement::U16(u16::from_be_bytes(raw)))
            }
            TAG_U32 => {
                let raw: [u8; 4] = buf.read_exact(4)?.try_into().unwrap();
                Ok(MsgElement::U32(u32::from_be_bytes(raw)))
            }
            TAG_U64 => {
                let raw: [u8; 8] = buf.read_exact(8)?.try_into().unwrap();
                Ok(MsgElement::U64(u64::from_be_bytes(raw)))
            }
            TAG_STRING => {
                let raw: [u8; 2] = buf.read_exact(2)?.try_into().unwrap();
                let len = u16::from_be_bytes(raw) as usize;
                let bytes = buf.read_exact(len)?.to_vec();
                Ok(MsgElement::Str(bytes))
            }
            other => Err(CodecError::parse(format!("unknown element tag {other}"))),
        }
    }
}
