
use std::fmt;

use rand::Rng;
use shared::error::{Error, Result};

use crate::attributes::{nearest_padded_value_length, AttrType, RawAttribute};
use crate::{MAGIC_COOKIE, MESSAGE_HEADER_SIZE, TRANSACTION_ID_SIZE};

/// Interface for attaching one or more attributes to a [Message].
pub trait Setter {
    fn add_to(&self, m: &mut Message) -> Result<()>;
}

/// Interface for extracting an attribute from a [Message].
pub trait Getter {
    fn get_from(&mut self, m: &Message) -> Result<()>;
}

/// STUN transaction id, 96 random bits.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub [u8; TRANSACTION_ID_SIZE]);

impl TransactionId {
    /// Returns a cryptographically random transaction id.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let mut b = [0u8; TRANSACTION_ID_SIZE];
        rand::thread_rng().fill(&mut b[..]);
        TransactionId(b)
    }
}

impl Setter for TransactionId {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.transaction_id = *self;
        m.write_header();
        Ok(())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// STUN message class, 2 bits of the message type.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MessageClass(pub u8);

pub const CLASS_REQUEST: MessageClass = MessageClass(0x00);
pub const CLASS_INDICATION: MessageClass = MessageClass(0x01);
pub const CLASS_SUCCESS_RESPONSE: MessageClass = MessageClass(0x02);
pub const CLASS_ERROR_RESPONSE: MessageClass = MessageClass(0x03);

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CLASS_REQUEST => "request",
            CLASS_INDICATION => "indication",
            CLASS_SUCCESS_RESPONSE => "success response",
            CLASS_ERROR_RESPONSE => "error response",
            _ => "unknown class",
        };
        write!(f, "{s}")
    }
}

/// STUN message method, 12 bits of the message type.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Method(pub u16);

pub const METHOD_BINDING: Method = Method(0x001);
pub const METHOD_ALLOCATE: Method = Method(0x003);
pub const METHOD_REFRESH: Method = Method(0x004);
pub const METHOD_SEND: Method = Method(0x006);
pub const METHOD_DATA: Method = Method(0x007);
pub const METHOD_CREATE_PERMISSION: Method = Method(0x008);
pub const METHOD_CHANNEL_BIND: Method = Method(0x009);

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            METHOD_BINDING => "Binding",
            METHOD_ALLOCATE => "Allocate",
            METHOD_REFRESH => "Refresh",
            METHOD_SEND => "Send",
            METHOD_DATA => "Data",
            METHOD_CREATE_PERMISSION => "CreatePermission",
            METHOD_CHANNEL_BIND => "ChannelBind",
            _ => return write!(f, "0x{:03x}", self.0),
        };
        write!(f, "{s}")
    }
}

/// Method and class packed as on the wire (RFC 5389 §6).
///
/// The class bits are interleaved with the method bits:
/// `|M11..M7|C1|M6..M4|C0|M3..M0|`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MessageType {
    pub method: Method,
    pub class: MessageClass,
}

pub const BINDING_REQUEST: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_REQUEST,
};
pub const BINDING_SUCCESS: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_SUCCESS_RESPONSE,
};
pub const BINDING_ERROR: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_ERROR_RESPONSE,
};

impl Default for MessageType {
    fn default() -> Self {
        BINDING_REQUEST
    }
}

impl MessageType {
    pub const fn new(method: Method, class: MessageClass) -> Self {
        MessageType { method, class }
    }

    pub fn value(&self) -> u16 {
        let m = self.method.0;
        let c = self.class.0 as u16;
        (m & 0x000f) | ((m & 0x0070) << 1) | ((m & 0x0f80) << 2) | ((c & 0x1) << 4) | ((c & 0x2) << 7)
    }

    pub fn from_value(v: u16) -> Self {
        let class = (((v >> 4) & 0x1) | ((v >> 7) & 0x2)) as u8;
        let method = (v & 0x000f) | ((v >> 1) & 0x0070) | ((v >> 2) & 0x0f80);
        MessageType {
            method: Method(method),
            class: MessageClass(class),
        }
    }
}

impl Setter for MessageType {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.typ = *self;
        m.write_header();
        Ok(())
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.class)
    }
}

/// A STUN message backed by its raw encoding.
///
/// `raw` always holds the current wire form; `add` appends to it and
/// `decode` parses it into `attributes`.
#[derive(Debug, Clone)]
pub struct Message {
    pub typ: MessageType,
    pub transaction_id: TransactionId,
    pub attributes: Vec<RawAttribute>,
    pub raw: Vec<u8>,
}

impl Default for Message {
    fn default() -> Self {
        Message::new()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} l={} attrs={} id={}",
            self.typ,
            self.raw.len().saturating_sub(MESSAGE_HEADER_SIZE),
            self.attributes.len(),
            self.transaction_id
        )
    }
}

impl Message {
    pub fn new() -> Self {
        let mut m = Message {
            typ: MessageType::default(),
            transaction_id: TransactionId::default(),
            attributes: vec![],
            raw: vec![0u8; MESSAGE_HEADER_SIZE],
        };
        m.write_header();
        m
    }

    /// Applies the setters in order on a freshly reset message.
    pub fn build(&mut self, setters: &[Box<dyn Setter>]) -> Result<()> {
        self.reset();
        for s in setters {
            s.add_to(self)?;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.typ = MessageType::default();
        self.transaction_id = TransactionId::default();
        self.attributes.clear();
        self.raw.clear();
        self.raw.resize(MESSAGE_HEADER_SIZE, 0);
        self.write_header();
    }

    /// Syncs type, length, magic cookie and transaction id into `raw`.
    pub fn write_header(&mut self) {
        if self.raw.len() < MESSAGE_HEADER_SIZE {
            self.raw.resize(MESSAGE_HEADER_SIZE, 0);
        }
        let typ = self.typ.value();
        let length = (self.raw.len() - MESSAGE_HEADER_SIZE) as u16;
        self.raw[0..2].copy_from_slice(&typ.to_be_bytes());
        self.raw[2..4].copy_from_slice(&length.to_be_bytes());
        self.raw[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        self.raw[8..MESSAGE_HEADER_SIZE].copy_from_slice(&self.transaction_id.0);
    }

    /// Appends an attribute, padding the value to a 4-byte boundary.
    pub fn add(&mut self, t: AttrType, v: &[u8]) {
        self.attributes.push(RawAttribute {
            typ: t,
            value: v.to_vec(),
        });

        self.raw.extend_from_slice(&t.0.to_be_bytes());
        self.raw.extend_from_slice(&(v.len() as u16).to_be_bytes());
        self.raw.extend_from_slice(v);
        let padded = nearest_padded_value_length(v.len());
        self.raw.resize(self.raw.len() + padded - v.len(), 0);

        self.write_header();
    }

    pub fn contains(&self, t: AttrType) -> bool {
        self.attributes.iter().any(|a| a.typ == t)
    }

    /// Returns a copy of the first attribute value of the given type.
    pub fn get(&self, t: AttrType) -> Result<Vec<u8>> {
        self.attributes
            .iter()
            .find(|a| a.typ == t)
            .map(|a| a.value.clone())
            .ok_or(Error::ErrAttributeNotFound)
    }

    /// Byte offset of the attribute's TLV header within `raw`.
    pub(crate) fn attr_offset(&self, t: AttrType) -> Option<usize> {
        let mut off = MESSAGE_HEADER_SIZE;
        while off + 4 <= self.raw.len() {
            let typ = AttrType(u16::from_be_bytes([self.raw[off], self.raw[off + 1]]));
            let len = u16::from_be_bytes([self.raw[off + 2], self.raw[off + 3]]) as usize;
            if typ == t {
                return Some(off);
            }
            off += 4 + nearest_padded_value_length(len);
        }
        None
    }

    /// Parses `raw` into header fields and the attribute list.
    pub fn decode(&mut self) -> Result<()> {
        if self.raw.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::ErrMessageTooShort);
        }

        let cookie = u32::from_be_bytes([self.raw[4], self.raw[5], self.raw[6], self.raw[7]]);
        if cookie != MAGIC_COOKIE {
            return Err(Error::ErrBadMagicCookie);
        }

        let typ = u16::from_be_bytes([self.raw[0], self.raw[1]]);
        if typ & 0xc000 != 0 {
            return Err(Error::ErrNotStunMessage);
        }
        self.typ = MessageType::from_value(typ);

        let size = u16::from_be_bytes([self.raw[2], self.raw[3]]) as usize;
        if size + MESSAGE_HEADER_SIZE != self.raw.len() || size % 4 != 0 {
            return Err(Error::ErrAttributeSizeInvalid);
        }

        let mut id = [0u8; TRANSACTION_ID_SIZE];
        id.copy_from_slice(&self.raw[8..MESSAGE_HEADER_SIZE]);
        self.transaction_id = TransactionId(id);

        self.attributes.clear();
        let mut off = MESSAGE_HEADER_SIZE;
        while off < self.raw.len() {
            if off + 4 > self.raw.len() {
                return Err(Error::ErrAttributeSizeInvalid);
            }
            let t = AttrType(u16::from_be_bytes([self.raw[off], self.raw[off + 1]]));
            let len = u16::from_be_bytes([self.raw[off + 2], self.raw[off + 3]]) as usize;
            let padded = nearest_padded_value_length(len);
            if off + 4 + padded > self.raw.len() {
                return Err(Error::ErrAttributeSizeInvalid);
            }
            self.attributes.push(RawAttribute {
                typ: t,
                value: self.raw[off + 4..off + 4 + len].to_vec(),
            });
            off += 4 + padded;
        }

        Ok(())
    }
}
