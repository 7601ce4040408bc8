use std::fmt;

use shared::error::{Error, Result};

use crate::attributes::ATTR_ERROR_CODE;
use crate::message::{Getter, Message, Setter};

/// ERROR-CODE attribute: a class/number pair plus a reason phrase.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorCodeAttribute {
    pub code: u16,
    pub reason: String,
}

// Codes this stack reacts to.
pub const CODE_UNAUTHORIZED: u16 = 401;
pub const CODE_ALLOCATION_MISMATCH: u16 = 437;
pub const CODE_STALE_NONCE: u16 = 438;
pub const CODE_ROLE_CONFLICT: u16 = 487;

impl ErrorCodeAttribute {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        ErrorCodeAttribute {
            code,
            reason: reason.into(),
        }
    }
}

impl Setter for ErrorCodeAttribute {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut v = Vec::with_capacity(4 + self.reason.len());
        v.extend_from_slice(&[0, 0, (self.code / 100) as u8, (self.code % 100) as u8]);
        v.extend_from_slice(self.reason.as_bytes());
        m.add(ATTR_ERROR_CODE, &v);
        Ok(())
    }
}

impl Getter for ErrorCodeAttribute {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_ERROR_CODE)?;
        if v.len() < 4 {
            return Err(Error::ErrMalformedErrorCode);
        }
        let class = (v[2] & 0x07) as u16;
        if !(3..=6).contains(&class) {
            return Err(Error::ErrMalformedErrorCode);
        }
        self.code = class * 100 + (v[3] % 100) as u16;
        self.reason = String::from_utf8_lossy(&v[4..]).into_owned();
        Ok(())
    }
}

impl fmt::Display for ErrorCodeAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.reason)
    }
}
