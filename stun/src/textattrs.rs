use std::fmt;

use shared::error::{Error, Result};

use crate::attributes::{AttrType, ATTR_NONCE, ATTR_REALM, ATTR_SOFTWARE, ATTR_USERNAME};
use crate::message::{Getter, Message, Setter};

const MAX_TEXT_LENGTH: usize = 763;

/// A textual attribute: USERNAME, REALM, NONCE or SOFTWARE.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TextAttribute {
    pub attr: AttrType,
    pub text: String,
}

pub type Username = TextAttribute;
pub type Realm = TextAttribute;
pub type Nonce = TextAttribute;
pub type Software = TextAttribute;

impl TextAttribute {
    pub fn new(attr: AttrType, text: String) -> Self {
        TextAttribute { attr, text }
    }

    pub fn get_from_as(m: &Message, attr: AttrType) -> Result<Self> {
        let v = m.get(attr)?;
        if v.len() > MAX_TEXT_LENGTH {
            return Err(Error::ErrTextTooLong);
        }
        let text = String::from_utf8(v).map_err(|e| Error::Other(e.to_string()))?;
        Ok(TextAttribute { attr, text })
    }
}

impl Setter for TextAttribute {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        if self.text.len() > MAX_TEXT_LENGTH {
            return Err(Error::ErrTextTooLong);
        }
        m.add(self.attr, self.text.as_bytes());
        Ok(())
    }
}

impl Getter for TextAttribute {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let attr = if self.attr == AttrType(0) {
            ATTR_USERNAME
        } else {
            self.attr
        };
        *self = TextAttribute::get_from_as(m, attr)?;
        Ok(())
    }
}

impl fmt::Display for TextAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Convenience constructors for the common text attributes.
pub fn username(text: impl Into<String>) -> Username {
    TextAttribute::new(ATTR_USERNAME, text.into())
}

pub fn realm(text: impl Into<String>) -> Realm {
    TextAttribute::new(ATTR_REALM, text.into())
}

pub fn nonce(text: impl Into<String>) -> Nonce {
    TextAttribute::new(ATTR_NONCE, text.into())
}

pub fn software(text: impl Into<String>) -> Software {
    TextAttribute::new(ATTR_SOFTWARE, text.into())
}
