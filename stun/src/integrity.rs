use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;
use shared::error::{Error, Result};

use crate::attributes::ATTR_MESSAGE_INTEGRITY;
use crate::message::{Message, Setter};
use crate::MESSAGE_HEADER_SIZE;

type HmacSha1 = Hmac<Sha1>;

const MESSAGE_INTEGRITY_SIZE: usize = 20;

/// MESSAGE-INTEGRITY attribute: HMAC-SHA1 keyed either with the raw
/// password (short-term credentials) or with md5(user:realm:pass)
/// (long-term credentials).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageIntegrity(pub Vec<u8>);

impl MessageIntegrity {
    pub fn new_short_term_integrity(password: String) -> Self {
        MessageIntegrity(password.into_bytes())
    }

    pub fn new_long_term_integrity(username: String, realm: String, password: String) -> Self {
        let mut h = Md5::new();
        h.update(format!("{username}:{realm}:{password}").as_bytes());
        MessageIntegrity(h.finalize().to_vec())
    }

    /// Verifies the MESSAGE-INTEGRITY of a decoded message.
    pub fn check(&self, m: &Message) -> Result<()> {
        let off = m
            .attr_offset(ATTR_MESSAGE_INTEGRITY)
            .ok_or(Error::ErrAttributeNotFound)?;
        let expected = m.get(ATTR_MESSAGE_INTEGRITY)?;
        if expected.len() != MESSAGE_INTEGRITY_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }

        // The HMAC covers the message up to the integrity attribute, with
        // the header length counting through that attribute.
        let mut covered = m.raw[..off].to_vec();
        let length = (off - MESSAGE_HEADER_SIZE + 4 + MESSAGE_INTEGRITY_SIZE) as u16;
        covered[2..4].copy_from_slice(&length.to_be_bytes());

        if hmac_sha1(&self.0, &covered)[..] == expected[..] {
            Ok(())
        } else {
            Err(Error::ErrIntegrityMismatch)
        }
    }
}

impl Setter for MessageIntegrity {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut covered = m.raw.clone();
        let length = (covered.len() - MESSAGE_HEADER_SIZE + 4 + MESSAGE_INTEGRITY_SIZE) as u16;
        covered[2..4].copy_from_slice(&length.to_be_bytes());

        let digest = hmac_sha1(&self.0, &covered);
        m.add(ATTR_MESSAGE_INTEGRITY, &digest);
        Ok(())
    }
}

fn hmac_sha1(key: &[u8], payload: &[u8]) -> [u8; MESSAGE_INTEGRITY_SIZE] {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC-SHA1 key");
    mac.update(payload);
    mac.finalize().into_bytes().into()
}
