use crc::{Crc, CRC_32_ISO_HDLC};
use shared::error::{Error, Result};

use crate::attributes::ATTR_FINGERPRINT;
use crate::message::{Message, Setter};
use crate::MESSAGE_HEADER_SIZE;

const FINGERPRINT_SIZE: usize = 4;
const FINGERPRINT_XOR: u32 = 0x5354_554e;

/// FINGERPRINT attribute: CRC-32 of the message xored with 0x5354554e.
/// Always the last attribute of a message.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Fingerprint;

pub const FINGERPRINT: Fingerprint = Fingerprint;

impl Fingerprint {
    /// Verifies the FINGERPRINT of a decoded message.
    pub fn check(&self, m: &Message) -> Result<()> {
        let off = m
            .attr_offset(ATTR_FINGERPRINT)
            .ok_or(Error::ErrAttributeNotFound)?;
        let expected = m.get(ATTR_FINGERPRINT)?;
        if expected.len() != FINGERPRINT_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }

        let crc = checksum(&m.raw[..off]);
        if crc.to_be_bytes()[..] == expected[..] {
            Ok(())
        } else {
            Err(Error::ErrFingerprintMismatch)
        }
    }
}

impl Setter for Fingerprint {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        // The CRC is computed with the header length already counting the
        // fingerprint attribute itself.
        let mut covered = m.raw.clone();
        let length = (covered.len() - MESSAGE_HEADER_SIZE + 4 + FINGERPRINT_SIZE) as u16;
        covered[2..4].copy_from_slice(&length.to_be_bytes());

        let crc = checksum(&covered);
        m.add(ATTR_FINGERPRINT, &crc.to_be_bytes());
        Ok(())
    }
}

fn checksum(b: &[u8]) -> u32 {
    Crc::<u32>::new(&CRC_32_ISO_HDLC).checksum(b) ^ FINGERPRINT_XOR
}
