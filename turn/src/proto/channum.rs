use std::fmt;

use shared::error::{Error, Result};

use stun::attributes::ATTR_CHANNEL_NUMBER;
use stun::message::{Getter, Message, Setter};

/// First number of the valid TURN channel range.
pub const MIN_CHANNEL_NUMBER: u16 = 0x4000;
/// Last number of the valid TURN channel range.
pub const MAX_CHANNEL_NUMBER: u16 = 0x7ffe;

/// CHANNEL-NUMBER attribute (RFC 8656 §18.1).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelNumber(pub u16);

impl ChannelNumber {
    /// Whether this number is inside the channel range.
    pub fn valid(&self) -> bool {
        (MIN_CHANNEL_NUMBER..=MAX_CHANNEL_NUMBER).contains(&self.0)
    }
}

impl fmt::Display for ChannelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl Setter for ChannelNumber {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        if !self.valid() {
            return Err(Error::ErrChannelNumberOutOfRange);
        }
        // 16-bit number followed by 16 bits of RFFU zero.
        let mut v = Vec::with_capacity(4);
        v.extend_from_slice(&self.0.to_be_bytes());
        v.extend_from_slice(&[0, 0]);
        m.add(ATTR_CHANNEL_NUMBER, &v);
        Ok(())
    }
}

impl Getter for ChannelNumber {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_CHANNEL_NUMBER)?;
        if v.len() != 4 {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        self.0 = u16::from_be_bytes([v[0], v[1]]);
        if !self.valid() {
            return Err(Error::ErrChannelNumberOutOfRange);
        }
        Ok(())
    }
}
