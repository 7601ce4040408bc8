use shared::error::{Error, Result};

use stun::attributes::ATTR_REQUESTED_TRANSPORT;
use stun::message::{Getter, Message, Setter};

/// UDP protocol number for REQUESTED-TRANSPORT.
pub const PROTO_UDP: u8 = 17;

/// REQUESTED-TRANSPORT attribute (RFC 8656 §18.7). Only UDP relaying is
/// defined, so the protocol byte is always 17.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestedTransport {
    pub protocol: u8,
}

impl Default for RequestedTransport {
    fn default() -> Self {
        RequestedTransport {
            protocol: PROTO_UDP,
        }
    }
}

impl Setter for RequestedTransport {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_REQUESTED_TRANSPORT, &[self.protocol, 0, 0, 0]);
        Ok(())
    }
}

impl Getter for RequestedTransport {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_REQUESTED_TRANSPORT)?;
        if v.len() != 4 {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        self.protocol = v[0];
        Ok(())
    }
}
