use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use shared::error::Result;

use stun::attributes::ATTR_XOR_RELAYED_ADDRESS;
use stun::message::{Getter, Message, Setter};
use stun::xoraddr::XorMappedAddress;

/// XOR-RELAYED-ADDRESS attribute (RFC 8656 §18.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for RelayedAddress {
    fn default() -> Self {
        RelayedAddress {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl From<SocketAddr> for RelayedAddress {
    fn from(addr: SocketAddr) -> Self {
        RelayedAddress {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl Setter for RelayedAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        XorMappedAddress {
            ip: self.ip,
            port: self.port,
        }
        .add_to_as(m, ATTR_XOR_RELAYED_ADDRESS)
    }
}

impl Getter for RelayedAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let mut xor_addr = XorMappedAddress::default();
        xor_addr.get_from_as(m, ATTR_XOR_RELAYED_ADDRESS)?;
        self.ip = xor_addr.ip;
        self.port = xor_addr.port;
        Ok(())
    }
}
