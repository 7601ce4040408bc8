use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use shared::error::Result;

use stun::attributes::ATTR_XOR_PEER_ADDRESS;
use stun::message::{Getter, Message, Setter};
use stun::xoraddr::XorMappedAddress;

/// XOR-PEER-ADDRESS attribute (RFC 8656 §18.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for PeerAddress {
    fn default() -> Self {
        PeerAddress {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        PeerAddress {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl Setter for PeerAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        XorMappedAddress {
            ip: self.ip,
            port: self.port,
        }
        .add_to_as(m, ATTR_XOR_PEER_ADDRESS)
    }
}

impl Getter for PeerAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let mut xor_addr = XorMappedAddress::default();
        xor_addr.get_from_as(m, ATTR_XOR_PEER_ADDRESS)?;
        self.ip = xor_addr.ip;
        self.port = xor_addr.port;
        Ok(())
    }
}
