use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use shared::error::{Error, Result};

use crate::attributes::{AttrType, ATTR_MAPPED_ADDRESS, ATTR_XOR_MAPPED_ADDRESS};
use crate::message::{Getter, Message, Setter};
use crate::MAGIC_COOKIE;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

/// An address attribute in plain form (MAPPED-ADDRESS).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for MappedAddress {
    fn default() -> Self {
        MappedAddress {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl Setter for MappedAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut v = vec![0u8];
        match self.ip {
            IpAddr::V4(ip) => {
                v.push(FAMILY_IPV4);
                v.extend_from_slice(&self.port.to_be_bytes());
                v.extend_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                v.push(FAMILY_IPV6);
                v.extend_from_slice(&self.port.to_be_bytes());
                v.extend_from_slice(&ip.octets());
            }
        }
        m.add(ATTR_MAPPED_ADDRESS, &v);
        Ok(())
    }
}

impl Getter for MappedAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_MAPPED_ADDRESS)?;
        let (ip, port) = parse_addr_value(&v)?;
        self.ip = ip;
        self.port = port;
        Ok(())
    }
}

fn parse_addr_value(v: &[u8]) -> Result<(IpAddr, u16)> {
    if v.len() < 4 {
        return Err(Error::ErrAttributeSizeInvalid);
    }
    let port = u16::from_be_bytes([v[2], v[3]]);
    match v[1] {
        FAMILY_IPV4 => {
            if v.len() != 8 {
                return Err(Error::ErrAttributeSizeInvalid);
            }
            let mut b = [0u8; 4];
            b.copy_from_slice(&v[4..8]);
            Ok((IpAddr::V4(Ipv4Addr::from(b)), port))
        }
        FAMILY_IPV6 => {
            if v.len() != 20 {
                return Err(Error::ErrAttributeSizeInvalid);
            }
            let mut b = [0u8; 16];
            b.copy_from_slice(&v[4..20]);
            Ok((IpAddr::V6(Ipv6Addr::from(b)), port))
        }
        _ => Err(Error::ErrUnsupportedAddressFamily),
    }
}

/// An address attribute in xor-obfuscated form: XOR-MAPPED-ADDRESS and the
/// TURN XOR-PEER-ADDRESS / XOR-RELAYED-ADDRESS variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XorMappedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for XorMappedAddress {
    fn default() -> Self {
        XorMappedAddress {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl XorMappedAddress {
    pub fn add_to_as(&self, m: &mut Message, t: AttrType) -> Result<()> {
        let xor_port = self.port ^ (MAGIC_COOKIE >> 16) as u16;
        let mut v = vec![0u8];
        match self.ip {
            IpAddr::V4(ip) => {
                v.push(FAMILY_IPV4);
                v.extend_from_slice(&xor_port.to_be_bytes());
                let cookie = MAGIC_COOKIE.to_be_bytes();
                for (i, b) in ip.octets().into_iter().enumerate() {
                    v.push(b ^ cookie[i]);
                }
            }
            IpAddr::V6(ip) => {
                v.push(FAMILY_IPV6);
                v.extend_from_slice(&xor_port.to_be_bytes());
                let mut xor_key = [0u8; 16];
                xor_key[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
                xor_key[4..].copy_from_slice(&m.transaction_id.0);
                for (i, b) in ip.octets().into_iter().enumerate() {
                    v.push(b ^ xor_key[i]);
                }
            }
        }
        m.add(t, &v);
        Ok(())
    }

    pub fn get_from_as(&mut self, m: &Message, t: AttrType) -> Result<()> {
        let v = m.get(t)?;
        if v.len() < 4 {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        let port = u16::from_be_bytes([v[2], v[3]]) ^ (MAGIC_COOKIE >> 16) as u16;
        match v[1] {
            FAMILY_IPV4 => {
                if v.len() != 8 {
                    return Err(Error::ErrAttributeSizeInvalid);
                }
                let cookie = MAGIC_COOKIE.to_be_bytes();
                let mut b = [0u8; 4];
                for i in 0..4 {
                    b[i] = v[4 + i] ^ cookie[i];
                }
                self.ip = IpAddr::V4(Ipv4Addr::from(b));
            }
            FAMILY_IPV6 => {
                if v.len() != 20 {
                    return Err(Error::ErrAttributeSizeInvalid);
                }
                let mut xor_key = [0u8; 16];
                xor_key[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
                xor_key[4..].copy_from_slice(&m.transaction_id.0);
                let mut b = [0u8; 16];
                for i in 0..16 {
                    b[i] = v[4 + i] ^ xor_key[i];
                }
                self.ip = IpAddr::V6(Ipv6Addr::from(b));
            }
            _ => return Err(Error::ErrUnsupportedAddressFamily),
        }
        self.port = port;
        Ok(())
    }
}

impl Setter for XorMappedAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        self.add_to_as(m, ATTR_XOR_MAPPED_ADDRESS)
    }
}

impl Getter for XorMappedAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.get_from_as(m, ATTR_XOR_MAPPED_ADDRESS)
    }
}

impl fmt::Display for XorMappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
