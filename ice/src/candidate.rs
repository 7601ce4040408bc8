#[cfg(test)]
mod candidate_test;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crc::{Crc, CRC_32_ISCSI};
use rand::Rng;
use serde::Serialize;
use shared::TransportProtocol;

/// A local interface address handed in by the host-interface layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAddress {
    pub addr: IpAddr,
    /// Opaque per-interface id used for priority tie-breaks; -1 = unknown.
    pub network: i32,
    pub is_vpn: bool,
}

impl LocalAddress {
    pub fn new(addr: IpAddr) -> Self {
        LocalAddress {
            addr,
            network: -1,
            is_vpn: false,
        }
    }
}

/// A manually configured NAT mapping for one local address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalAddress {
    /// The local address the mapping applies to.
    pub base: IpAddr,
    /// The address the outside world sees.
    pub addr: IpAddr,
    /// Restrict the mapping to sockets bound to this port; -1 applies it to
    /// any port, keeping the socket's own port on the mapped side.
    pub port_base: i32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum CandidateType {
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "prflx")]
    PeerReflexive,
    #[serde(rename = "srflx")]
    ServerReflexive,
    #[serde(rename = "relay")]
    Relayed,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CandidateType::Host => "host",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::Relayed => "relay",
        };
        write!(f, "{s}")
    }
}

impl CandidateType {
    /// Type preference per RFC 8445 §5.1.2.2. Host candidates on VPN
    /// interfaces rank at the bottom together with relayed ones.
    pub const fn preference(self, is_vpn: bool) -> u32 {
        match self {
            CandidateType::Host => {
                if is_vpn {
                    0
                } else {
                    126
                }
            }
            CandidateType::PeerReflexive => 110,
            CandidateType::ServerReflexive => 100,
            CandidateType::Relayed => 0,
        }
    }
}

/// The logical candidate, without socket identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateInfo {
    /// The externally advertised transport address.
    pub addr: SocketAddr,
    /// The local bound address backing it; equal to `addr` for host
    /// candidates.
    pub base: SocketAddr,
    /// For srflx/relayed, the address the server saw or assigned.
    pub related: SocketAddr,
    #[serde(rename = "type")]
    pub typ: CandidateType,
    pub priority: u32,
    pub foundation: String,
    pub component_id: u16,
    pub network: i32,
}

impl CandidateInfo {
    /// A remote peer-reflexive candidate synthesized from the source of an
    /// unexpected inbound check. There is no authoritative foundation for
    /// these, so a fresh random one is used.
    pub fn make_remote_prflx(component_id: u16, from_addr: SocketAddr, priority: u32) -> Self {
        let addr = strip_zone(from_addr);
        CandidateInfo {
            addr,
            base: addr,
            related: unspecified_addr(),
            typ: CandidateType::PeerReflexive,
            priority,
            foundation: random_foundation(),
            component_id,
            network: -1,
        }
    }
}

impl fmt::Display for CandidateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} base={} prio={}",
            self.typ, self.addr, self.base, self.priority
        )
    }
}

/// Which transport of the component carries a candidate. Handles index the
/// component's transport table and are never reused within its lifetime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TransportRef {
    Local(usize),
    TcpTurn,
}

/// A live local candidate: the logical info plus the transport and path
/// that carry its traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Unique within the component; freed ids may be reused after removal.
    pub id: usize,
    pub info: CandidateInfo,
    pub transport: TransportRef,
    /// 0 = direct, 1 = relayed on the same socket.
    pub path: usize,
}

/// `(0.0.0.0, 0)`, used where no related address is known.
pub fn unspecified_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

/// Drops the IPv6 zone id so addresses compare bitwise on ip and port.
pub fn strip_zone(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(mut v6) => {
            v6.set_scope_id(0);
            SocketAddr::V6(v6)
        }
        v4 => v4,
    }
}

/// Address equality with the IPv6 zone id stripped first.
pub fn addr_eq(a: SocketAddr, b: SocketAddr) -> bool {
    strip_zone(a) == strip_zone(b)
}

/// priority = 2^24·type_pref + 2^8·local_pref + (256 − component_id)
pub(crate) fn calc_priority(type_pref: u32, local_pref: u32, component_id: u16) -> u32 {
    debug_assert!(type_pref <= 126);
    debug_assert!(local_pref <= 65535);
    debug_assert!((1..=256).contains(&component_id));

    (1 << 24) * type_pref + (1 << 8) * local_pref + (256 - component_id as u32)
}

/// The default priority for a candidate of `typ` on the interface with the
/// given local preference.
pub(crate) fn default_priority(
    typ: CandidateType,
    local_pref: u32,
    is_vpn: bool,
    component_id: u16,
) -> u32 {
    calc_priority(typ.preference(is_vpn), local_pref, component_id)
}

/// A deterministic foundation: candidates sharing type, base address and
/// (for server-derived types) server and socket protocol pair together in
/// check-list foundation semantics.
pub fn foundation(
    typ: CandidateType,
    base: IpAddr,
    stun_server: Option<IpAddr>,
    protocol: TransportProtocol,
) -> String {
    let mut buf = vec![];
    buf.extend_from_slice(typ.to_string().as_bytes());
    buf.extend_from_slice(base.to_string().as_bytes());
    if let Some(server) = stun_server {
        buf.extend_from_slice(server.to_string().as_bytes());
        buf.extend_from_slice(format!("{protocol:?}").as_bytes());
    }

    let checksum = Crc::<u32>::new(&CRC_32_ISCSI).checksum(&buf);
    format!("{checksum}")
}

fn random_foundation() -> String {
    let n: u64 = rand::thread_rng().gen();
    format!("{n:016x}")
}
