use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};

use shared::TransportProtocol;

use super::*;

#[test]
fn test_priority_formula() {
    // 2^24·type_pref + 2^8·local_pref + (256 − component_id)
    assert_eq!(
        calc_priority(126, 65535, 1),
        126 * (1 << 24) + 65535 * (1 << 8) + 255
    );
    assert_eq!(calc_priority(0, 0, 256), 0);
    assert_eq!(calc_priority(100, 65534, 2), 100 * (1 << 24) + 65534 * (1 << 8) + 254);
}

#[test]
fn test_type_preferences() {
    assert_eq!(CandidateType::Host.preference(false), 126);
    assert_eq!(CandidateType::Host.preference(true), 0);
    assert_eq!(CandidateType::PeerReflexive.preference(false), 110);
    assert_eq!(CandidateType::ServerReflexive.preference(false), 100);
    assert_eq!(CandidateType::Relayed.preference(false), 0);
}

#[test]
fn test_default_priority_ranks_types() {
    let host = default_priority(CandidateType::Host, 65535, false, 1);
    let vpn_host = default_priority(CandidateType::Host, 65535, true, 1);
    let prflx = default_priority(CandidateType::PeerReflexive, 65535, false, 1);
    let srflx = default_priority(CandidateType::ServerReflexive, 65535, false, 1);
    let relay = default_priority(CandidateType::Relayed, 65535, false, 1);

    assert!(host > prflx);
    assert!(prflx > srflx);
    assert!(srflx > relay);
    assert_eq!(vpn_host, relay);
}

#[test]
fn test_strip_zone() {
    let zoned = SocketAddr::V6(SocketAddrV6::new(
        Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
        5000,
        0,
        7,
    ));
    let plain = SocketAddr::V6(SocketAddrV6::new(
        Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
        5000,
        0,
        0,
    ));

    assert_ne!(zoned, plain);
    assert_eq!(strip_zone(zoned), plain);
    assert!(addr_eq(zoned, plain));
    assert!(!addr_eq(zoned, "127.0.0.1:5000".parse().unwrap()));
}

#[test]
fn test_foundation_deterministic() {
    let base: std::net::IpAddr = "192.168.1.5".parse().unwrap();
    let server: std::net::IpAddr = "74.125.1.1".parse().unwrap();

    let a = foundation(CandidateType::Host, base, None, TransportProtocol::Udp);
    let b = foundation(CandidateType::Host, base, None, TransportProtocol::Udp);
    assert_eq!(a, b);

    // Different type, server or protocol pairs differently.
    let srflx = foundation(
        CandidateType::ServerReflexive,
        base,
        Some(server),
        TransportProtocol::Udp,
    );
    assert_ne!(a, srflx);
    let tcp = foundation(
        CandidateType::ServerReflexive,
        base,
        Some(server),
        TransportProtocol::Tcp,
    );
    assert_ne!(srflx, tcp);
}

#[test]
fn test_remote_prflx_strips_zone_and_randomizes_foundation() {
    let from = SocketAddr::V6(SocketAddrV6::new(
        Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 9),
        4444,
        0,
        3,
    ));

    let a = CandidateInfo::make_remote_prflx(1, from, 1000);
    let b = CandidateInfo::make_remote_prflx(1, from, 1000);

    assert_eq!(a.typ, CandidateType::PeerReflexive);
    assert_eq!(a.addr, strip_zone(from));
    assert_eq!(a.priority, 1000);
    // No authoritative mapping exists for remote prflx foundations.
    assert_ne!(a.foundation, b.foundation);
}
