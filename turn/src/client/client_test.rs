use std::net::{IpAddr, Ipv4Addr};

use shared::error::Result;

use stun::attributes::{ATTR_REALM, ATTR_USERNAME};
use stun::error_code::CODE_UNAUTHORIZED;
use stun::textattrs;
use stun::xoraddr::XorMappedAddress;

use super::*;

fn server() -> SocketAddr {
    "198.51.100.10:3478".parse().unwrap()
}

fn peer() -> SocketAddr {
    "203.0.113.77:7000".parse().unwrap()
}

fn new_client() -> Client {
    Client::new(ClientConfig {
        server_addr: server(),
        protocol: TransportProtocol::Udp,
        username: "user".to_owned(),
        password: "pass".to_owned(),
        realm: String::new(),
        software: "icepath test".to_owned(),
    })
}

/// Pops the next transmit and decodes it as a STUN message.
fn next_message(client: &mut Client) -> Message {
    let transmit = client.poll_transmit().expect("transmit");
    assert_eq!(transmit.remote, server());
    let mut m = Message::new();
    m.raw = transmit.payload.to_vec();
    m.decode().expect("decode transmit");
    m
}

fn unauthorized_response(id: TransactionId) -> Message {
    let mut resp = Message::new();
    resp.build(&[
        Box::new(id),
        Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_ERROR_RESPONSE)),
        Box::new(ErrorCodeAttribute::new(CODE_UNAUTHORIZED, "Unauthorized")),
        Box::new(textattrs::realm("icepath.test")),
        Box::new(textattrs::nonce("n0")),
    ])
    .unwrap();
    resp
}

fn allocate_success(id: TransactionId, relayed: SocketAddr, mapped: SocketAddr) -> Message {
    let mut resp = Message::new();
    resp.build(&[
        Box::new(id),
        Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_SUCCESS_RESPONSE)),
        Box::new(RelayedAddress::from(relayed)),
        Box::new(XorMappedAddress {
            ip: mapped.ip(),
            port: mapped.port(),
        }),
        Box::new(Lifetime(Duration::from_secs(600))),
    ])
    .unwrap();
    resp
}

/// Runs the two-step allocate handshake and leaves the client active.
fn activate(client: &mut Client, relayed: SocketAddr, mapped: SocketAddr, now: Instant) {
    client.allocate(now).expect("allocate");
    let probe = next_message(client);
    assert!(!probe.contains(ATTR_USERNAME));

    client
        .handle_read(&unauthorized_response(probe.transaction_id).raw, server(), now)
        .expect("handle 401");

    let auth = next_message(client);
    assert!(auth.contains(ATTR_USERNAME));

    client
        .handle_read(
            &allocate_success(auth.transaction_id, relayed, mapped).raw,
            server(),
            now,
        )
        .expect("handle success");
}

#[test]
fn test_allocate_handshake() -> Result<()> {
    let mut client = new_client();
    let now = Instant::now();
    let relayed: SocketAddr = "198.51.100.50:50000".parse().unwrap();
    let mapped: SocketAddr = "203.0.113.9:40001".parse().unwrap();

    client.allocate(now)?;
    let probe = next_message(&mut client);
    assert_eq!(
        probe.typ,
        MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST)
    );
    assert!(!probe.contains(ATTR_USERNAME));

    assert!(client.handle_read(&unauthorized_response(probe.transaction_id).raw, server(), now)?);

    // The retry authenticates with the realm and nonce from the 401 and a
    // long-term credential key.
    let auth = next_message(&mut client);
    assert!(auth.contains(ATTR_USERNAME));
    assert_eq!(
        TextAttribute::get_from_as(&auth, ATTR_REALM)?.text,
        "icepath.test"
    );
    MessageIntegrity::new_long_term_integrity(
        "user".to_owned(),
        "icepath.test".to_owned(),
        "pass".to_owned(),
    )
    .check(&auth)?;

    assert!(client.handle_read(&allocate_success(auth.transaction_id, relayed, mapped).raw, server(), now)?);

    assert_eq!(
        client.poll_event(),
        Some(Event::Allocated {
            relayed,
            mapped: Some(mapped),
            lifetime: Duration::from_secs(600),
        })
    );
    assert!(client.is_active());
    assert_eq!(client.relayed_addr(), Some(relayed));
    assert_eq!(client.mapped_addr(), Some(mapped));

    Ok(())
}

#[test]
fn test_allocate_mismatch_flagged() -> Result<()> {
    let mut client = new_client();
    let now = Instant::now();

    client.allocate(now)?;
    let probe = next_message(&mut client);
    client.handle_read(&unauthorized_response(probe.transaction_id).raw, server(), now)?;
    let auth = next_message(&mut client);

    let mut resp = Message::new();
    resp.build(&[
        Box::new(auth.transaction_id),
        Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_ERROR_RESPONSE)),
        Box::new(ErrorCodeAttribute::new(
            CODE_ALLOCATION_MISMATCH,
            "Allocation Mismatch",
        )),
    ])?;
    client.handle_read(&resp.raw, server(), now)?;

    assert_eq!(
        client.poll_event(),
        Some(Event::AllocateFailed { mismatch: true })
    );
    assert!(!client.is_alive());
    Ok(())
}

#[test]
fn test_send_queues_until_permission() -> Result<()> {
    let mut client = new_client();
    let now = Instant::now();
    let relayed: SocketAddr = "198.51.100.50:50000".parse().unwrap();
    let mapped: SocketAddr = "203.0.113.9:40001".parse().unwrap();
    activate(&mut client, relayed, mapped, now);
    assert!(matches!(client.poll_event(), Some(Event::Allocated { .. })));

    client.send_to(b"hello", peer(), now)?;

    // The only transmit so far is the permission request; the payload waits.
    let perm_req = next_message(&mut client);
    assert_eq!(
        perm_req.typ,
        MessageType::new(METHOD_CREATE_PERMISSION, CLASS_REQUEST)
    );
    assert!(client.poll_transmit().is_none());

    let mut resp = Message::new();
    resp.build(&[
        Box::new(perm_req.transaction_id),
        Box::new(MessageType::new(
            METHOD_CREATE_PERMISSION,
            CLASS_SUCCESS_RESPONSE,
        )),
    ])?;
    client.handle_read(&resp.raw, server(), now)?;

    // The queued datagram flushes as a Send indication to the peer.
    let indication = next_message(&mut client);
    assert_eq!(
        indication.typ,
        MessageType::new(METHOD_SEND, CLASS_INDICATION)
    );
    let mut peer_addr = PeerAddress::default();
    peer_addr.get_from(&indication)?;
    assert_eq!((peer_addr.ip, peer_addr.port), (peer().ip(), peer().port()));
    let mut data = Data::default();
    data.get_from(&indication)?;
    assert_eq!(data.0, b"hello");

    // Later sends skip the queue.
    client.send_to(b"again", peer(), now)?;
    let indication = next_message(&mut client);
    assert_eq!(
        indication.typ,
        MessageType::new(METHOD_SEND, CLASS_INDICATION)
    );

    Ok(())
}

#[test]
fn test_channel_bind_switches_framing() -> Result<()> {
    let mut client = new_client();
    let now = Instant::now();
    let relayed: SocketAddr = "198.51.100.50:50000".parse().unwrap();
    let mapped: SocketAddr = "203.0.113.9:40001".parse().unwrap();
    activate(&mut client, relayed, mapped, now);
    let _ = client.poll_event();

    client.add_channel_peer(peer(), now)?;
    let bind_req = next_message(&mut client);
    assert_eq!(
        bind_req.typ,
        MessageType::new(METHOD_CHANNEL_BIND, CLASS_REQUEST)
    );
    let mut number = ChannelNumber::default();
    number.get_from(&bind_req)?;
    assert_eq!(number, ChannelNumber(MIN_CHANNEL_NUMBER));

    let mut resp = Message::new();
    resp.build(&[
        Box::new(bind_req.transaction_id),
        Box::new(MessageType::new(
            METHOD_CHANNEL_BIND,
            CLASS_SUCCESS_RESPONSE,
        )),
    ])?;
    client.handle_read(&resp.raw, server(), now)?;
    assert_eq!(
        client.poll_event(),
        Some(Event::ChannelBound {
            peer: peer(),
            number: ChannelNumber(MIN_CHANNEL_NUMBER),
        })
    );

    // Outgoing data now uses the 4-byte ChannelData framing.
    client.send_to(b"chan", peer(), now)?;
    let transmit = client.poll_transmit().expect("chandata transmit");
    assert_eq!(
        &transmit.payload[..],
        &[0x40, 0x00, 0x00, 0x04, b'c', b'h', b'a', b'n']
    );

    // Inbound ChannelData resolves back to the bound peer.
    let mut inbound = ChannelData {
        number: ChannelNumber(MIN_CHANNEL_NUMBER),
        data: b"pong".to_vec(),
        ..Default::default()
    };
    inbound.encode()?;
    assert!(client.handle_read(&inbound.raw, server(), now)?);
    assert_eq!(
        client.poll_event(),
        Some(Event::Data {
            peer: peer(),
            data: BytesMut::from(&b"pong"[..]),
        })
    );

    Ok(())
}

#[test]
fn test_data_indication_inbound() -> Result<()> {
    let mut client = new_client();
    let now = Instant::now();
    let relayed: SocketAddr = "198.51.100.50:50000".parse().unwrap();
    let mapped: SocketAddr = "203.0.113.9:40001".parse().unwrap();
    activate(&mut client, relayed, mapped, now);
    let _ = client.poll_event();

    let mut indication = Message::new();
    indication.build(&[
        Box::new(TransactionId::new()),
        Box::new(MessageType::new(METHOD_DATA, CLASS_INDICATION)),
        Box::new(PeerAddress::from(peer())),
        Box::new(Data(b"hi there".to_vec())),
    ])?;

    assert!(client.handle_read(&indication.raw, server(), now)?);
    assert_eq!(
        client.poll_event(),
        Some(Event::Data {
            peer: peer(),
            data: BytesMut::from(&b"hi there"[..]),
        })
    );
    Ok(())
}

#[test]
fn test_close_releases_allocation() -> Result<()> {
    let mut client = new_client();
    let now = Instant::now();
    let relayed: SocketAddr = "198.51.100.50:50000".parse().unwrap();
    let mapped: SocketAddr = "203.0.113.9:40001".parse().unwrap();
    activate(&mut client, relayed, mapped, now);
    let _ = client.poll_event();

    client.close(now);

    let refresh = next_message(&mut client);
    assert_eq!(refresh.typ, MessageType::new(METHOD_REFRESH, CLASS_REQUEST));
    let mut lifetime = Lifetime(Duration::from_secs(1));
    lifetime.get_from(&refresh)?;
    assert_eq!(lifetime.0, Duration::ZERO);

    assert!(!client.is_alive());
    assert_eq!(client.relayed_addr(), None);
    assert!(client.send_to(b"x", peer(), now).is_err());
    Ok(())
}

#[test]
fn test_ignores_traffic_from_other_sources() -> Result<()> {
    let mut client = new_client();
    let now = Instant::now();
    let elsewhere: SocketAddr = "192.0.2.1:1234".parse().unwrap();
    assert!(!client.handle_read(b"not from the server", elsewhere, now)?);
    Ok(())
}
